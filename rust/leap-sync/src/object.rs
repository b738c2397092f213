//! Script-side objects backed by shared host values.

use leap_lua::{
    FunctionIndex, HostFunction, LuaError, LuaType, Metatable, RegistryIndex, Stack,
    ValueRegistry,
};
use std::any::Any;
use std::os::raw::c_int;
use std::sync::{Arc, OnceLock};

/// Push a table holding `methods`, named `leap.<kind>` by its metatable.
///
/// With a `value`, the table also gets a `handle` field naming the value in
/// the global registry. Collecting the table releases the handle along with
/// the object's methods and metamethods.
pub(crate) fn push_object<T: Any + Send + Sync>(
    stack: &Stack,
    kind: &str,
    value: Option<Arc<T>>,
    methods: Vec<(&'static str, HostFunction)>,
) -> Result<(), LuaError> {
    let owned: Arc<OnceLock<Vec<FunctionIndex>>> = Arc::new(OnceLock::new());
    let mut functions = Vec::with_capacity(methods.len() + 1);

    stack.create_table(0, methods.len() as c_int + 1);
    for (name, method) in methods {
        functions.push(stack.push_host_function(method)?);
        stack.set_field(-2, name)?;
    }

    let handle = value
        .map(|value| ValueRegistry::global().add_arc(value))
        .transpose()?;
    if let Some(handle) = handle {
        stack.push_integer(handle.to_lua());
        stack.set_field(-2, "handle")?;
    }

    let released = Arc::clone(&owned);
    let metatable = Metatable::new()
        .name(format!("leap.{kind}"))
        .gc(move |stack| {
            if let Some(handle) = handle {
                let _ = ValueRegistry::global().remove(handle);
            }
            if let Some(functions) = released.get() {
                stack.release_functions(functions)?;
            }
            Ok(0)
        });
    functions.extend(stack.push_metatable(metatable)?);
    stack.set_metatable(-2);
    let _ = owned.set(functions);
    Ok(())
}

/// The registry handle of the object table at `index`, if it has one.
pub(crate) fn handle_of(stack: &Stack, index: c_int) -> Option<RegistryIndex> {
    if stack.raw_get_field(index, "handle") != LuaType::Number {
        stack.pop(1);
        return None;
    }
    let handle = stack.to_integer(-1).and_then(RegistryIndex::from_lua);
    stack.pop(1);
    handle
}

/// Position of the first real argument of a method, skipping `self` when
/// the method was called with `obj:method(...)`.
pub(crate) fn first_arg(stack: &Stack) -> c_int {
    if stack.is_table(1) {
        2
    } else {
        1
    }
}
