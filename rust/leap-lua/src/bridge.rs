//! Native entry points the interpreter calls into.
//!
//! Two pieces of glue live here:
//!
//! - [`init`] installs [`fatal_error_handler`] as the interpreter's panic
//!   function, so an error raised outside any protected call is logged and
//!   recorded instead of silently killing the process.
//! - [`push_closure`] wraps [`dispatch_trampoline`] in a native closure whose
//!   two upvalues are a state index and a function index. When a script calls
//!   the closure, the trampoline reads both indices back and lets a
//!   [`Resolver`] decide what runs.
//!
//! The Lua C API has no other way to attach host identity to a native
//! closure, so the indices travel as upvalues. They are pushed as integers
//! and read back with `lua_tointegerx`; a slot holding anything else is
//! rejected rather than truncated.

use crate::error::{LuaError, ERROR_NOT_A_STRING, NO_ERROR_ON_STACK};
use crate::host::{HostFunction, Instance};
use crate::panic_boundary::guard_callback;
use crate::registry::{RegistryIndex, ValueRegistry};
use crate::stack::{self, Stack};
use mlua_sys as ffi;
use std::ffi::CStr;
use std::os::raw::c_int;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Index of the interpreter wrapper that owns a closure.
pub type StateIndex = RegistryIndex;
/// Index of the host function a closure invokes.
pub type FunctionIndex = RegistryIndex;

/// Number of upvalues every bridged closure carries.
pub const BRIDGE_UPVALUES: c_int = 2;

/// Interpreter registry key holding the owning state index.
pub(crate) const INSTANCE_KEY: &CStr = c"leap.instance";

/// Decides what a bridged closure does when called.
///
/// `l` is the live interpreter thread the closure was called on, with the
/// call arguments on its stack. The return value is the number of results
/// pushed and is handed back to the interpreter unchanged.
pub trait Resolver {
    fn resolve(
        l: *mut ffi::lua_State,
        state: StateIndex,
        function: FunctionIndex,
    ) -> Result<c_int, LuaError>;
}

/// Resolves indices through [`ValueRegistry::global`].
pub struct RegistryResolver;

impl Resolver for RegistryResolver {
    fn resolve(
        l: *mut ffi::lua_State,
        state: StateIndex,
        function: FunctionIndex,
    ) -> Result<c_int, LuaError> {
        let registry = ValueRegistry::global();
        let instance = registry.get::<Instance>(state)?;
        let callback: Arc<HostFunction> = registry.get(function)?;
        instance.record_call();
        // SAFETY: `l` comes straight from the interpreter for this call.
        let stack = unsafe { Stack::from_raw(l, state) };
        callback.call(&stack)
    }
}

/// Install the fatal-error handler on a fresh interpreter.
///
/// # Safety
/// `l` must be a live interpreter that is not running any script.
pub unsafe fn init(l: *mut ffi::lua_State) {
    tracing::debug!(state = ?l, "installing fatal error handler");
    ffi::lua_atpanic(l, fatal_error_handler);
}

/// Called by the interpreter on an error raised outside any protected call.
///
/// Logs the error, records it on the owning [`Instance`] and returns `0`.
/// It only reads the stack top and the interpreter registry, never runs
/// script code, and never raises.
///
/// # Safety
/// Only the interpreter may call this, with its own state.
pub unsafe extern "C-unwind" fn fatal_error_handler(l: *mut ffi::lua_State) -> c_int {
    let message = top_message(l);
    let owner = instance_index(l)
        .and_then(|index| Some((index, ValueRegistry::global().get::<Instance>(index).ok()?)));
    match owner {
        Some((index, instance)) => {
            instance.record_fault(&message);
            tracing::error!(
                instance = %index,
                label = instance.label(),
                %message,
                "unprotected error in interpreter"
            );
        }
        None => tracing::error!(%message, "unprotected error in interpreter"),
    }
    0
}

/// Push the two indices a bridged closure needs, state index first.
///
/// # Safety
/// `l` must be a live interpreter with two free stack slots.
pub unsafe fn push_indices(l: *mut ffi::lua_State, state: StateIndex, function: FunctionIndex) {
    ffi::lua_pushinteger(l, state.to_lua());
    ffi::lua_pushinteger(l, function.to_lua());
}

/// Pop `upvalues` values and push a closure around [`dispatch_trampoline`]
/// that binds them.
///
/// `upvalues` is [`BRIDGE_UPVALUES`] in practice, with the state index and the
/// function index on top of the stack in that order.
///
/// # Safety
/// `l` must be a live interpreter holding at least `upvalues` values.
pub unsafe fn push_closure(l: *mut ffi::lua_State, upvalues: c_int) {
    push_closure_with::<RegistryResolver>(l, upvalues);
}

/// [`push_closure`] with a custom [`Resolver`].
///
/// # Safety
/// Same as [`push_closure`].
pub unsafe fn push_closure_with<R: Resolver>(l: *mut ffi::lua_State, upvalues: c_int) {
    ffi::lua_pushcclosure(l, trampoline::<R>, upvalues);
}

/// The trampoline [`push_closure`] installs.
///
/// # Safety
/// Only the interpreter may call this, on a closure built by [`push_closure`].
pub unsafe extern "C-unwind" fn dispatch_trampoline(l: *mut ffi::lua_State) -> c_int {
    trampoline::<RegistryResolver>(l)
}

/// Read both upvalues, run the resolver, return its result verbatim.
///
/// Failures are raised as interpreter errors after every host value has been
/// dropped, since raising does not return.
///
/// # Safety
/// Only the interpreter may call this, on a closure built by
/// [`push_closure_with::<R>`](push_closure_with).
pub unsafe extern "C-unwind" fn trampoline<R: Resolver>(l: *mut ffi::lua_State) -> c_int {
    let outcome = guard_callback(AssertUnwindSafe(|| {
        let state = read_upvalue(l, 1)?;
        let function = read_upvalue(l, 2)?;
        R::resolve(l, state, function)
    }));
    match outcome {
        Ok(count) => count,
        Err(err) => raise(l, err),
    }
}

unsafe fn read_upvalue(l: *mut ffi::lua_State, slot: c_int) -> Result<RegistryIndex, LuaError> {
    let mut isnum: c_int = 0;
    let raw = ffi::lua_tointegerx(l, ffi::lua_upvalueindex(slot), &mut isnum);
    if isnum == 0 {
        return Err(LuaError::BadUpvalue { slot });
    }
    RegistryIndex::from_lua(raw).ok_or(LuaError::BadUpvalue { slot })
}

unsafe fn raise(l: *mut ffi::lua_State, err: LuaError) -> c_int {
    let message = err.script_message();
    drop(err);
    ffi::lua_pushlstring(l, message.as_ptr().cast(), message.len());
    drop(message);
    ffi::lua_error(l)
}

unsafe fn top_message(l: *mut ffi::lua_State) -> String {
    if ffi::lua_gettop(l) == 0 {
        return NO_ERROR_ON_STACK.to_string();
    }
    if ffi::lua_type(l, -1) != ffi::LUA_TSTRING {
        return ERROR_NOT_A_STRING.to_string();
    }
    stack::raw_string(l, -1).unwrap_or_default()
}

/// The state index stored in the interpreter registry by `State`, if any.
pub(crate) unsafe fn instance_index(l: *mut ffi::lua_State) -> Option<StateIndex> {
    ffi::lua_getfield(l, ffi::LUA_REGISTRYINDEX, INSTANCE_KEY.as_ptr());
    let mut isnum: c_int = 0;
    let raw = ffi::lua_tointegerx(l, -1, &mut isnum);
    ffi::lua_pop(l, 1);
    if isnum == 0 {
        None
    } else {
        RegistryIndex::from_lua(raw)
    }
}
