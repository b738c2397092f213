//! OS threads for scripts.
//!
//! Interpreter instances are single-threaded, so a thread never shares one.
//! `run` dumps the thread function to bytecode and the new OS thread loads it
//! into an instance of its own. Only plain values and the shared sync
//! objects cross over; everything else has to be rebuilt on the other side.

use crate::mutex::{self, Mutex};
use crate::object;
use crate::wait_group::{self, WaitGroup};
use leap_lua::{HostFunction, LuaError, LuaType, Stack, State, ValueRegistry};
use std::io;
use std::os::raw::c_int;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use uuid::Uuid;

/// A value passed to a thread function.
#[derive(Debug, Clone)]
pub enum ThreadArg {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Vec<u8>),
    Mutex(Arc<Mutex>),
    WaitGroup(Arc<WaitGroup>),
}

impl ThreadArg {
    /// Read the value at `position` of the calling stack.
    pub fn from_stack(stack: &Stack, position: c_int) -> Result<Self, LuaError> {
        let arg = match stack.type_of(position) {
            LuaType::None | LuaType::Nil => ThreadArg::Nil,
            LuaType::Boolean => ThreadArg::Boolean(stack.to_boolean(position)),
            LuaType::Number if stack.is_integer(position) => {
                ThreadArg::Integer(stack.check_integer(position)?)
            }
            LuaType::Number => ThreadArg::Number(stack.check_number(position)?),
            LuaType::String => {
                ThreadArg::String(stack.to_bytes(position).unwrap_or_default())
            }
            LuaType::Table => shared_object(stack, position)?,
            other => {
                return Err(LuaError::argument(
                    position,
                    format!("cannot pass a {} to a thread", other.name()),
                ))
            }
        };
        Ok(arg)
    }

    pub fn push(&self, stack: &Stack) -> Result<(), LuaError> {
        match self {
            ThreadArg::Nil => stack.push_nil(),
            ThreadArg::Boolean(b) => stack.push_boolean(*b),
            ThreadArg::Integer(n) => stack.push_integer(*n),
            ThreadArg::Number(n) => stack.push_number(*n),
            ThreadArg::String(bytes) => stack.push_bytes(bytes),
            ThreadArg::Mutex(m) => mutex::push(stack, Arc::clone(m))?,
            ThreadArg::WaitGroup(wg) => wait_group::push(stack, Arc::clone(wg))?,
        }
        Ok(())
    }
}

fn shared_object(stack: &Stack, position: c_int) -> Result<ThreadArg, LuaError> {
    let unsupported = || {
        LuaError::argument(
            position,
            "only Mutex and WaitGroup tables can be passed to a thread",
        )
    };
    let handle = object::handle_of(stack, position).ok_or_else(unsupported)?;
    let registry = ValueRegistry::global();
    if let Ok(m) = registry.get::<Mutex>(handle) {
        return Ok(ThreadArg::Mutex(m));
    }
    if let Ok(wg) = registry.get::<WaitGroup>(handle) {
        return Ok(ThreadArg::WaitGroup(wg));
    }
    Err(unsupported())
}

/// `leap.Thread(fn)`
pub(crate) fn construct(stack: &Stack) -> Result<c_int, LuaError> {
    if !stack.is_function(1) {
        return Err(LuaError::runtime(
            "you must supply a function to leap.Thread()",
        ));
    }
    object::push_object::<()>(
        stack,
        "Thread",
        None,
        vec![("run", HostFunction::new(run))],
    )?;
    stack.push_value(1);
    stack.set_field(-2, "func")?;
    Ok(1)
}

/// `thread:run(...)`
fn run(stack: &Stack) -> Result<c_int, LuaError> {
    stack.check_table(1)?;
    let args = (2..=stack.top())
        .map(|position| ThreadArg::from_stack(stack, position))
        .collect::<Result<Vec<_>, _>>()?;
    let chunk = dump_function(stack)?;

    let id = Uuid::new_v4().to_string();
    spawn(id.clone(), chunk, args)
        .map_err(|e| LuaError::runtime(format!("failed to start thread: {e}")))?;
    stack.push_string(&id);
    Ok(1)
}

/// Dump `self.func` to bytecode with `string.dump`.
///
/// Lookups are raw, so scripts cannot swap in a proxy for the library.
fn dump_function(stack: &Stack) -> Result<Vec<u8>, LuaError> {
    stack.push_globals();
    let library = stack.raw_get_field(-1, "string");
    stack.remove(-2);
    if library != LuaType::Table {
        stack.pop(1);
        return Err(LuaError::runtime("string library not loaded"));
    }
    if stack.raw_get_field(-1, "dump") != LuaType::Function {
        stack.pop(2);
        return Err(LuaError::runtime("string.dump is not available"));
    }
    if stack.raw_get_field(1, "func") != LuaType::Function {
        stack.pop(3);
        return Err(LuaError::runtime("thread has no function"));
    }
    let dumped = stack.pcall(1, 1);
    let chunk = dumped.map(|()| stack.to_bytes(-1));
    // string table, plus the dump result on success
    stack.pop(if chunk.is_ok() { 2 } else { 1 });
    chunk?.ok_or_else(|| LuaError::runtime("unable to dump thread function"))
}

/// Run `chunk` with `args` on a new OS thread named `leap-<id>`.
pub fn spawn(
    id: String,
    chunk: Vec<u8>,
    args: Vec<ThreadArg>,
) -> io::Result<JoinHandle<Result<(), LuaError>>> {
    Builder::new().name(format!("leap-{id}")).spawn(move || {
        tracing::debug!(thread = %id, "thread started");
        let result = run_chunk(&id, &chunk, &args);
        match &result {
            Ok(()) => tracing::debug!(thread = %id, "thread finished"),
            Err(err) => tracing::error!(thread = %id, error = %err, "thread failed"),
        }
        result
    })
}

/// Run `chunk` to completion on a fresh instance on the current thread.
pub fn run_chunk(id: &str, chunk: &[u8], args: &[ThreadArg]) -> Result<(), LuaError> {
    let state = State::with_label(format!("thread {id}"))?;
    state.open_libs();
    crate::register(&state)?;
    state.do_string(crate::BOOT)?;

    state.load_buffer(chunk, &format!("=thread {id}"))?;
    let nargs = c_int::try_from(args.len())
        .map_err(|_| LuaError::runtime("too many thread arguments"))?;
    state.ensure_stack(nargs)?;
    for arg in args {
        arg.push(&state)?;
    }
    state.pcall(nargs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua() -> State {
        let state = State::new().unwrap();
        state.open_libs();
        state
    }

    #[test]
    fn scalar_args_are_read_from_the_stack() {
        let state = lua();
        state.push_nil();
        state.push_boolean(true);
        state.push_integer(7);
        state.push_number(1.5);
        state.push_string("hi");
        assert!(matches!(ThreadArg::from_stack(&state, 1), Ok(ThreadArg::Nil)));
        assert!(matches!(
            ThreadArg::from_stack(&state, 2),
            Ok(ThreadArg::Boolean(true))
        ));
        assert!(matches!(
            ThreadArg::from_stack(&state, 3),
            Ok(ThreadArg::Integer(7))
        ));
        assert!(matches!(
            ThreadArg::from_stack(&state, 4),
            Ok(ThreadArg::Number(n)) if n == 1.5
        ));
        match ThreadArg::from_stack(&state, 5) {
            Ok(ThreadArg::String(bytes)) => assert_eq!(bytes, b"hi"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn plain_tables_and_functions_are_rejected() {
        let state = lua();
        state.new_table();
        state.do_string("f = function() end").unwrap();
        state.get_global("f").unwrap();
        assert!(matches!(
            ThreadArg::from_stack(&state, 1),
            Err(LuaError::Argument { position: 1, .. })
        ));
        let err = ThreadArg::from_stack(&state, 2).unwrap_err();
        assert!(err.to_string().contains("cannot pass a function"), "{err}");
    }

    #[test]
    fn run_chunk_passes_arguments() {
        let state = lua();
        state
            .do_string("src = string.dump(function(n, s) assert(n == 2 and s == 'x') end)")
            .unwrap();
        state.get_global("src").unwrap();
        let chunk = state.to_bytes(-1).unwrap();

        let args = [ThreadArg::Integer(2), ThreadArg::String(b"x".to_vec())];
        run_chunk("test", &chunk, &args).unwrap();
        let err = run_chunk("test", &chunk, &[ThreadArg::Nil]).unwrap_err();
        assert!(err.to_string().contains("assertion failed"), "{err}");
    }
}
