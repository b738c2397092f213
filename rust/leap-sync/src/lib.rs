//! The `leap` Lua module.
//!
//! `require('leap')` gives scripts three constructors:
//!
//! - `leap.Mutex()`: `lock()`, `unlock()`, `try_lock()`
//! - `leap.WaitGroup()`: `add([n])`, `done()`, `wait()`
//! - `leap.Thread(fn)`: `run(...)` starts `fn` on a new OS thread with its
//!   own interpreter and returns the thread id
//!
//! The module table is read-only.

pub mod error;
pub mod mutex;
mod object;
pub mod thread;
pub mod wait_group;

pub use error::SyncError;
pub use mutex::Mutex;
pub use thread::ThreadArg;
pub use wait_group::WaitGroup;

use leap_lua::{LuaError, Metatable, Stack};
use std::os::raw::c_int;

pub const MODULE_NAME: &str = "leap";

/// Chunk every interpreter runs after [`register`], the runner's and every
/// thread's alike: the module as the global `leap`, plus a `threads` table.
pub const BOOT: &str = "leap = require('leap')\nthreads = {}";

/// Preload the `leap` module into `package.preload`.
///
/// The standard libraries must already be open.
pub fn register(stack: &Stack) -> Result<(), LuaError> {
    stack.push_module(MODULE_NAME, loader)
}

fn loader(stack: &Stack) -> Result<c_int, LuaError> {
    stack.create_table(0, 4);
    stack.push_function(mutex::construct)?;
    stack.set_field(-2, "Mutex")?;
    stack.push_function(wait_group::construct)?;
    stack.set_field(-2, "WaitGroup")?;
    stack.push_function(thread::construct)?;
    stack.set_field(-2, "Thread")?;
    stack.push_string(env!("CARGO_PKG_VERSION"));
    stack.set_field(-2, "version")?;

    // Scripts get an empty proxy that reads through to the real table.
    stack.new_table();
    stack.push_metatable(
        Metatable::new()
            .name(MODULE_NAME)
            .newindex(|_| Err(LuaError::runtime("attempt to modify module 'leap'"))),
    )?;
    stack.push_value(-3);
    stack.set_field(-2, "__index")?;
    stack.set_metatable(-2);
    stack.remove(-2);
    Ok(1)
}
