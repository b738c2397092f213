//! Owning wrapper around one interpreter instance.

use crate::bridge::{self, StateIndex, INSTANCE_KEY};
use crate::error::LuaError;
use crate::host::Instance;
use crate::registry::ValueRegistry;
use crate::stack::Stack;
use mlua_sys as ffi;
use std::ops::Deref;
use std::sync::Arc;

/// One interpreter instance plus its registry entries.
///
/// Construction installs the bridge's fatal-error handler and registers an
/// [`Instance`] under a fresh state index. Dropping the state closes the
/// interpreter (running pending `__gc` metamethods) and then releases every
/// registry entry created through it.
///
/// A `State` is neither `Send` nor `Sync`; use one per OS thread.
pub struct State {
    stack: Stack,
    instance: Arc<Instance>,
    fatal_handler: ffi::lua_CFunction,
}

impl State {
    pub fn new() -> Result<Self, LuaError> {
        Self::with_label("main")
    }

    /// Create a state whose log lines and [`Instance`] carry `label`.
    pub fn with_label(label: impl Into<String>) -> Result<Self, LuaError> {
        let raw = unsafe { ffi::luaL_newstate() };
        if raw.is_null() {
            return Err(LuaError::StateCreation);
        }
        unsafe { bridge::init(raw) };

        let instance = Arc::new(Instance::new(label));
        let index = match ValueRegistry::global().add_arc(Arc::clone(&instance)) {
            Ok(index) => index,
            Err(err) => {
                unsafe { ffi::lua_close(raw) };
                return Err(err.into());
            }
        };
        unsafe {
            ffi::lua_pushinteger(raw, index.to_lua());
            ffi::lua_setfield(raw, ffi::LUA_REGISTRYINDEX, INSTANCE_KEY.as_ptr());
        }
        tracing::debug!(instance = %index, label = instance.label(), "interpreter created");

        Ok(Self {
            // SAFETY: `raw` is live until `drop` and registered under `index`.
            stack: unsafe { Stack::from_raw(raw, index) },
            instance,
            fatal_handler: bridge::fatal_error_handler,
        })
    }

    pub fn index(&self) -> StateIndex {
        self.stack.instance_index()
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The fatal-error handler installed on this interpreter.
    pub fn fatal_handler(&self) -> ffi::lua_CFunction {
        self.fatal_handler
    }

    /// Open the standard libraries.
    pub fn open_libs(&self) {
        unsafe { ffi::luaL_openlibs(self.stack.as_ptr()) }
    }
}

impl Deref for State {
    type Target = Stack;

    fn deref(&self) -> &Stack {
        &self.stack
    }
}

impl Drop for State {
    fn drop(&mut self) {
        unsafe { ffi::lua_close(self.stack.as_ptr()) };
        let registry = ValueRegistry::global();
        let functions = self.instance.take_functions();
        for index in &functions {
            let _ = registry.remove(*index);
        }
        let _ = registry.remove(self.index());
        tracing::debug!(
            instance = %self.index(),
            label = self.instance.label(),
            released = functions.len(),
            "interpreter closed"
        );
    }
}
