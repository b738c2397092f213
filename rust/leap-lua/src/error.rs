//! Errors surfaced by the interpreter wrapper.

use crate::registry::RegistryError;
use mlua_sys as ffi;
use std::os::raw::c_int;
use std::path::PathBuf;
use thiserror::Error;

/// Message used when a failing call left nothing on the stack.
pub(crate) const NO_ERROR_ON_STACK: &str = "no error available on stack";
/// Message used when the error value is not a string.
pub(crate) const ERROR_NOT_A_STRING: &str = "error object is not a string";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LuaError {
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("out of memory error: {0}")]
    Memory(String),
    #[error("error in error handling: {0}")]
    ErrorHandler(String),
    #[error("undefined error (status {code}): {message}")]
    Unknown { code: c_int, message: String },
    #[error("failed to create interpreter state")]
    StateCreation,
    #[error("stack overflow: cannot grow stack by {0} slots")]
    StackOverflow(c_int),
    #[error("bad argument #{position} ({message})")]
    Argument { position: c_int, message: String },
    #[error("upvalue {slot} does not hold a valid registry index")]
    BadUpvalue { slot: c_int },
    #[error("host function panicked: {0}")]
    Panic(String),
    #[error("cannot read '{}': {message}", path.display())]
    Io { path: PathBuf, message: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LuaError {
    /// Build the error matching a non-OK status code returned by the
    /// interpreter.
    pub fn from_status(code: c_int, message: String) -> Self {
        match code {
            ffi::LUA_ERRRUN => LuaError::Runtime(message),
            ffi::LUA_ERRSYNTAX => LuaError::Syntax(message),
            ffi::LUA_ERRMEM => LuaError::Memory(message),
            ffi::LUA_ERRERR => LuaError::ErrorHandler(message),
            code => LuaError::Unknown { code, message },
        }
    }

    /// Shorthand for a script-visible runtime error raised by a host function.
    pub fn runtime(message: impl Into<String>) -> Self {
        LuaError::Runtime(message.into())
    }

    pub fn argument(position: c_int, message: impl Into<String>) -> Self {
        LuaError::Argument {
            position,
            message: message.into(),
        }
    }

    /// The message a script sees when the trampoline raises this error.
    ///
    /// Runtime errors produced by host functions are raised with their bare
    /// message so that round trips through `pcall` keep the text intact.
    pub fn script_message(&self) -> String {
        match self {
            LuaError::Runtime(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_variants() {
        assert_eq!(
            LuaError::from_status(ffi::LUA_ERRRUN, "x".into()),
            LuaError::Runtime("x".into())
        );
        assert_eq!(
            LuaError::from_status(ffi::LUA_ERRSYNTAX, "x".into()),
            LuaError::Syntax("x".into())
        );
        assert_eq!(
            LuaError::from_status(ffi::LUA_ERRMEM, "x".into()),
            LuaError::Memory("x".into())
        );
        assert_eq!(
            LuaError::from_status(ffi::LUA_ERRERR, "x".into()),
            LuaError::ErrorHandler("x".into())
        );
        assert!(matches!(
            LuaError::from_status(42, "x".into()),
            LuaError::Unknown { code: 42, .. }
        ));
    }

    #[test]
    fn display_prefixes_category() {
        assert_eq!(
            LuaError::Syntax("unexpected symbol".into()).to_string(),
            "syntax error: unexpected symbol"
        );
        assert_eq!(
            LuaError::argument(1, "number expected, got nil").to_string(),
            "bad argument #1 (number expected, got nil)"
        );
    }

    #[test]
    fn script_message_keeps_runtime_text_bare() {
        assert_eq!(LuaError::runtime("boom").script_message(), "boom");
        assert_eq!(
            LuaError::Panic("oops".into()).script_message(),
            "host function panicked: oops"
        );
    }

    #[test]
    fn registry_errors_convert() {
        let err: LuaError = RegistryError::Missing(9).into();
        assert_eq!(err.to_string(), "invalid index 9: index does not exist");
    }
}
