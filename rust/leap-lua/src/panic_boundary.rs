//! Panic boundary between host callbacks and the interpreter.
//!
//! The interpreter is C code. A Rust panic must never unwind through its
//! frames, so every host function runs inside [`catch_panic`] and a panic is
//! turned into an ordinary interpreter error by the trampoline.
//!
//! ```rust
//! use leap_lua::panic_boundary::catch_panic;
//!
//! let result = catch_panic(|| -> i32 { panic!("oops") });
//! assert_eq!(result.unwrap_err().message(), "oops");
//! ```

use crate::error::LuaError;
use std::any::Any;
use std::fmt;
use std::panic::{self, UnwindSafe};

/// A panic caught at the boundary.
#[derive(Debug, Clone)]
pub struct PanicError {
    message: String,
}

impl PanicError {
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        Self {
            message: extract_panic_message(payload.as_ref()),
        }
    }

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl std::error::Error for PanicError {}

impl From<PanicError> for LuaError {
    fn from(err: PanicError) -> Self {
        LuaError::Panic(err.message)
    }
}

/// Handles `&str` and `String` payloads; anything else gets a generic text.
fn extract_panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `f`, converting a panic into `Err(PanicError)`.
pub fn catch_panic<T>(f: impl FnOnce() -> T + UnwindSafe) -> Result<T, PanicError> {
    panic::catch_unwind(f).map_err(PanicError::from_payload)
}

/// Run a host callback at the interpreter boundary.
///
/// Both a returned error and a panic come back as `LuaError`.
pub fn guard_callback<T>(
    f: impl FnOnce() -> Result<T, LuaError> + UnwindSafe,
) -> Result<T, LuaError> {
    match catch_panic(f) {
        Ok(result) => result,
        Err(panic) => {
            tracing::warn!(message = panic.message(), "host function panicked");
            Err(panic.into())
        }
    }
}
