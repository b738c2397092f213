//! Leap's Lua bridge.
//!
//! Embeds Lua 5.4 and lets scripts call host closures. The pieces:
//!
//! - [`bridge`]: the native glue (fatal handler, closure trampoline).
//! - [`registry`]: integer handles for host values seen by scripts.
//! - [`State`] / [`Stack`]: the interpreter wrapper host code works with.
//! - [`Metatable`]: metatables backed by host functions.
//! - [`panic_boundary`]: keeps host panics out of the interpreter.

pub mod bridge;
pub mod error;
pub mod host;
pub mod metatable;
pub mod panic_boundary;
pub mod registry;
pub mod stack;
pub mod state;
pub mod value;

pub use bridge::{FunctionIndex, Resolver, StateIndex};
pub use error::LuaError;
pub use host::{HostFn, HostFunction, Instance};
pub use metatable::Metatable;
pub use mlua_sys as ffi;
pub use registry::{RegistryError, RegistryIndex, ValueRegistry};
pub use stack::Stack;
pub use state::State;
pub use value::LuaType;

/// `nresults` value asking for every result of a call.
pub const MULTRET: std::os::raw::c_int = ffi::LUA_MULTRET;
