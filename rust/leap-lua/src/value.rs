//! Interpreter value types as seen from the host.

use mlua_sys as ffi;
use std::os::raw::c_int;
use strum::{Display, IntoStaticStr};

/// The type of a value on the interpreter stack.
///
/// `Display` and [`LuaType::name`] give the same lowercase names the
/// interpreter uses (`"nil"`, `"lightuserdata"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum LuaType {
    /// An index outside the current stack frame.
    None,
    Nil,
    Boolean,
    LightUserdata,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
    /// A type code this crate does not know about.
    Unknown,
}

impl LuaType {
    /// Map a raw `lua_type` result to a [`LuaType`].
    pub fn from_raw(code: c_int) -> Self {
        match code {
            ffi::LUA_TNONE => LuaType::None,
            ffi::LUA_TNIL => LuaType::Nil,
            ffi::LUA_TBOOLEAN => LuaType::Boolean,
            ffi::LUA_TLIGHTUSERDATA => LuaType::LightUserdata,
            ffi::LUA_TNUMBER => LuaType::Number,
            ffi::LUA_TSTRING => LuaType::String,
            ffi::LUA_TTABLE => LuaType::Table,
            ffi::LUA_TFUNCTION => LuaType::Function,
            ffi::LUA_TUSERDATA => LuaType::Userdata,
            ffi::LUA_TTHREAD => LuaType::Thread,
            _ => LuaType::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// `true` for `None` and `Nil`.
    pub fn is_none_or_nil(self) -> bool {
        matches!(self, LuaType::None | LuaType::Nil)
    }
}
