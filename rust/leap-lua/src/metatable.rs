//! Metatables whose metamethods are host functions.

use crate::error::LuaError;
use crate::host::HostFunction;
use crate::stack::Stack;
use std::os::raw::c_int;

/// Builder for a metatable pushed with [`Stack::push_metatable`].
///
/// ```no_run
/// # use leap_lua::{Metatable, State};
/// # fn demo(state: &State) -> Result<(), leap_lua::LuaError> {
/// state.new_table();
/// state.push_metatable(
///     Metatable::new()
///         .name("demo.Object")
///         .tostring(|stack| {
///             stack.push_string("<demo object>");
///             Ok(1)
///         }),
/// )?;
/// state.set_metatable(-2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Metatable {
    name: Option<String>,
    index: Option<HostFunction>,
    newindex: Option<HostFunction>,
    tostring: Option<HostFunction>,
    gc: Option<HostFunction>,
}

impl Metatable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `__name`, used by the interpreter in error messages and `tostring`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn index<F>(mut self, f: F) -> Self
    where
        F: Fn(&Stack) -> Result<c_int, LuaError> + Send + Sync + 'static,
    {
        self.index = Some(HostFunction::new(f));
        self
    }

    pub fn newindex<F>(mut self, f: F) -> Self
    where
        F: Fn(&Stack) -> Result<c_int, LuaError> + Send + Sync + 'static,
    {
        self.newindex = Some(HostFunction::new(f));
        self
    }

    pub fn tostring<F>(mut self, f: F) -> Self
    where
        F: Fn(&Stack) -> Result<c_int, LuaError> + Send + Sync + 'static,
    {
        self.tostring = Some(HostFunction::new(f));
        self
    }

    pub fn gc<F>(mut self, f: F) -> Self
    where
        F: Fn(&Stack) -> Result<c_int, LuaError> + Send + Sync + 'static,
    {
        self.gc = Some(HostFunction::new(f));
        self
    }

    pub(crate) fn into_parts(self) -> (Option<String>, Vec<(&'static str, HostFunction)>) {
        let fields = [
            ("__index", self.index),
            ("__newindex", self.newindex),
            ("__tostring", self.tostring),
            ("__gc", self.gc),
        ]
        .into_iter()
        .filter_map(|(field, f)| f.map(|f| (field, f)))
        .collect();
        (self.name, fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_set_metamethods_are_emitted() {
        let (name, fields) = Metatable::new()
            .index(|_| Ok(0))
            .gc(|_| Ok(0))
            .into_parts();
        assert_eq!(name, None);
        let names: Vec<_> = fields.iter().map(|(field, _)| *field).collect();
        assert_eq!(names, vec!["__index", "__gc"]);
    }

    #[test]
    fn name_is_kept() {
        let (name, fields) = Metatable::new().name("leap.Test").into_parts();
        assert_eq!(name.as_deref(), Some("leap.Test"));
        assert!(fields.is_empty());
    }
}
