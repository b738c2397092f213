//! Safe operations on an interpreter's value stack.
//!
//! A [`Stack`] is a borrowed view of one interpreter thread. `State` derefs
//! to one, and every host function receives one for the thread it was called
//! on. Indices follow the interpreter convention: positive indices count from
//! the bottom of the current frame (1 is the first argument), negative ones
//! from the top (-1 is the top value).

use crate::bridge::{self, FunctionIndex, StateIndex, BRIDGE_UPVALUES};
use crate::error::{LuaError, ERROR_NOT_A_STRING, NO_ERROR_ON_STACK};
use crate::host::{HostFunction, Instance};
use crate::metatable::Metatable;
use crate::registry::ValueRegistry;
use crate::value::LuaType;
use mlua_sys as ffi;
use std::ffi::CString;
use std::os::raw::c_int;
use std::path::Path;
use std::ptr;

pub struct Stack {
    raw: *mut ffi::lua_State,
    instance: StateIndex,
}

impl Stack {
    /// View an interpreter thread, e.g. inside a custom `Resolver`.
    ///
    /// # Safety
    /// `raw` must be a live interpreter thread belonging to the interpreter
    /// registered under `instance`, and must outlive the returned view.
    pub unsafe fn from_raw(raw: *mut ffi::lua_State, instance: StateIndex) -> Self {
        Self { raw, instance }
    }

    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.raw
    }

    /// State index of the interpreter this stack belongs to.
    pub fn instance_index(&self) -> StateIndex {
        self.instance
    }

    // -----------------------------------------------------------------------
    // Stack manipulation
    // -----------------------------------------------------------------------

    pub fn top(&self) -> c_int {
        unsafe { ffi::lua_gettop(self.raw) }
    }

    pub fn set_top(&self, index: c_int) {
        unsafe { ffi::lua_settop(self.raw, index) }
    }

    pub fn pop(&self, n: c_int) {
        self.set_top(-n - 1);
    }

    pub fn push_value(&self, index: c_int) {
        unsafe { ffi::lua_pushvalue(self.raw, index) }
    }

    /// Move the top value into `index`, shifting up the values above it.
    pub fn insert(&self, index: c_int) {
        unsafe { ffi::lua_insert(self.raw, index) }
    }

    pub fn remove(&self, index: c_int) {
        unsafe { ffi::lua_remove(self.raw, index) }
    }

    pub fn check_stack(&self, extra: c_int) -> bool {
        unsafe { ffi::lua_checkstack(self.raw, extra) != 0 }
    }

    pub fn ensure_stack(&self, extra: c_int) -> Result<(), LuaError> {
        if self.check_stack(extra) {
            Ok(())
        } else {
            Err(LuaError::StackOverflow(extra))
        }
    }

    pub fn status(&self) -> c_int {
        unsafe { ffi::lua_status(self.raw) }
    }

    // -----------------------------------------------------------------------
    // Type checks
    // -----------------------------------------------------------------------

    pub fn type_of(&self, index: c_int) -> LuaType {
        LuaType::from_raw(unsafe { ffi::lua_type(self.raw, index) })
    }

    pub fn typename(&self, index: c_int) -> &'static str {
        self.type_of(index).name()
    }

    pub fn is_none(&self, index: c_int) -> bool {
        self.type_of(index) == LuaType::None
    }

    pub fn is_nil(&self, index: c_int) -> bool {
        self.type_of(index) == LuaType::Nil
    }

    pub fn is_none_or_nil(&self, index: c_int) -> bool {
        self.type_of(index).is_none_or_nil()
    }

    pub fn is_boolean(&self, index: c_int) -> bool {
        self.type_of(index) == LuaType::Boolean
    }

    /// `true` for numbers and strings convertible to numbers.
    pub fn is_number(&self, index: c_int) -> bool {
        unsafe { ffi::lua_isnumber(self.raw, index) != 0 }
    }

    pub fn is_integer(&self, index: c_int) -> bool {
        unsafe { ffi::lua_isinteger(self.raw, index) != 0 }
    }

    /// `true` for strings and numbers.
    pub fn is_string(&self, index: c_int) -> bool {
        unsafe { ffi::lua_isstring(self.raw, index) != 0 }
    }

    pub fn is_table(&self, index: c_int) -> bool {
        self.type_of(index) == LuaType::Table
    }

    pub fn is_function(&self, index: c_int) -> bool {
        self.type_of(index) == LuaType::Function
    }

    /// `true` for native functions, including bridged host functions.
    pub fn is_host_function(&self, index: c_int) -> bool {
        unsafe { ffi::lua_iscfunction(self.raw, index) != 0 }
    }

    /// `true` for full and light userdata.
    pub fn is_userdata(&self, index: c_int) -> bool {
        unsafe { ffi::lua_isuserdata(self.raw, index) != 0 }
    }

    pub fn is_light_userdata(&self, index: c_int) -> bool {
        self.type_of(index) == LuaType::LightUserdata
    }

    pub fn is_thread(&self, index: c_int) -> bool {
        self.type_of(index) == LuaType::Thread
    }

    /// Primitive equality, without metamethods.
    pub fn raw_equal(&self, a: c_int, b: c_int) -> bool {
        unsafe { ffi::lua_rawequal(self.raw, a, b) != 0 }
    }

    // -----------------------------------------------------------------------
    // Reading values
    // -----------------------------------------------------------------------

    pub fn to_number(&self, index: c_int) -> Option<f64> {
        let mut isnum: c_int = 0;
        let n = unsafe { ffi::lua_tonumberx(self.raw, index, &mut isnum) };
        (isnum != 0).then_some(n)
    }

    /// The value as an integer; floats only convert when they are integral.
    pub fn to_integer(&self, index: c_int) -> Option<i64> {
        let mut isnum: c_int = 0;
        let n = unsafe { ffi::lua_tointegerx(self.raw, index, &mut isnum) };
        (isnum != 0).then_some(n)
    }

    /// Interpreter truthiness: everything except `nil` and `false`.
    pub fn to_boolean(&self, index: c_int) -> bool {
        unsafe { ffi::lua_toboolean(self.raw, index) != 0 }
    }

    /// The bytes of a string value. Numbers are formatted without changing
    /// the value on the stack; other types give `None`.
    pub fn to_bytes(&self, index: c_int) -> Option<Vec<u8>> {
        match self.type_of(index) {
            LuaType::String => unsafe { raw_bytes(self.raw, index) },
            LuaType::Number => {
                self.push_value(index);
                let bytes = unsafe { raw_bytes(self.raw, -1) };
                self.pop(1);
                bytes
            }
            _ => None,
        }
    }

    pub fn to_string(&self, index: c_int) -> Option<String> {
        self.to_bytes(index)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn check_integer(&self, position: c_int) -> Result<i64, LuaError> {
        self.to_integer(position)
            .ok_or_else(|| self.type_error(position, "integer"))
    }

    pub fn check_number(&self, position: c_int) -> Result<f64, LuaError> {
        self.to_number(position)
            .ok_or_else(|| self.type_error(position, "number"))
    }

    pub fn check_string(&self, position: c_int) -> Result<String, LuaError> {
        self.to_string(position)
            .ok_or_else(|| self.type_error(position, "string"))
    }

    pub fn check_table(&self, position: c_int) -> Result<(), LuaError> {
        if self.is_table(position) {
            Ok(())
        } else {
            Err(self.type_error(position, "table"))
        }
    }

    pub fn check_function(&self, position: c_int) -> Result<(), LuaError> {
        if self.is_function(position) {
            Ok(())
        } else {
            Err(self.type_error(position, "function"))
        }
    }

    fn type_error(&self, position: c_int, expected: &str) -> LuaError {
        let got = match self.type_of(position) {
            LuaType::None => "no value",
            other => other.name(),
        };
        LuaError::argument(position, format!("{expected} expected, got {got}"))
    }

    // -----------------------------------------------------------------------
    // Pushing values
    // -----------------------------------------------------------------------

    pub fn push_nil(&self) {
        unsafe { ffi::lua_pushnil(self.raw) }
    }

    pub fn push_boolean(&self, b: bool) {
        unsafe { ffi::lua_pushboolean(self.raw, c_int::from(b)) }
    }

    pub fn push_integer(&self, n: i64) {
        unsafe { ffi::lua_pushinteger(self.raw, n) }
    }

    pub fn push_number(&self, n: f64) {
        unsafe { ffi::lua_pushnumber(self.raw, n) }
    }

    pub fn push_string(&self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        unsafe {
            ffi::lua_pushlstring(self.raw, bytes.as_ptr().cast(), bytes.len());
        }
    }

    /// Push a host function as a script-callable closure.
    ///
    /// The function is registered in the global registry and released when
    /// the owning `State` is dropped.
    pub fn push_function<F>(&self, f: F) -> Result<FunctionIndex, LuaError>
    where
        F: Fn(&Stack) -> Result<c_int, LuaError> + Send + Sync + 'static,
    {
        self.push_host_function(HostFunction::new(f))
    }

    pub fn push_host_function(&self, f: HostFunction) -> Result<FunctionIndex, LuaError> {
        self.ensure_stack(BRIDGE_UPVALUES + 1)?;
        let registry = ValueRegistry::global();
        let instance = registry.get::<Instance>(self.instance)?;
        let index = registry.add(f)?;
        instance.track(index);
        unsafe {
            bridge::push_indices(self.raw, self.instance, index);
            bridge::push_closure(self.raw, BRIDGE_UPVALUES);
        }
        Ok(index)
    }

    /// Release host functions before the interpreter closes, typically from
    /// the `__gc` of the value that owned them.
    ///
    /// A closure still referring to a released index raises a registry error
    /// when called.
    pub fn release_functions(&self, indices: &[FunctionIndex]) -> Result<(), LuaError> {
        let registry = ValueRegistry::global();
        registry.get::<Instance>(self.instance)?.untrack(indices);
        for index in indices {
            let _ = registry.remove(*index);
        }
        Ok(())
    }

    /// Build `mt` as a table and push it. Assign it with [`Stack::set_metatable`].
    ///
    /// Returns the function indices of the metamethods.
    pub fn push_metatable(&self, mt: Metatable) -> Result<Vec<FunctionIndex>, LuaError> {
        let (name, fields) = mt.into_parts();
        self.create_table(0, fields.len() as c_int + 1);
        let mut functions = Vec::with_capacity(fields.len());
        for (field, f) in fields {
            functions.push(self.push_host_function(f)?);
            self.set_field(-2, field)?;
        }
        if let Some(name) = name {
            self.push_string(&name);
            self.set_field(-2, "__name")?;
        }
        Ok(functions)
    }

    // -----------------------------------------------------------------------
    // Tables and globals
    // -----------------------------------------------------------------------

    pub fn new_table(&self) {
        self.create_table(0, 0);
    }

    pub fn create_table(&self, narr: c_int, nrec: c_int) {
        unsafe { ffi::lua_createtable(self.raw, narr, nrec) }
    }

    /// Push `t[key]` for the table at `index`; returns the pushed value's type.
    ///
    /// An error raised by an `__index` metamethod is returned and nothing is
    /// pushed.
    pub fn get_field(&self, index: c_int, key: &str) -> Result<LuaType, LuaError> {
        self.ensure_stack(3)?;
        let table = self.abs_index(index);
        self.push_value(table);
        self.push_string(key);
        self.call_protected(protected_get, 2, 1)?;
        Ok(self.type_of(-1))
    }

    /// Pop the top value into `t[key]` for the table at `index`.
    ///
    /// The value is popped even when a `__newindex` metamethod fails.
    pub fn set_field(&self, index: c_int, key: &str) -> Result<(), LuaError> {
        let table = self.abs_index(index);
        let result = self.ensure_stack(4).and_then(|()| {
            self.push_value(table);
            self.push_string(key);
            self.push_value(-3);
            self.call_protected(protected_set, 3, 0)
        });
        self.pop(1);
        result
    }

    /// Like [`Stack::get_field`] but without metamethods.
    pub fn raw_get_field(&self, index: c_int, key: &str) -> LuaType {
        let table = unsafe { ffi::lua_absindex(self.raw, index) };
        self.push_string(key);
        LuaType::from_raw(unsafe { ffi::lua_rawget(self.raw, table) })
    }

    /// Push `t[k]` where `k` is the top value (popped) and `t` is at `index`.
    pub fn get_table(&self, index: c_int) -> Result<LuaType, LuaError> {
        let table = self.abs_index(index);
        let result = self.ensure_stack(3).and_then(|()| {
            self.push_value(table);
            self.push_value(-2);
            self.call_protected(protected_get, 2, 1)
        });
        match result {
            Ok(()) => {
                self.remove(-2);
                Ok(self.type_of(-1))
            }
            Err(err) => {
                self.pop(1);
                Err(err)
            }
        }
    }

    /// Do `t[k] = v` with `v` on top, `k` below it, both popped.
    pub fn set_table(&self, index: c_int) -> Result<(), LuaError> {
        let table = self.abs_index(index);
        let result = self.ensure_stack(4).and_then(|()| {
            self.push_value(table);
            self.push_value(-3);
            self.push_value(-3);
            self.call_protected(protected_set, 3, 0)
        });
        self.pop(2);
        result
    }

    /// Push the globals table, bypassing any metamethods.
    pub fn push_globals(&self) {
        unsafe {
            ffi::lua_rawgeti(self.raw, ffi::LUA_REGISTRYINDEX, ffi::LUA_RIDX_GLOBALS);
        }
    }

    pub fn get_global(&self, name: &str) -> Result<LuaType, LuaError> {
        self.push_globals();
        match self.get_field(-1, name) {
            Ok(ty) => {
                self.remove(-2);
                Ok(ty)
            }
            Err(err) => {
                self.pop(1);
                Err(err)
            }
        }
    }

    /// Pop the top value into the global `name`.
    pub fn set_global(&self, name: &str) -> Result<(), LuaError> {
        self.push_globals();
        self.insert(-2);
        let result = self.set_field(-2, name);
        self.pop(1);
        result
    }

    /// Pop a table and make it the metatable of the value at `index`.
    pub fn set_metatable(&self, index: c_int) {
        unsafe { ffi::lua_setmetatable(self.raw, index) };
    }

    /// Push the metatable of the value at `index`, if it has one.
    pub fn get_metatable(&self, index: c_int) -> bool {
        unsafe { ffi::lua_getmetatable(self.raw, index) != 0 }
    }

    /// Concatenate the top `n` values, leaving the result on top.
    ///
    /// On error (say, a table without `__concat`) the values are popped and
    /// nothing is pushed.
    pub fn concat(&self, n: c_int) -> Result<(), LuaError> {
        self.ensure_stack(1)?;
        self.call_protected(protected_concat, n, 1)
    }

    fn abs_index(&self, index: c_int) -> c_int {
        unsafe { ffi::lua_absindex(self.raw, index) }
    }

    /// Run `f` on the top `nargs` values under `lua_pcall`.
    ///
    /// Table access and concatenation can run metamethods, and an error they
    /// raise must not unwind through host frames.
    fn call_protected(
        &self,
        f: ffi::lua_CFunction,
        nargs: c_int,
        nresults: c_int,
    ) -> Result<(), LuaError> {
        unsafe { ffi::lua_pushcfunction(self.raw, f) };
        self.insert(-(nargs + 1));
        self.pcall(nargs, nresults)
    }

    /// Register `loader` under `package.preload[name]`, so that
    /// `require(name)` calls it.
    pub fn push_module<F>(&self, name: &str, loader: F) -> Result<(), LuaError>
    where
        F: Fn(&Stack) -> Result<c_int, LuaError> + Send + Sync + 'static,
    {
        if self.get_global("package")? != LuaType::Table {
            self.pop(1);
            return Err(LuaError::runtime(
                "package library not loaded; call open_libs first",
            ));
        }
        if let Err(err) = self.get_field(-1, "preload") {
            self.pop(1);
            return Err(err);
        }
        let pushed = self.push_function(loader);
        if let Err(err) = pushed {
            self.pop(2);
            return Err(err);
        }
        let set = self.set_field(-2, name);
        self.pop(2);
        set
    }

    // -----------------------------------------------------------------------
    // Loading and running chunks
    // -----------------------------------------------------------------------

    /// Load a chunk (source or precompiled) without running it.
    pub fn load_buffer(&self, chunk: &[u8], name: &str) -> Result<(), LuaError> {
        let name = c_string(name)?;
        let status = unsafe {
            ffi::luaL_loadbufferx(
                self.raw,
                chunk.as_ptr().cast(),
                chunk.len(),
                name.as_ptr(),
                ptr::null(),
            )
        };
        self.status_result(status)
    }

    pub fn load_string(&self, source: &str) -> Result<(), LuaError> {
        let name = if source.contains('\0') { "=(string)" } else { source };
        self.load_buffer(source.as_bytes(), name)
    }

    /// Load a file as a chunk. A first line starting with `#` is skipped.
    pub fn load_file(&self, path: &Path) -> Result<(), LuaError> {
        let mut chunk = std::fs::read(path).map_err(|e| LuaError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if chunk.first() == Some(&b'#') {
            let end = chunk.iter().position(|&b| b == b'\n').unwrap_or(chunk.len());
            chunk.drain(..end);
        }
        self.load_buffer(&chunk, &format!("@{}", path.display()))
    }

    /// Call the function below `nargs` arguments in protected mode.
    ///
    /// On failure the error value is popped and returned as a `LuaError`.
    pub fn pcall(&self, nargs: c_int, nresults: c_int) -> Result<(), LuaError> {
        let status = unsafe { ffi::lua_pcall(self.raw, nargs, nresults, 0) };
        self.status_result(status)
    }

    pub fn do_string(&self, source: &str) -> Result<(), LuaError> {
        self.load_string(source)?;
        self.pcall(0, ffi::LUA_MULTRET)
    }

    pub fn do_file(&self, path: &Path) -> Result<(), LuaError> {
        self.load_file(path)?;
        self.pcall(0, ffi::LUA_MULTRET)
    }

    fn status_result(&self, status: c_int) -> Result<(), LuaError> {
        if status == ffi::LUA_OK {
            return Ok(());
        }
        let message = if self.top() == 0 {
            NO_ERROR_ON_STACK.to_string()
        } else {
            let message = self
                .to_string(-1)
                .unwrap_or_else(|| ERROR_NOT_A_STRING.to_string());
            self.pop(1);
            message
        };
        Err(LuaError::from_status(status, message))
    }
}

// Raising operations, only ever run through `Stack::call_protected`.

unsafe extern "C-unwind" fn protected_get(l: *mut ffi::lua_State) -> c_int {
    ffi::lua_gettable(l, 1);
    1
}

unsafe extern "C-unwind" fn protected_set(l: *mut ffi::lua_State) -> c_int {
    ffi::lua_settable(l, 1);
    0
}

unsafe extern "C-unwind" fn protected_concat(l: *mut ffi::lua_State) -> c_int {
    ffi::lua_concat(l, ffi::lua_gettop(l));
    1
}

fn c_string(s: &str) -> Result<CString, LuaError> {
    CString::new(s).map_err(|_| LuaError::runtime(format!("embedded nul byte in {s:?}")))
}

/// # Safety
/// `l` must be live and `index` must hold a string.
pub(crate) unsafe fn raw_bytes(l: *mut ffi::lua_State, index: c_int) -> Option<Vec<u8>> {
    let mut len = 0usize;
    let data = ffi::lua_tolstring(l, index, &mut len);
    if data.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(data.cast::<u8>(), len).to_vec())
}

/// # Safety
/// Same as [`raw_bytes`].
pub(crate) unsafe fn raw_string(l: *mut ffi::lua_State, index: c_int) -> Option<String> {
    raw_bytes(l, index).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}
