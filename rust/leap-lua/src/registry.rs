//! Process-wide registry of host values addressed by integer index.
//!
//! Host values never cross into the interpreter as pointers. A value is
//! added here, the interpreter only ever sees its [`RegistryIndex`], and the
//! index is turned back into the value when control returns to the host.

use mlua_sys as ffi;
use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

static GLOBAL: Lazy<ValueRegistry> = Lazy::new(ValueRegistry::new);

/// A nonzero handle naming one value in a [`ValueRegistry`].
///
/// At the interpreter boundary the index travels as a `lua_Integer`; use
/// [`RegistryIndex::to_lua`] and [`RegistryIndex::from_lua`] for the
/// conversion. Integers that are zero, negative, or above `u32::MAX` are not
/// indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryIndex(u32);

impl RegistryIndex {
    pub fn new(raw: u32) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub fn to_lua(self) -> ffi::lua_Integer {
        ffi::lua_Integer::from(self.0)
    }

    pub fn from_lua(raw: ffi::lua_Integer) -> Option<Self> {
        u32::try_from(raw).ok().and_then(Self::new)
    }
}

impl fmt::Display for RegistryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid index {0}: index does not exist")]
    Missing(u32),
    #[error("index {index} does not hold a {expected}")]
    WrongType { index: u32, expected: &'static str },
    #[error("registry exhausted: no indices left")]
    Exhausted,
}

type Entry = Arc<dyn Any + Send + Sync>;

struct Inner {
    values: HashMap<u32, Entry>,
    last: u32,
}

/// Thread-safe map from [`RegistryIndex`] to shared host values.
///
/// Indices start at 1 and only ever grow; a removed index is never handed
/// out again.
pub struct ValueRegistry {
    inner: Mutex<Inner>,
}

impl ValueRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                values: HashMap::new(),
                last: 0,
            }),
        }
    }

    /// The registry shared by every interpreter in the process.
    pub fn global() -> &'static ValueRegistry {
        &GLOBAL
    }

    pub fn add<T: Any + Send + Sync>(&self, value: T) -> Result<RegistryIndex, RegistryError> {
        self.add_arc(Arc::new(value))
    }

    /// Register an already shared value. The registry keeps one clone.
    pub fn add_arc<T: Any + Send + Sync>(
        &self,
        value: Arc<T>,
    ) -> Result<RegistryIndex, RegistryError> {
        let mut inner = self.lock();
        let next = inner.last.checked_add(1).ok_or(RegistryError::Exhausted)?;
        inner.last = next;
        inner.values.insert(next, value);
        Ok(RegistryIndex(next))
    }

    pub fn get<T: Any + Send + Sync>(&self, index: RegistryIndex) -> Result<Arc<T>, RegistryError> {
        let entry = self
            .lock()
            .values
            .get(&index.0)
            .cloned()
            .ok_or(RegistryError::Missing(index.0))?;
        entry.downcast::<T>().map_err(|_| RegistryError::WrongType {
            index: index.0,
            expected: std::any::type_name::<T>(),
        })
    }

    pub fn remove(&self, index: RegistryIndex) -> Result<(), RegistryError> {
        match self.lock().values.remove(&index.0) {
            Some(_) => {
                tracing::trace!(index = index.0, "registry entry released");
                Ok(())
            }
            None => Err(RegistryError::Missing(index.0)),
        }
    }

    pub fn contains(&self, index: RegistryIndex) -> bool {
        self.lock().values.contains_key(&index.0)
    }

    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ValueRegistry {
    fn default() -> Self {
        Self::new()
    }
}
