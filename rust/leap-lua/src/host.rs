//! Host-side values the bridge resolves indices to.

use crate::error::LuaError;
use crate::registry::RegistryIndex;
use crate::stack::Stack;
use std::collections::HashSet;
use std::fmt;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Signature of a host function callable from scripts.
///
/// Arguments are on the stack at indices `1..=stack.top()`. The function
/// pushes its results and returns how many it pushed. Returning `Err` raises
/// an interpreter error that scripts can catch with `pcall`.
pub type HostFn = dyn Fn(&Stack) -> Result<c_int, LuaError> + Send + Sync;

/// A boxed host function stored in the registry under a function index.
pub struct HostFunction {
    func: Box<HostFn>,
}

impl HostFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Stack) -> Result<c_int, LuaError> + Send + Sync + 'static,
    {
        Self { func: Box::new(f) }
    }

    pub fn call(&self, stack: &Stack) -> Result<c_int, LuaError> {
        (self.func)(stack)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction(..)")
    }
}

/// Per-interpreter record, registered under the state index.
#[derive(Debug)]
pub struct Instance {
    label: String,
    calls: AtomicU64,
    faults: AtomicU64,
    last_fault: Mutex<Option<String>>,
    functions: Mutex<HashSet<RegistryIndex>>,
}

impl Instance {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            calls: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            last_fault: Mutex::new(None),
            functions: Mutex::new(HashSet::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of host function calls dispatched for this interpreter.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Number of times the fatal handler fired for this interpreter.
    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    pub fn last_fault(&self) -> Option<String> {
        lock(&self.last_fault).clone()
    }

    /// Number of function indices registered through this interpreter.
    pub fn function_count(&self) -> usize {
        lock(&self.functions).len()
    }

    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self, message: &str) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_fault) = Some(message.to_string());
    }

    pub(crate) fn track(&self, index: RegistryIndex) {
        lock(&self.functions).insert(index);
    }

    pub(crate) fn untrack(&self, indices: &[RegistryIndex]) {
        let mut functions = lock(&self.functions);
        for index in indices {
            functions.remove(index);
        }
    }

    pub(crate) fn take_functions(&self) -> Vec<RegistryIndex> {
        lock(&self.functions).drain().collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_counts_faults_and_keeps_last_message() {
        let instance = Instance::new("test");
        assert_eq!(instance.fault_count(), 0);
        assert_eq!(instance.last_fault(), None);
        instance.record_fault("first");
        instance.record_fault("second");
        assert_eq!(instance.fault_count(), 2);
        assert_eq!(instance.last_fault().as_deref(), Some("second"));
    }

    #[test]
    fn instance_tracks_functions_until_taken() {
        let instance = Instance::new("test");
        instance.track(RegistryIndex::new(4).unwrap());
        instance.track(RegistryIndex::new(5).unwrap());
        assert_eq!(instance.function_count(), 2);
        let taken = instance.take_functions();
        assert_eq!(taken.len(), 2);
        assert_eq!(instance.function_count(), 0);
    }

    #[test]
    fn untracked_functions_are_not_taken() {
        let instance = Instance::new("test");
        let kept = RegistryIndex::new(8).unwrap();
        let released = RegistryIndex::new(9).unwrap();
        instance.track(kept);
        instance.track(released);
        instance.untrack(&[released]);
        assert_eq!(instance.take_functions(), vec![kept]);
    }
}
