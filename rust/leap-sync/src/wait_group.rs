//! A counter scripts can block on until it reaches zero.

use crate::error::SyncError;
use crate::object;
use leap_lua::{HostFunction, LuaError, Stack};
use std::os::raw::c_int;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct WaitGroup {
    count: Mutex<i64>,
    zero: Condvar,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjust the counter by `delta`, waking waiters when it reaches zero.
    ///
    /// A change that would make the counter negative is rejected and leaves
    /// it untouched.
    pub fn add(&self, delta: i64) -> Result<(), SyncError> {
        let mut count = self.lock();
        let next = count
            .checked_add(delta)
            .filter(|n| *n >= 0)
            .ok_or(SyncError::NegativeCounter)?;
        *count = next;
        if next == 0 {
            self.zero.notify_all();
        }
        Ok(())
    }

    pub fn done(&self) -> Result<(), SyncError> {
        self.add(-1)
    }

    /// Block until the counter is zero.
    pub fn wait(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = self
                .zero
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn count(&self) -> i64 {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, i64> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `leap.WaitGroup()`
pub(crate) fn construct(stack: &Stack) -> Result<c_int, LuaError> {
    push(stack, Arc::new(WaitGroup::new()))?;
    Ok(1)
}

/// Push a script object for `group`.
pub(crate) fn push(stack: &Stack, group: Arc<WaitGroup>) -> Result<(), LuaError> {
    let add = {
        let group = Arc::clone(&group);
        HostFunction::new(move |stack| {
            let position = object::first_arg(stack);
            let delta = if stack.is_none_or_nil(position) {
                1
            } else {
                stack.check_integer(position)?
            };
            group.add(delta)?;
            Ok(0)
        })
    };
    let done = {
        let group = Arc::clone(&group);
        HostFunction::new(move |_| {
            group.done()?;
            Ok(0)
        })
    };
    let wait = {
        let group = Arc::clone(&group);
        HostFunction::new(move |_| {
            group.wait();
            Ok(0)
        })
    };
    object::push_object(
        stack,
        "WaitGroup",
        Some(group),
        vec![("add", add), ("done", done), ("wait", wait)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn counter_cannot_go_negative() {
        let group = WaitGroup::new();
        assert_eq!(group.done(), Err(SyncError::NegativeCounter));
        group.add(2).unwrap();
        assert_eq!(group.add(-3), Err(SyncError::NegativeCounter));
        assert_eq!(group.count(), 2);
    }

    #[test]
    fn wait_returns_immediately_at_zero() {
        WaitGroup::new().wait();
    }

    #[test]
    fn wait_blocks_until_all_workers_are_done() {
        let group = Arc::new(WaitGroup::new());
        group.add(4).unwrap();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let group = Arc::clone(&group);
                thread::spawn(move || group.done())
            })
            .collect();
        group.wait();
        assert_eq!(group.count(), 0);
        for worker in workers {
            assert_eq!(worker.join().unwrap(), Ok(()));
        }
    }
}
