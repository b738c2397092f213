//! A mutex scripts can share between threads.

use crate::error::SyncError;
use crate::object;
use crossbeam_channel::{bounded, Receiver, Sender};
use leap_lua::{HostFunction, LuaError, Stack};
use std::os::raw::c_int;
use std::sync::Arc;

/// A single-ticket lock.
///
/// Locking takes the ticket, blocking until it is available; unlocking
/// puts it back. Any thread may unlock, not only the one that locked.
#[derive(Debug)]
pub struct Mutex {
    ticket_tx: Sender<()>,
    ticket_rx: Receiver<()>,
}

impl Mutex {
    pub fn new() -> Self {
        let (ticket_tx, ticket_rx) = bounded(1);
        let _ = ticket_tx.send(());
        Self {
            ticket_tx,
            ticket_rx,
        }
    }

    pub fn lock(&self) {
        // Both channel ends live in `self`, so `recv` only returns once a
        // ticket is available.
        let _ = self.ticket_rx.recv();
    }

    pub fn try_lock(&self) -> bool {
        self.ticket_rx.try_recv().is_ok()
    }

    pub fn unlock(&self) -> Result<(), SyncError> {
        self.ticket_tx.try_send(()).map_err(|_| SyncError::NotLocked)
    }

    pub fn is_locked(&self) -> bool {
        self.ticket_rx.is_empty()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// `leap.Mutex()`
pub(crate) fn construct(stack: &Stack) -> Result<c_int, LuaError> {
    push(stack, Arc::new(Mutex::new()))?;
    Ok(1)
}

/// Push a script object for `mutex`.
pub(crate) fn push(stack: &Stack, mutex: Arc<Mutex>) -> Result<(), LuaError> {
    let lock = {
        let mutex = Arc::clone(&mutex);
        HostFunction::new(move |_| {
            mutex.lock();
            Ok(0)
        })
    };
    let unlock = {
        let mutex = Arc::clone(&mutex);
        HostFunction::new(move |_| {
            mutex.unlock()?;
            Ok(0)
        })
    };
    let try_lock = {
        let mutex = Arc::clone(&mutex);
        HostFunction::new(move |stack| {
            stack.push_boolean(mutex.try_lock());
            Ok(1)
        })
    };
    object::push_object(
        stack,
        "Mutex",
        Some(mutex),
        vec![("lock", lock), ("unlock", unlock), ("try_lock", try_lock)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn starts_unlocked() {
        let mutex = Mutex::new();
        assert!(!mutex.is_locked());
        assert!(mutex.try_lock());
        assert!(mutex.is_locked());
        assert!(!mutex.try_lock());
    }

    #[test]
    fn unlock_of_unlocked_mutex_fails() {
        let mutex = Mutex::new();
        assert_eq!(mutex.unlock(), Err(SyncError::NotLocked));
        mutex.lock();
        assert_eq!(mutex.unlock(), Ok(()));
        assert_eq!(mutex.unlock(), Err(SyncError::NotLocked));
    }

    #[test]
    fn lock_blocks_until_another_thread_unlocks() {
        let mutex = Arc::new(Mutex::new());
        mutex.lock();
        let other = Arc::clone(&mutex);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            other.unlock()
        });
        mutex.lock();
        assert!(mutex.is_locked());
        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn collecting_the_object_drops_every_reference() {
        let state = leap_lua::State::new().unwrap();
        state.open_libs();
        let mutex = Arc::new(Mutex::new());
        push(&state, Arc::clone(&mutex)).unwrap();
        state.set_global("m").unwrap();
        // registry handle plus one per method
        assert_eq!(Arc::strong_count(&mutex), 5);

        state
            .do_string("m:lock(); m:unlock(); m = nil; collectgarbage(); collectgarbage()")
            .unwrap();
        assert_eq!(Arc::strong_count(&mutex), 1);
    }
}
