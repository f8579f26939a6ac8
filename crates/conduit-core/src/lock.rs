//! Ownership-tracked mutual exclusion.
//!
//! [`OwnedLock`] behaves like a plain mutex but records which thread currently
//! holds it and which threads are blocked waiting for it. The guard returned by
//! [`lock()`](OwnedLock::lock) doubles as a proof token: every mutating
//! operation in this crate is a method on a guard, so "the calling thread owns
//! this object's lock" is enforced by the type system instead of an assertion
//! at the top of each method.
//!
//! The runtime bookkeeping is still there as a backstop and for diagnostics:
//!
//! - [`owner()`](OwnedLock::owner) reports the holding thread.
//! - [`waiters()`](OwnedLock::waiters) lists threads blocked in `lock()`.
//! - Releasing from a thread other than the recorded owner, or locking again
//!   from the owning thread, is a fatal programming error and panics with a
//!   [`LockOwnershipError`] message. Nothing in this crate recovers from it.
//!
//! # Condition variables
//!
//! [`OwnedGuard::wait`] and [`OwnedGuard::wait_until`] release the lock while
//! blocked and clear the recorded owner for the duration, so other threads may
//! acquire the lock and the ownership record stays truthful.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};
use std::time::Instant;

/// A violation of the lock ownership discipline.
///
/// Never returned to callers: the lock panics with this value's `Display`
/// text, because every invariant in the graph depends on ownership holding
/// unconditionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOwnershipError {
    /// A thread released a lock it does not own.
    ForeignRelease {
        /// Recorded owner at release time.
        owner: Option<ThreadId>,
        /// Thread that attempted the release.
        thread: ThreadId,
    },
    /// The owning thread tried to acquire the lock a second time.
    Reentrant {
        /// Thread that already owns the lock.
        thread: ThreadId,
    },
}

impl fmt::Display for LockOwnershipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForeignRelease { owner, thread } => write!(
                f,
                "lock ownership violated: {thread:?} released a lock owned by {owner:?}"
            ),
            Self::Reentrant { thread } => write!(
                f,
                "lock ownership violated: re-entrant lock by owning thread {thread:?}"
            ),
        }
    }
}

impl std::error::Error for LockOwnershipError {}

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    waiters: Vec<ThreadId>,
}

/// Mutual exclusion lock that knows which thread holds it.
pub struct OwnedLock<T> {
    data: Mutex<T>,
    ownership: Mutex<Ownership>,
}

impl<T> OwnedLock<T> {
    /// Creates an unlocked lock protecting `value`.
    pub fn new(value: T) -> Self {
        Self {
            data: Mutex::new(value),
            ownership: Mutex::new(Ownership::default()),
        }
    }

    /// Blocks until the lock is available, then records the caller as owner.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already owns the lock.
    pub fn lock(&self) -> OwnedGuard<'_, T> {
        let me = thread::current().id();
        {
            let mut ownership = self.ownership.lock();
            if ownership.owner == Some(me) {
                drop(ownership);
                panic!("{}", LockOwnershipError::Reentrant { thread: me });
            }
            ownership.waiters.push(me);
        }

        let inner = self.data.lock();

        let mut ownership = self.ownership.lock();
        if let Some(pos) = ownership.waiters.iter().position(|t| *t == me) {
            ownership.waiters.swap_remove(pos);
        }
        ownership.owner = Some(me);
        drop(ownership);

        OwnedGuard { lock: self, inner }
    }

    /// Acquires the lock without blocking.
    ///
    /// Returns `None` if any thread (including the caller) holds it.
    pub fn try_lock(&self) -> Option<OwnedGuard<'_, T>> {
        let inner = self.data.try_lock()?;
        self.ownership.lock().owner = Some(thread::current().id());
        Some(OwnedGuard { lock: self, inner })
    }

    /// Returns true if no thread holds the lock right now.
    pub fn is_available(&self) -> bool {
        !self.data.is_locked()
    }

    /// Returns the thread currently recorded as owner.
    pub fn owner(&self) -> Option<ThreadId> {
        self.ownership.lock().owner
    }

    /// Returns true if the calling thread owns the lock.
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner() == Some(thread::current().id())
    }

    /// Threads currently blocked in [`lock()`](Self::lock).
    pub fn waiters(&self) -> Vec<ThreadId> {
        self.ownership.lock().waiters.clone()
    }

    fn release_ownership(&self) {
        let me = thread::current().id();
        let mut ownership = self.ownership.lock();
        if ownership.owner != Some(me) {
            let owner = ownership.owner;
            drop(ownership);
            panic!(
                "{}",
                LockOwnershipError::ForeignRelease { owner, thread: me }
            );
        }
        ownership.owner = None;
    }

    fn claim_ownership(&self) {
        self.ownership.lock().owner = Some(thread::current().id());
    }
}

impl<T: Default> Default for OwnedLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for OwnedLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ownership = self.ownership.lock();
        f.debug_struct("OwnedLock")
            .field("owner", &ownership.owner)
            .field("waiters", &ownership.waiters.len())
            .finish_non_exhaustive()
    }
}

/// Proof that the current thread owns an [`OwnedLock`].
///
/// Not `Send`: a guard is released on the thread that acquired it.
pub struct OwnedGuard<'a, T> {
    lock: &'a OwnedLock<T>,
    inner: MutexGuard<'a, T>,
}

impl<'a, T> OwnedGuard<'a, T> {
    /// The lock this guard was taken from.
    pub fn lock(&self) -> &'a OwnedLock<T> {
        self.lock
    }

    /// Releases the lock. Equivalent to dropping the guard.
    pub fn unlock(self) {
        drop(self);
    }

    /// Blocks on `condvar`, releasing the lock until woken.
    pub fn wait(&mut self, condvar: &Condvar) {
        self.lock.release_ownership();
        condvar.wait(&mut self.inner);
        self.lock.claim_ownership();
    }

    /// Blocks on `condvar` until woken or `deadline` passes.
    ///
    /// Returns true if the deadline expired.
    pub fn wait_until(&mut self, condvar: &Condvar, deadline: Instant) -> bool {
        self.lock.release_ownership();
        let result = condvar.wait_until(&mut self.inner, deadline);
        self.lock.claim_ownership();
        result.timed_out()
    }
}

impl<T> Deref for OwnedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for OwnedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for OwnedGuard<'_, T> {
    fn drop(&mut self) {
        // Ownership is cleared before `inner` unlocks the data mutex.
        self.lock.release_ownership();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier, mpsc};
    use std::time::Duration;

    #[test]
    fn lock_records_owner() {
        let lock = OwnedLock::new(0u32);
        assert!(lock.is_available());
        assert_eq!(lock.owner(), None);

        let mut guard = lock.lock();
        *guard += 1;
        assert!(!lock.is_available());
        assert!(lock.is_owned_by_current_thread());
        assert_eq!(lock.owner(), Some(thread::current().id()));

        guard.unlock();
        assert!(lock.is_available());
        assert_eq!(lock.owner(), None);
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held_elsewhere() {
        let lock = Arc::new(OwnedLock::new(()));
        let held = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let handle = {
            let (lock, held, release) = (lock.clone(), held.clone(), release.clone());
            thread::spawn(move || {
                let _guard = lock.lock();
                held.wait();
                release.wait();
            })
        };

        held.wait();
        assert!(lock.try_lock().is_none());
        assert_ne!(lock.owner(), Some(thread::current().id()));
        release.wait();
        handle.join().unwrap();

        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn blocked_threads_are_listed_as_waiters() {
        let lock = Arc::new(OwnedLock::new(0u32));
        let guard = lock.lock();

        let (tx, rx) = mpsc::channel();
        let handle = {
            let lock = lock.clone();
            thread::spawn(move || {
                tx.send(thread::current().id()).unwrap();
                *lock.lock() += 1;
            })
        };
        let waiter = rx.recv().unwrap();

        while lock.waiters().is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(lock.waiters(), vec![waiter]);

        drop(guard);
        handle.join().unwrap();
        assert!(lock.waiters().is_empty());
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    #[should_panic(expected = "re-entrant lock")]
    fn relocking_from_owner_is_fatal() {
        let lock = OwnedLock::new(());
        let _first = lock.lock();
        let _second = lock.lock();
    }

    #[test]
    fn wait_releases_the_lock() {
        // (waiting, released)
        let lock = Arc::new(OwnedLock::new((false, false)));
        let condvar = Arc::new(Condvar::new());

        let handle = {
            let (lock, condvar) = (lock.clone(), condvar.clone());
            thread::spawn(move || {
                let mut guard = lock.lock();
                guard.0 = true;
                while !guard.1 {
                    guard.wait(&condvar);
                }
                assert!(lock.is_owned_by_current_thread());
            })
        };

        loop {
            let mut guard = lock.lock();
            if guard.0 {
                assert!(lock.is_owned_by_current_thread());
                guard.1 = true;
                condvar.notify_all();
                break;
            }
            drop(guard);
            thread::sleep(Duration::from_millis(1));
        }
        handle.join().unwrap();
    }

    #[test]
    fn wait_until_reports_timeout() {
        let lock = OwnedLock::new(());
        let condvar = Condvar::new();
        let mut guard = lock.lock();
        let timed_out = guard.wait_until(&condvar, Instant::now() + Duration::from_millis(5));
        assert!(timed_out);
        assert!(lock.is_owned_by_current_thread());
    }

    #[test]
    fn ownership_error_messages_name_the_threads() {
        let me = thread::current().id();
        let msg = LockOwnershipError::ForeignRelease {
            owner: None,
            thread: me,
        }
        .to_string();
        assert!(msg.contains("released a lock"), "got: {msg}");
    }
}
