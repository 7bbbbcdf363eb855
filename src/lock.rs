//! Process-wide reader/writer lock with per-thread holder tracking.
//!
//! The lock itself is a raw `parking_lot` rwlock; a holder table records what
//! each thread currently holds so that recursive acquisition and bad upgrades
//! are refused instead of deadlocking.

use std::{
    collections::HashMap,
    fmt,
    marker::PhantomData,
    rc::Rc,
    thread::{self, ThreadId},
};

use parking_lot::{
    Mutex,
    RawRwLock,
    lock_api::{RawRwLock as RawRwLockApi, RawRwLockRecursive},
};

use crate::{
    client::ThreadClient,
    error::{ClientError, Result},
};

/// What the calling thread holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    /// Shared hold with its recursion depth.
    Shared(u32),
    Exclusive,
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        !matches!(self, LockState::Unlocked)
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Unlocked => f.write_str("unlocked"),
            LockState::Shared(depth) => write!(f, "shared({depth})"),
            LockState::Exclusive => f.write_str("exclusive"),
        }
    }
}

pub struct DbLock {
    raw: RawRwLock,
    holders: Mutex<HashMap<ThreadId, LockState>>,
}

impl Default for DbLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DbLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbLock")
            .field("holders", &self.holders.lock().len())
            .finish()
    }
}

impl DbLock {
    pub fn new() -> Self {
        Self {
            raw: <RawRwLock as RawRwLockApi>::INIT,
            holders: Mutex::new(HashMap::new()),
        }
    }

    /// State of the lock as seen by the calling thread.
    pub fn current_state(&self) -> LockState {
        self.holders
            .lock()
            .get(&thread::current().id())
            .copied()
            .unwrap_or(LockState::Unlocked)
    }

    fn set_state(&self, state: LockState) {
        let id = thread::current().id();
        let mut holders = self.holders.lock();
        match state {
            LockState::Unlocked => {
                holders.remove(&id);
            }
            held => {
                holders.insert(id, held);
            }
        }
    }

    pub fn acquire_shared(&self) -> Result<()> {
        match self.current_state() {
            LockState::Unlocked => {
                self.raw.lock_shared();
                self.set_state(LockState::Shared(1));
            }
            LockState::Shared(depth) => {
                // a plain lock_shared here would queue behind a waiting writer
                self.raw.lock_shared_recursive();
                self.set_state(LockState::Shared(depth + 1));
            }
            LockState::Exclusive => return Err(ClientError::RecursiveLock(LockState::Exclusive)),
        }
        Ok(())
    }

    pub fn acquire_exclusive(&self) -> Result<()> {
        match self.current_state() {
            LockState::Unlocked => {
                self.raw.lock_exclusive();
                self.set_state(LockState::Exclusive);
                Ok(())
            }
            held => Err(ClientError::RecursiveLock(held)),
        }
    }

    pub fn release_shared(&self) -> Result<()> {
        match self.current_state() {
            LockState::Shared(depth) => {
                // SAFETY: the holder table shows this thread owns a shared hold.
                unsafe { self.raw.unlock_shared() };
                self.set_state(if depth > 1 {
                    LockState::Shared(depth - 1)
                } else {
                    LockState::Unlocked
                });
                Ok(())
            }
            found => Err(ClientError::NotHeld {
                wanted: "shared",
                found,
            }),
        }
    }

    pub fn release_exclusive(&self) -> Result<()> {
        match self.current_state() {
            LockState::Exclusive => {
                // SAFETY: the holder table shows this thread owns the exclusive hold.
                unsafe { self.raw.unlock_exclusive() };
                self.set_state(LockState::Unlocked);
                Ok(())
            }
            found => Err(ClientError::NotHeld {
                wanted: "exclusive",
                found,
            }),
        }
    }

    /// Trade a single shared hold for the exclusive hold.
    ///
    /// This unlocks and relocks; it is not an atomic upgrade. Anything
    /// resolved under the shared hold may be gone by the time this returns,
    /// so every context bound on `client` must be suspended beforehand.
    /// If one is found still bound after the exclusive acquire, the hold is
    /// kept and `UnvalidatedContext` is returned.
    pub fn upgrade_to_exclusive(&self, client: &ThreadClient) -> Result<()> {
        let state = self.current_state();
        if state != LockState::Shared(1) {
            log::error!("error: releaseAndWriteLock() s == {state}");
            return Err(ClientError::RecursiveUpgrade(state));
        }

        self.release_shared()?;
        self.acquire_exclusive()?;

        if let Some(ns) = client.unvalidated_context() {
            log::error!("context for {ns} still bound after releaseAndWriteLock");
            return Err(ClientError::UnvalidatedContext(ns));
        }
        Ok(())
    }

    pub fn read(&self) -> Result<LockGuard<'_>> {
        self.acquire_shared()?;
        Ok(LockGuard::new(self, LockMode::Shared))
    }

    pub fn write(&self) -> Result<LockGuard<'_>> {
        self.acquire_exclusive()?;
        Ok(LockGuard::new(self, LockMode::Exclusive))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Scoped hold on a [`DbLock`]; released on drop by the acquiring thread.
pub struct LockGuard<'a> {
    lock: &'a DbLock,
    mode: LockMode,
    _local: PhantomData<Rc<()>>,
}

impl<'a> LockGuard<'a> {
    fn new(lock: &'a DbLock, mode: LockMode) -> Self {
        Self {
            lock,
            mode,
            _local: PhantomData,
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Unlocks and takes the write lock. Does not upgrade atomically.
    /// Calling this on a write guard is refused like any other bad upgrade.
    pub fn release_and_write_lock(&mut self, client: &ThreadClient) -> Result<()> {
        let res = self.lock.upgrade_to_exclusive(client);
        if self.lock.current_state() == LockState::Exclusive {
            self.mode = LockMode::Exclusive;
        }
        res
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let res = match self.mode {
            LockMode::Shared => self.lock.release_shared(),
            LockMode::Exclusive => self.lock.release_exclusive(),
        };
        if let Err(e) = res {
            log::error!("lock guard release failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::{ServerState, config::Config};

    fn client() -> (ServerState, ThreadClient) {
        let server = ServerState::new(Config::in_memory());
        let client = ThreadClient::new("lock-test", &server);
        (server, client)
    }

    #[test]
    fn shared_is_recursive() {
        let lock = DbLock::new();
        lock.acquire_shared().unwrap();
        lock.acquire_shared().unwrap();
        assert_eq!(lock.current_state(), LockState::Shared(2));
        lock.release_shared().unwrap();
        lock.release_shared().unwrap();
        assert_eq!(lock.current_state(), LockState::Unlocked);
    }

    #[test]
    fn exclusive_refuses_recursion() {
        let lock = DbLock::new();
        lock.acquire_exclusive().unwrap();
        assert!(matches!(
            lock.acquire_exclusive(),
            Err(ClientError::RecursiveLock(LockState::Exclusive))
        ));
        assert!(matches!(
            lock.acquire_shared(),
            Err(ClientError::RecursiveLock(LockState::Exclusive))
        ));
        lock.release_exclusive().unwrap();
    }

    #[test]
    fn release_without_hold_is_fatal() {
        let lock = DbLock::new();
        let err = lock.release_shared().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            lock.release_exclusive(),
            Err(ClientError::NotHeld {
                wanted: "exclusive",
                found: LockState::Unlocked
            })
        ));
    }

    #[test]
    fn upgrade_from_single_shared() {
        let (_server, client) = client();
        let lock = DbLock::new();
        lock.acquire_shared().unwrap();
        lock.upgrade_to_exclusive(&client).unwrap();
        assert_eq!(lock.current_state(), LockState::Exclusive);
        lock.release_exclusive().unwrap();
    }

    #[test]
    fn upgrade_while_exclusive_is_rejected() {
        let (_server, client) = client();
        let lock = DbLock::new();
        lock.acquire_exclusive().unwrap();
        let err = lock.upgrade_to_exclusive(&client).unwrap_err();
        assert!(matches!(err, ClientError::RecursiveUpgrade(LockState::Exclusive)));
        assert!(err.is_fatal());
        // still held, not silently changed
        assert_eq!(lock.current_state(), LockState::Exclusive);
        lock.release_exclusive().unwrap();
    }

    #[test]
    fn upgrade_with_recursive_shared_is_rejected() {
        let (_server, client) = client();
        let lock = DbLock::new();
        lock.acquire_shared().unwrap();
        lock.acquire_shared().unwrap();
        assert!(matches!(
            lock.upgrade_to_exclusive(&client),
            Err(ClientError::RecursiveUpgrade(LockState::Shared(2)))
        ));
        assert_eq!(lock.current_state(), LockState::Shared(2));
        lock.release_shared().unwrap();
        lock.release_shared().unwrap();
    }

    #[test]
    fn upgrade_unlocked_is_rejected() {
        let (_server, client) = client();
        let lock = DbLock::new();
        assert!(matches!(
            lock.upgrade_to_exclusive(&client),
            Err(ClientError::RecursiveUpgrade(LockState::Unlocked))
        ));
    }

    #[test]
    fn guard_upgrade_and_release() {
        let (_server, client) = client();
        let lock = DbLock::new();
        {
            let mut guard = lock.read().unwrap();
            assert_eq!(guard.mode(), LockMode::Shared);
            guard.release_and_write_lock(&client).unwrap();
            assert_eq!(guard.mode(), LockMode::Exclusive);
        }
        assert_eq!(lock.current_state(), LockState::Unlocked);
    }

    #[test]
    fn guard_upgrade_on_write_guard_is_rejected() {
        let (_server, client) = client();
        let lock = DbLock::new();
        {
            let mut guard = lock.write().unwrap();
            let err = guard.release_and_write_lock(&client).unwrap_err();
            assert!(matches!(err, ClientError::RecursiveUpgrade(LockState::Exclusive)));
            assert_eq!(err.code(), Some(12600));
            assert_eq!(guard.mode(), LockMode::Exclusive);
        }
        assert_eq!(lock.current_state(), LockState::Unlocked);
    }

    #[test]
    fn exclusive_waits_for_readers() {
        let lock = Arc::new(DbLock::new());
        let acquired = Arc::new(AtomicBool::new(false));

        lock.acquire_shared().unwrap();

        let writer = {
            let lock = lock.clone();
            let acquired = acquired.clone();
            std::thread::spawn(move || {
                let _guard = lock.write().unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        // recursive shared must not queue behind the waiting writer
        lock.acquire_shared().unwrap();
        lock.release_shared().unwrap();

        lock.release_shared().unwrap();
        writer.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(lock.current_state(), LockState::Unlocked);
    }
}
