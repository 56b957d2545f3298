//! A sleeping mutual-exclusion lock with an owner.

use core::fmt;
use core::mem;

use log::{debug, trace, warn};

use super::{claim, InterruptGuard, IrqCell, WaitQueue};
use crate::error::SyncError;
use crate::platform::Platform;
use crate::types::ThreadHandle;

struct LockState {
    /// `Some` exactly while the lock is held.
    owner: Option<ThreadHandle>,
    waiters: WaitQueue,
}

/// A non-recursive sleeping lock.
///
/// The lock does not guard data of its own; it is the kernel-style lock
/// that callers pair with whatever state they protect, and with
/// [`ConditionVariable`](super::ConditionVariable)s.
///
/// Acquiring a lock the caller already holds blocks forever. Releasing a lock
/// the caller does not hold does nothing.
pub struct Lock<P: Platform> {
    name: String,
    platform: P,
    state: IrqCell<LockState>,
}

impl<P: Platform> Lock<P> {
    pub fn new(platform: P, name: &str) -> Result<Self, SyncError> {
        let name = claim(&platform, "lock", name, mem::size_of::<Self>())?;
        trace!("lock `{}` created", name);
        Ok(Self {
            name,
            platform,
            state: IrqCell::new(LockState {
                owner: None,
                waiters: WaitQueue::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes the lock, sleeping while another thread holds it.
    pub fn acquire(&self) {
        kassert!(
            self.platform,
            !self.platform.in_interrupt(),
            "lock `{}`: acquire from interrupt handler",
            self.name
        );

        let irq = InterruptGuard::new(&self.platform);
        let me = self.platform.current_thread();
        loop {
            let mut state = self.state.lock(&irq);
            match state.owner {
                None => {
                    state.owner = Some(me);
                    trace!("lock `{}`: acquired by {}", self.name, me);
                    return;
                }
                Some(owner) if owner == me => {
                    warn!(
                        "lock `{}`: {} acquires a lock it already holds and will never wake",
                        self.name, me
                    );
                }
                Some(owner) => {
                    trace!("lock `{}`: {} waits for {}", self.name, me, owner);
                }
            }
            state.waiters.push(me);
            drop(state);
            irq.sleep();
        }
    }

    /// Gives the lock up and wakes every waiter.
    ///
    /// Called by any thread other than the owner this does nothing.
    pub fn release(&self) {
        kassert!(
            self.platform,
            !self.platform.in_interrupt(),
            "lock `{}`: release from interrupt handler",
            self.name
        );

        let irq = InterruptGuard::new(&self.platform);
        let me = self.platform.current_thread();
        let mut state = self.state.lock(&irq);
        if state.owner != Some(me) {
            debug!(
                "lock `{}`: release by {} ignored, owner is {:?}",
                self.name, me, state.owner
            );
            return;
        }
        state.owner = None;
        let woken = state.waiters.wake_all(&self.platform);
        trace!("lock `{}`: released by {}, woke {}", self.name, me, woken);
    }

    /// Whether the calling thread is the owner. Never sleeps.
    pub fn held_by_caller(&self) -> bool {
        let irq = InterruptGuard::new(&self.platform);
        let owner = self.state.lock(&irq).owner;
        owner == Some(self.platform.current_thread())
    }

    /// Whether any thread holds the lock.
    pub fn is_held(&self) -> bool {
        let irq = InterruptGuard::new(&self.platform);
        let held = self.state.lock(&irq).owner.is_some();
        held
    }

    pub fn owner(&self) -> Option<ThreadHandle> {
        let irq = InterruptGuard::new(&self.platform);
        let owner = self.state.lock(&irq).owner;
        owner
    }

    /// Acquires the lock and releases it when the guard drops.
    pub fn guard(&self) -> LockGuard<'_, P> {
        self.acquire();
        LockGuard { lock: self }
    }

    /// Destroys the lock. Same as dropping it.
    pub fn destroy(self) {
        trace!("lock `{}` destroyed", self.name);
    }
}

impl<P: Platform> Drop for Lock<P> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            if let Some(owner) = self.state.get_mut().owner {
                self.platform.fatal(format_args!(
                    "lock `{}` destroyed while held by {}",
                    self.name, owner
                ));
            }
        }
        self.platform
            .deallocate(mem::size_of::<Self>() + self.name.len());
    }
}

impl<P: Platform> fmt::Debug for Lock<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.name)
            .field("owner", &self.owner())
            .finish()
    }
}

/// RAII ownership of a [`Lock`].
#[must_use = "dropping the guard releases the lock immediately"]
pub struct LockGuard<'a, P: Platform> {
    lock: &'a Lock<P>,
}

impl<'a, P: Platform> LockGuard<'a, P> {
    pub fn lock(&self) -> &'a Lock<P> {
        self.lock
    }
}

impl<P: Platform> Drop for LockGuard<'_, P> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::Lock;
    use crate::error::SyncError;
    use crate::testing::MockPlatform;
    use crate::types::{IrqLevel, ThreadHandle};

    fn thread(id: u32) -> ThreadHandle {
        ThreadHandle::new(id).unwrap()
    }

    #[test]
    fn acquire_records_the_owner() {
        let platform = MockPlatform::new();
        let lock = Lock::new(platform.clone(), "lk").unwrap();
        assert!(!lock.is_held());
        assert!(!lock.held_by_caller());

        lock.acquire();
        assert!(lock.is_held());
        assert!(lock.held_by_caller());
        assert_eq!(lock.owner(), Some(platform.current()));

        lock.release();
        assert!(!lock.is_held());
        assert_eq!(lock.owner(), None);
        assert_eq!(platform.level(), IrqLevel::ZERO);
    }

    #[test]
    fn held_by_caller_is_per_thread() {
        let platform = MockPlatform::new();
        let lock = Lock::new(platform.clone(), "lk").unwrap();
        platform.set_current(thread(1));
        lock.acquire();

        platform.set_current(thread(2));
        assert!(!lock.held_by_caller());
        assert!(lock.is_held());

        platform.set_current(thread(1));
        assert!(lock.held_by_caller());
        lock.release();
    }

    #[test]
    fn release_by_non_owner_is_ignored() {
        let platform = MockPlatform::new();
        let lock = Lock::new(platform.clone(), "lk").unwrap();
        platform.set_current(thread(1));
        lock.acquire();

        platform.set_current(thread(2));
        lock.release();
        assert_eq!(lock.owner(), Some(thread(1)));
        assert_eq!(platform.level(), IrqLevel::ZERO);

        platform.set_current(thread(1));
        lock.release();
    }

    #[test]
    fn release_of_free_lock_is_ignored() {
        let platform = MockPlatform::new();
        let lock = Lock::new(platform.clone(), "lk").unwrap();
        lock.release();
        assert!(!lock.is_held());
        assert!(platform.woken().is_empty());
    }

    #[test]
    fn release_wakes_every_waiter() {
        let platform = MockPlatform::new();
        let mut lock = Lock::new(platform.clone(), "lk").unwrap();
        lock.state.get_mut().waiters.push(thread(5));
        lock.state.get_mut().waiters.push(thread(6));

        lock.acquire();
        lock.release();
        assert_eq!(platform.woken(), vec![thread(5), thread(6)]);
    }

    #[test]
    fn guard_releases_on_drop() {
        let platform = MockPlatform::new();
        let lock = Lock::new(platform, "lk").unwrap();
        {
            let guard = lock.guard();
            assert!(guard.lock().held_by_caller());
        }
        assert!(!lock.is_held());
    }

    #[test]
    #[should_panic(expected = "acquire from interrupt handler")]
    fn acquire_in_interrupt_is_fatal() {
        let platform = MockPlatform::new();
        let lock = Lock::new(platform.clone(), "lk").unwrap();
        platform.set_in_interrupt(true);
        lock.acquire();
    }

    #[test]
    fn held_by_caller_works_in_interrupt() {
        let platform = MockPlatform::new();
        let lock = Lock::new(platform.clone(), "lk").unwrap();
        lock.acquire();
        platform.set_in_interrupt(true);
        assert!(lock.held_by_caller());
        platform.set_in_interrupt(false);
        lock.release();
    }

    #[test]
    #[should_panic(expected = "destroyed while held")]
    fn destroying_held_lock_is_fatal() {
        let lock = Lock::new(MockPlatform::new(), "lk").unwrap();
        lock.acquire();
        lock.destroy();
    }

    #[test]
    fn creation_fails_cleanly_when_the_heap_is_full() {
        let platform = MockPlatform::with_heap(4);
        match Lock::new(platform.clone(), "lk") {
            Err(SyncError::OutOfMemory { kind, name, .. }) => {
                assert_eq!(kind, "lock");
                assert_eq!(name, "lk");
            }
            other => panic!("expected out of memory, got {:?}", other),
        }
        assert_eq!(platform.heap_used(), 0);

        // Room for the lock itself but not its name.
        let size = core::mem::size_of::<Lock<MockPlatform>>();
        let platform = MockPlatform::with_heap(size);
        assert!(Lock::new(platform.clone(), "lk").is_err());
        assert_eq!(platform.heap_used(), 0);

        let platform = MockPlatform::with_heap(size + 2);
        let lock = Lock::new(platform.clone(), "lk").unwrap();
        assert_eq!(platform.heap_used(), size + 2);
        drop(lock);
        assert_eq!(platform.heap_used(), 0);
    }
}
