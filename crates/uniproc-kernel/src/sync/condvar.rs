//! Condition variables for the monitor pattern.

use core::fmt;
use core::mem;

use log::trace;

use super::{claim, InterruptGuard, IrqCell, Lock, WaitQueue};
use crate::error::SyncError;
use crate::platform::Platform;

/// A condition variable.
///
/// It keeps no predicate of its own. The caller holds a [`Lock`] protecting
/// the predicate across `wait`, `signal` and `broadcast`, and re-tests the
/// predicate whenever `wait` returns:
///
/// ```ignore
/// lock.acquire();
/// while !ready() {
///     cv.wait(&lock);
/// }
/// lock.release();
/// ```
pub struct ConditionVariable<P: Platform> {
    name: String,
    platform: P,
    waiters: IrqCell<WaitQueue>,
}

impl<P: Platform> ConditionVariable<P> {
    pub fn new(platform: P, name: &str) -> Result<Self, SyncError> {
        let name = claim(
            &platform,
            "condition variable",
            name,
            mem::size_of::<Self>(),
        )?;
        trace!("cv `{}` created", name);
        Ok(Self {
            name,
            platform,
            waiters: IrqCell::new(WaitQueue::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Releases `lock`, sleeps until signalled, and takes `lock` again.
    ///
    /// Releasing and going to sleep happen with interrupts masked, so a signal
    /// sent after the lock is dropped cannot slip past this thread.
    pub fn wait(&self, lock: &Lock<P>) {
        self.check_caller("wait", lock);

        let irq = InterruptGuard::new(&self.platform);
        lock.release();
        let me = self.platform.current_thread();
        trace!(
            "cv `{}`: {} waits, released `{}`",
            self.name,
            me,
            lock.name()
        );
        self.waiters.lock(&irq).push(me);
        irq.sleep();
        lock.acquire();
        trace!("cv `{}`: {} resumed", self.name, me);
    }

    /// Wakes the longest waiting thread, if any. `lock` stays held.
    pub fn signal(&self, lock: &Lock<P>) {
        self.check_caller("signal", lock);

        let irq = InterruptGuard::new(&self.platform);
        let woken = self.waiters.lock(&irq).wake_one(&self.platform);
        trace!("cv `{}`: signal woke {:?}", self.name, woken);
    }

    /// Wakes every waiting thread. `lock` stays held.
    pub fn broadcast(&self, lock: &Lock<P>) {
        self.check_caller("broadcast", lock);

        let irq = InterruptGuard::new(&self.platform);
        let woken = self.waiters.lock(&irq).wake_all(&self.platform);
        trace!("cv `{}`: broadcast woke {}", self.name, woken);
    }

    pub fn has_waiters(&self) -> bool {
        let irq = InterruptGuard::new(&self.platform);
        let waiting = !self.waiters.lock(&irq).is_empty();
        waiting
    }

    /// Destroys the condition variable. Same as dropping it.
    pub fn destroy(self) {
        trace!("cv `{}` destroyed", self.name);
    }

    fn check_caller(&self, op: &str, lock: &Lock<P>) {
        kassert!(
            self.platform,
            !self.platform.in_interrupt(),
            "cv `{}`: {} from interrupt handler",
            self.name,
            op
        );
        kassert!(
            self.platform,
            lock.held_by_caller(),
            "cv `{}`: {} without holding lock `{}`",
            self.name,
            op,
            lock.name()
        );
    }
}

impl<P: Platform> Drop for ConditionVariable<P> {
    fn drop(&mut self) {
        let waiting = self.waiters.get_mut().len();
        if waiting != 0 && !std::thread::panicking() {
            self.platform.fatal(format_args!(
                "cv `{}` destroyed with {} waiting threads",
                self.name, waiting
            ));
        }
        self.platform
            .deallocate(mem::size_of::<Self>() + self.name.len());
    }
}

impl<P: Platform> fmt::Debug for ConditionVariable<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionVariable")
            .field("name", &self.name)
            .field("has_waiters", &self.has_waiters())
            .finish()
    }
}
