//! A counting semaphore.

use core::fmt;
use core::mem;

use log::trace;

use super::{claim, InterruptGuard, IrqCell, WaitQueue};
use crate::error::SyncError;
use crate::platform::Platform;

struct SemState {
    count: usize,
    waiters: WaitQueue,
}

/// A counting semaphore.
///
/// `release` wakes every waiter and lets them race for the count under masked
/// interrupts; the losers go back to sleep. Waiters therefore always re-check
/// the count after waking up.
pub struct Semaphore<P: Platform> {
    name: String,
    platform: P,
    state: IrqCell<SemState>,
}

impl<P: Platform> Semaphore<P> {
    /// Creates a semaphore holding `initial_count` units.
    ///
    /// A negative count is a kernel bug and halts through
    /// [`Platform::fatal`]. Running out of kernel heap is reported as
    /// [`SyncError::OutOfMemory`].
    pub fn new(platform: P, name: &str, initial_count: isize) -> Result<Self, SyncError> {
        kassert!(
            platform,
            initial_count >= 0,
            "semaphore `{}` created with negative count {}",
            name,
            initial_count
        );
        let name = claim(&platform, "semaphore", name, mem::size_of::<Self>())?;
        trace!("semaphore `{}` created with count {}", name, initial_count);
        Ok(Self {
            name,
            platform,
            state: IrqCell::new(SemState {
                count: initial_count as usize,
                waiters: WaitQueue::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes one unit, sleeping until one is available (P).
    ///
    /// Halts if called from an interrupt handler, even when a unit is free.
    pub fn acquire(&self) {
        kassert!(
            self.platform,
            !self.platform.in_interrupt(),
            "semaphore `{}`: acquire from interrupt handler",
            self.name
        );

        let irq = InterruptGuard::new(&self.platform);
        loop {
            let mut state = self.state.lock(&irq);
            if state.count > 0 {
                state.count -= 1;
                trace!("semaphore `{}`: acquired, count {}", self.name, state.count);
                return;
            }
            let me = self.platform.current_thread();
            trace!("semaphore `{}`: {} waits", self.name, me);
            state.waiters.push(me);
            drop(state);
            irq.sleep();
        }
    }

    /// Returns one unit and wakes every waiter (V).
    pub fn release(&self) {
        let irq = InterruptGuard::new(&self.platform);
        let mut state = self.state.lock(&irq);
        let Some(count) = state.count.checked_add(1) else {
            self.platform
                .fatal(format_args!("semaphore `{}`: count overflow", self.name));
        };
        state.count = count;
        let woken = state.waiters.wake_all(&self.platform);
        trace!(
            "semaphore `{}`: released, count {}, woke {}",
            self.name,
            state.count,
            woken
        );
    }

    /// Acquires a unit that is given back when the guard drops.
    pub fn acquire_guard(&self) -> SemaphoreGuard<'_, P> {
        self.acquire();
        SemaphoreGuard { sem: self }
    }

    /// Units currently available.
    pub fn count(&self) -> usize {
        let irq = InterruptGuard::new(&self.platform);
        let count = self.state.lock(&irq).count;
        count
    }

    pub fn has_waiters(&self) -> bool {
        let irq = InterruptGuard::new(&self.platform);
        let waiting = !self.state.lock(&irq).waiters.is_empty();
        waiting
    }

    /// Destroys the semaphore. Same as dropping it.
    pub fn destroy(self) {
        trace!("semaphore `{}` destroyed", self.name);
    }
}

impl<P: Platform> Drop for Semaphore<P> {
    fn drop(&mut self) {
        let waiting = self.state.get_mut().waiters.len();
        if waiting != 0 && !std::thread::panicking() {
            self.platform.fatal(format_args!(
                "semaphore `{}` destroyed with {} waiting threads",
                self.name, waiting
            ));
        }
        self.platform
            .deallocate(mem::size_of::<Self>() + self.name.len());
    }
}

impl<P: Platform> fmt::Debug for Semaphore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("name", &self.name)
            .field("count", &self.count())
            .finish()
    }
}

/// RAII unit of a [`Semaphore`].
#[must_use = "dropping the guard releases the unit immediately"]
pub struct SemaphoreGuard<'a, P: Platform> {
    sem: &'a Semaphore<P>,
}

impl<P: Platform> Drop for SemaphoreGuard<'_, P> {
    fn drop(&mut self) {
        self.sem.release();
    }
}
