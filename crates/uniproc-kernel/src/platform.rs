//! The contract the primitives need from the rest of the kernel.

use core::fmt;

use crate::error::AllocError;
use crate::types::{IrqLevel, ThreadHandle};

/// Scheduler, interrupt controller and allocator as seen by the primitives.
///
/// A `Platform` is a cheap handle (typically an `Arc` inside) that every
/// primitive keeps a clone of, so no primitive reaches for global state.
///
/// Implementations run on a single logical processor: between a
/// [`raise_to_max`](Platform::raise_to_max) and the matching
/// [`restore`](Platform::restore) no other kernel code may run on the caller's
/// behalf except through [`block_current`](Platform::block_current).
pub trait Platform: Clone + Send + Sync + 'static {
    /// Identity of the thread executing kernel code right now.
    ///
    /// Inside an interrupt handler this is the interrupted thread.
    fn current_thread(&self) -> ThreadHandle;

    /// Whether an interrupt handler is executing.
    fn in_interrupt(&self) -> bool;

    fn interrupt_level(&self) -> IrqLevel;

    /// Masks all interrupts and returns the level that was in effect.
    fn raise_to_max(&self) -> IrqLevel;

    /// Returns to a level previously handed out by `raise_to_max`.
    fn restore(&self, level: IrqLevel);

    /// Switches away from the current thread until [`wakeup`](Platform::wakeup)
    /// is called for it and the scheduler picks it again.
    ///
    /// The caller holds the interrupt level at `HIGH` and has already recorded
    /// itself on a wait queue. The elevated level is released for the duration
    /// of the switch and is back at `HIGH` when this returns.
    fn block_current(&self);

    /// Moves a blocked thread to the ready queue. Never switches.
    fn wakeup(&self, thread: ThreadHandle);

    fn allocate(&self, bytes: usize) -> Result<(), AllocError> {
        let _ = bytes;
        Ok(())
    }

    fn deallocate(&self, bytes: usize) {
        let _ = bytes;
    }

    /// Halts on a violated kernel invariant.
    fn fatal(&self, message: fmt::Arguments<'_>) -> ! {
        panic!("{}", message)
    }
}
