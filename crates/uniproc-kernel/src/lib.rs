//! Sleeping synchronization primitives for a uniprocessor kernel.
//!
//! [`Semaphore`], [`Lock`] and [`ConditionVariable`] get their atomicity from
//! masking interrupts on the only processor and nothing else. Everything they
//! need from the rest of the kernel (the current thread, the interrupt level,
//! sleeping and waking, heap accounting) comes through the [`Platform`] handle
//! each primitive is created with.

/// Halts through [`Platform::fatal`] when a kernel invariant does not hold.
macro_rules! kassert {
    ($platform:expr, $cond:expr, $($arg:tt)+) => {
        if !$cond {
            $platform.fatal(format_args!($($arg)+));
        }
    };
}

pub mod error;
pub mod platform;
pub mod sync;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{AllocError, SyncError};
pub use platform::Platform;
pub use sync::{
    ConditionVariable, InterruptGuard, IrqCell, Lock, LockGuard, Semaphore, SemaphoreGuard,
    WaitQueue,
};
pub use types::{IrqLevel, ThreadHandle};
