mod cell;
mod condvar;
mod irq;
mod lock;
mod semaphore;
mod wait_queue;

pub use cell::{IrqCell, IrqCellGuard};
pub use condvar::ConditionVariable;
pub use irq::InterruptGuard;
pub use lock::{Lock, LockGuard};
pub use semaphore::{Semaphore, SemaphoreGuard};
pub use wait_queue::WaitQueue;

use crate::error::{AllocError, SyncError};
use crate::platform::Platform;

/// Charges a new primitive of `size` bytes and its name to the kernel heap,
/// and returns the name's copy. Nothing stays charged on failure.
fn claim<P: Platform>(
    platform: &P,
    kind: &'static str,
    name: &str,
    size: usize,
) -> Result<String, SyncError> {
    platform
        .allocate(size)
        .map_err(|e| SyncError::out_of_memory(kind, name, e))?;
    copy_name(platform, name).map_err(|e| {
        platform.deallocate(size);
        SyncError::out_of_memory(kind, name, e)
    })
}

/// Copies a diagnostic name into kernel heap, failing like any other
/// allocation would.
fn copy_name<P: Platform>(platform: &P, name: &str) -> Result<String, AllocError> {
    platform.allocate(name.len())?;
    let mut copy = String::new();
    if copy.try_reserve_exact(name.len()).is_err() {
        platform.deallocate(name.len());
        return Err(AllocError {
            requested: name.len(),
        });
    }
    copy.push_str(name);
    Ok(copy)
}
