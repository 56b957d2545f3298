use core::cell::{RefCell, RefMut};
use core::ops::{Deref, DerefMut};

use super::irq::InterruptGuard;
use crate::platform::Platform;

/// Shared state that is only reachable with interrupts masked.
///
/// On a single processor, masking interrupts is all the exclusion there is, so
/// `lock` asks for a live [`InterruptGuard`] instead of taking a lock of its
/// own. The inner `RefCell` catches a nested borrow from the same thread,
/// which would otherwise alias silently.
pub struct IrqCell<T> {
    data: RefCell<T>,
}

// SAFETY: every access goes through `lock`, which requires interrupts masked on
// the only processor, so no two threads ever touch `data` at the same time.
unsafe impl<T: Send> Sync for IrqCell<T> {}

impl<T> IrqCell<T> {
    pub const fn new(data: T) -> Self {
        Self {
            data: RefCell::new(data),
        }
    }

    pub fn lock<'a, P: Platform>(
        &'a self,
        _masked: &'a InterruptGuard<'_, P>,
    ) -> IrqCellGuard<'a, T> {
        IrqCellGuard {
            inner: self.data.borrow_mut(),
        }
    }

    /// Exclusive access through `&mut self` needs no masking.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct IrqCellGuard<'a, T> {
    inner: RefMut<'a, T>,
}

impl<T> Deref for IrqCellGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for IrqCellGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
