use crate::platform::Platform;
use crate::types::IrqLevel;

/// Masks interrupts for as long as it lives.
///
/// The level in effect at construction is put back on drop, whichever way the
/// scope is left.
pub struct InterruptGuard<'a, P: Platform> {
    platform: &'a P,
    prior: IrqLevel,
}

impl<'a, P: Platform> InterruptGuard<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        let prior = platform.raise_to_max();
        Self { platform, prior }
    }

    /// Level to be restored on drop.
    pub fn prior(&self) -> IrqLevel {
        self.prior
    }

    /// Suspends the current thread, which must already sit on a wait queue.
    ///
    /// Borrowed state from an [`IrqCell`](super::IrqCell) has to be dropped
    /// first: other threads run before this returns.
    pub fn sleep(&self) {
        let level = self.platform.interrupt_level();
        kassert!(
            self.platform,
            level == IrqLevel::HIGH,
            "sleeping at {} instead of {}",
            level,
            IrqLevel::HIGH
        );
        self.platform.block_current();
    }
}

impl<P: Platform> Drop for InterruptGuard<'_, P> {
    fn drop(&mut self) {
        self.platform.restore(self.prior);
    }
}

#[cfg(test)]
mod tests {
    use super::InterruptGuard;
    use crate::sync::IrqCell;
    use crate::testing::MockPlatform;
    use crate::types::IrqLevel;

    #[test]
    fn nested_guards_unwind_to_the_entry_level() {
        let platform = MockPlatform::new();
        let mid = IrqLevel::new(4).unwrap();
        platform.set_level(mid);
        {
            let outer = InterruptGuard::new(&platform);
            assert_eq!(outer.prior(), mid);
            {
                let inner = InterruptGuard::new(&platform);
                assert_eq!(inner.prior(), IrqLevel::HIGH);
            }
            assert_eq!(platform.level(), IrqLevel::HIGH);
        }
        assert_eq!(platform.level(), mid);
    }

    #[test]
    fn cell_is_reachable_only_while_masked() {
        let platform = MockPlatform::new();
        let cell = IrqCell::new(0u32);
        {
            let irq = InterruptGuard::new(&platform);
            *cell.lock(&irq) += 1;
            assert_eq!(platform.level(), IrqLevel::HIGH);
        }
        assert_eq!(platform.level(), IrqLevel::ZERO);
        let irq = InterruptGuard::new(&platform);
        assert_eq!(*cell.lock(&irq), 1);
    }

    #[test]
    #[should_panic(expected = "sleeping at spl0")]
    fn sleeping_unmasked_is_fatal() {
        let platform = MockPlatform::new();
        let irq = InterruptGuard::new(&platform);
        platform.set_level(IrqLevel::ZERO);
        irq.sleep();
    }
}
