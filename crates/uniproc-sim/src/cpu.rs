use uniproc_kernel::IrqLevel;

/// Interrupt state of the simulated processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cpu {
    pub level: IrqLevel,
    pub in_interrupt: bool,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            level: IrqLevel::ZERO,
            in_interrupt: false,
        }
    }

    /// Whether an interrupt could be taken right now.
    pub fn interrupts_deliverable(&self) -> bool {
        !self.level.is_masked() && !self.in_interrupt
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
