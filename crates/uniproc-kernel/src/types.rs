use core::fmt;
use core::num::NonZeroU32;

/// Thread identifier
///
/// Compared by value, so a lock never keeps a reference to the thread that
/// owns it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ThreadHandle(NonZeroU32);

impl ThreadHandle {
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn val(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// Interrupt-block level.
///
/// `ZERO` delivers every interrupt, `HIGH` defers all of them. Levels in
/// between are valid for nesting but the primitives only ever raise to `HIGH`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct IrqLevel(u8);

impl IrqLevel {
    pub const ZERO: IrqLevel = IrqLevel(0);
    pub const HIGH: IrqLevel = IrqLevel(15);

    pub fn new(level: u8) -> Option<Self> {
        if level <= Self::HIGH.0 {
            Some(Self(level))
        } else {
            None
        }
    }

    pub fn val(&self) -> u8 {
        self.0
    }

    pub fn is_masked(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for IrqLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spl{}", self.0)
    }
}
