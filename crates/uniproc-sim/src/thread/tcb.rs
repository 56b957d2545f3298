use uniproc_kernel::{IrqLevel, ThreadHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

pub struct ThreadControlBlock {
    pub handle: ThreadHandle,
    pub name: String,
    pub state: ThreadState,
    /// Interrupt level to reinstate when the thread is next dispatched.
    pub saved_level: IrqLevel,
    pub blocks: u64,
    pub dispatches: u64,
}

impl ThreadControlBlock {
    pub fn new(handle: ThreadHandle, name: &str) -> Self {
        Self {
            handle,
            name: name.into(),
            state: ThreadState::Ready,
            saved_level: IrqLevel::ZERO,
            blocks: 0,
            dispatches: 0,
        }
    }
}

/// Snapshot of a thread for callers outside the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub handle: ThreadHandle,
    pub name: String,
    pub state: ThreadState,
    pub blocks: u64,
    pub dispatches: u64,
}

impl From<&ThreadControlBlock> for ThreadInfo {
    fn from(tcb: &ThreadControlBlock) -> Self {
        Self {
            handle: tcb.handle,
            name: tcb.name.clone(),
            state: tcb.state,
            blocks: tcb.blocks,
            dispatches: tcb.dispatches,
        }
    }
}
