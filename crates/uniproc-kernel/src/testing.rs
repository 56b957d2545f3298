//! Single-threaded stand-in for the scheduler, for tests that never sleep.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::AllocError;
use crate::platform::Platform;
use crate::types::{IrqLevel, ThreadHandle};

struct MockState {
    current: ThreadHandle,
    level: IrqLevel,
    max_level: IrqLevel,
    in_interrupt: bool,
    blocks: usize,
    woken: Vec<ThreadHandle>,
    heap_limit: Option<usize>,
    heap_used: usize,
}

#[derive(Clone)]
pub(crate) struct MockPlatform {
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                current: ThreadHandle::new(1).unwrap(),
                level: IrqLevel::ZERO,
                max_level: IrqLevel::ZERO,
                in_interrupt: false,
                blocks: 0,
                woken: Vec::new(),
                heap_limit: None,
                heap_used: 0,
            })),
        }
    }

    pub fn with_heap(limit: usize) -> Self {
        let platform = Self::new();
        platform.state().heap_limit = Some(limit);
        platform
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> ThreadHandle {
        self.state().current
    }

    pub fn set_current(&self, thread: ThreadHandle) {
        self.state().current = thread;
    }

    pub fn level(&self) -> IrqLevel {
        self.state().level
    }

    /// Returns the previous level.
    pub fn set_level(&self, level: IrqLevel) -> IrqLevel {
        std::mem::replace(&mut self.state().level, level)
    }

    pub fn max_level_seen(&self) -> IrqLevel {
        self.state().max_level
    }

    pub fn set_in_interrupt(&self, in_interrupt: bool) {
        self.state().in_interrupt = in_interrupt;
    }

    pub fn blocks(&self) -> usize {
        self.state().blocks
    }

    pub fn woken(&self) -> Vec<ThreadHandle> {
        self.state().woken.clone()
    }

    pub fn heap_used(&self) -> usize {
        self.state().heap_used
    }
}

impl Platform for MockPlatform {
    fn current_thread(&self) -> ThreadHandle {
        self.state().current
    }

    fn in_interrupt(&self) -> bool {
        self.state().in_interrupt
    }

    fn interrupt_level(&self) -> IrqLevel {
        self.state().level
    }

    fn raise_to_max(&self) -> IrqLevel {
        let mut state = self.state();
        state.max_level = IrqLevel::HIGH;
        std::mem::replace(&mut state.level, IrqLevel::HIGH)
    }

    fn restore(&self, level: IrqLevel) {
        self.state().level = level;
    }

    fn block_current(&self) {
        self.state().blocks += 1;
        panic!("mock platform cannot block");
    }

    fn wakeup(&self, thread: ThreadHandle) {
        self.state().woken.push(thread);
    }

    fn allocate(&self, bytes: usize) -> Result<(), AllocError> {
        let mut state = self.state();
        if let Some(limit) = state.heap_limit {
            if state.heap_used + bytes > limit {
                return Err(AllocError { requested: bytes });
            }
        }
        state.heap_used += bytes;
        Ok(())
    }

    fn deallocate(&self, bytes: usize) {
        self.state().heap_used -= bytes;
    }
}
