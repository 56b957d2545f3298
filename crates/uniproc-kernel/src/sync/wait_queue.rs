use std::collections::VecDeque;

use log::trace;

use crate::platform::Platform;
use crate::types::ThreadHandle;

/// Threads suspended on one primitive, oldest first.
#[derive(Debug, Default)]
pub struct WaitQueue {
    waiters: VecDeque<ThreadHandle>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
        }
    }

    pub fn push(&mut self, thread: ThreadHandle) {
        self.waiters.push_back(thread);
    }

    /// Readies the longest waiting thread, if any.
    pub fn wake_one<P: Platform>(&mut self, platform: &P) -> Option<ThreadHandle> {
        let thread = self.waiters.pop_front()?;
        trace!("waking {}", thread);
        platform.wakeup(thread);
        Some(thread)
    }

    /// Readies every waiter and returns how many there were.
    pub fn wake_all<P: Platform>(&mut self, platform: &P) -> usize {
        let woken = self.waiters.len();
        for thread in self.waiters.drain(..) {
            trace!("waking {}", thread);
            platform.wakeup(thread);
        }
        woken
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn contains(&self, thread: ThreadHandle) -> bool {
        self.waiters.contains(&thread)
    }
}
