use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uniproc_kernel::ThreadHandle;

pub trait Scheduler: Send {
    /// Select next thread to run
    fn schedule(&mut self) -> Option<ThreadHandle>;

    /// Add thread to ready queue
    fn enqueue(&mut self, thread: ThreadHandle);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RoundRobinScheduler {
    ready_queue: VecDeque<ThreadHandle>,
}

impl Default for RoundRobinScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self {
            ready_queue: VecDeque::new(),
        }
    }
}

impl Scheduler for RoundRobinScheduler {
    fn schedule(&mut self) -> Option<ThreadHandle> {
        self.ready_queue.pop_front()
    }

    fn enqueue(&mut self, thread: ThreadHandle) {
        self.ready_queue.push_back(thread);
    }

    fn len(&self) -> usize {
        self.ready_queue.len()
    }
}

/// Picks a uniformly random ready thread, to shake out ordering assumptions.
pub struct RandomScheduler {
    ready: Vec<ThreadHandle>,
    rng: StdRng,
}

impl RandomScheduler {
    pub fn new(seed: u64) -> Self {
        Self {
            ready: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Scheduler for RandomScheduler {
    fn schedule(&mut self) -> Option<ThreadHandle> {
        if self.ready.is_empty() {
            return None;
        }
        let pick = self.rng.gen_range(0..self.ready.len());
        Some(self.ready.swap_remove(pick))
    }

    fn enqueue(&mut self, thread: ThreadHandle) {
        self.ready.push(thread);
    }

    fn len(&self) -> usize {
        self.ready.len()
    }
}
