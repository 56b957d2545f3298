pub mod scheduler;
pub mod tcb;

use std::collections::HashMap;

use log::{debug, info};
use scheduler::Scheduler;
use tcb::{ThreadControlBlock, ThreadInfo, ThreadState};
use uniproc_kernel::{IrqLevel, ThreadHandle};

pub struct ThreadManager {
    pub threads: HashMap<ThreadHandle, ThreadControlBlock>,
    pub scheduler: Box<dyn Scheduler>,
    pub current_thread: Option<ThreadHandle>,
    pub next_handle: u32,
}

impl ThreadManager {
    pub fn new(scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            threads: HashMap::new(),
            scheduler,
            current_thread: None,
            next_handle: 1,
        }
    }

    /// Registers a ready thread. The caller supplies something to run it.
    pub fn create_thread(&mut self, name: &str) -> ThreadHandle {
        let handle = ThreadHandle::new(self.next_handle)
            .unwrap_or_else(|| unreachable!("thread handles start at 1"));
        self.next_handle += 1;

        self.threads
            .insert(handle, ThreadControlBlock::new(handle, name));
        self.scheduler.enqueue(handle);
        info!("created {} `{}`", handle, name);
        handle
    }

    /// Takes the running thread off the cpu until `wake_thread`.
    pub fn block_current_thread(&mut self, level: IrqLevel) {
        if let Some(current) = self.current_thread.take() {
            if let Some(tcb) = self.threads.get_mut(&current) {
                tcb.state = ThreadState::Blocked;
                tcb.saved_level = level;
                tcb.blocks += 1;
            }
        }
    }

    /// Puts the running thread back on the ready queue.
    pub fn yield_current_thread(&mut self, level: IrqLevel) {
        if let Some(current) = self.current_thread.take() {
            if let Some(tcb) = self.threads.get_mut(&current) {
                tcb.state = ThreadState::Ready;
                tcb.saved_level = level;
                self.scheduler.enqueue(current);
            }
        }
    }

    pub fn exit_thread(&mut self, handle: ThreadHandle) {
        if let Some(tcb) = self.threads.get_mut(&handle) {
            tcb.state = ThreadState::Terminated;
            info!("{} `{}` exited", handle, tcb.name);
        }
        if self.current_thread == Some(handle) {
            self.current_thread = None;
        }
    }

    /// Returns `false` if the thread was not blocked.
    pub fn wake_thread(&mut self, handle: ThreadHandle) -> bool {
        match self.threads.get_mut(&handle) {
            Some(tcb) if tcb.state == ThreadState::Blocked => {
                tcb.state = ThreadState::Ready;
                self.scheduler.enqueue(handle);
                true
            }
            _ => false,
        }
    }

    /// Dispatches the next ready thread and returns the level it runs at.
    ///
    /// Queue entries for threads that exited while still queued are skipped.
    pub fn switch_to_next(&mut self) -> Option<(ThreadHandle, IrqLevel)> {
        loop {
            let next = self.scheduler.schedule()?;
            match self.threads.get_mut(&next) {
                Some(tcb) if tcb.state == ThreadState::Ready => {
                    tcb.state = ThreadState::Running;
                    tcb.dispatches += 1;
                    self.current_thread = Some(next);
                    debug!("switch to {} `{}` at {}", next, tcb.name, tcb.saved_level);
                    return Some((next, tcb.saved_level));
                }
                _ => debug!("{} is no longer ready, skipped", next),
            }
        }
    }

    pub fn blocked_threads(&self) -> Vec<ThreadHandle> {
        let mut blocked: Vec<_> = self
            .threads
            .values()
            .filter(|tcb| tcb.state == ThreadState::Blocked)
            .map(|tcb| tcb.handle)
            .collect();
        blocked.sort();
        blocked
    }

    pub fn state_of(&self, handle: ThreadHandle) -> Option<ThreadState> {
        self.threads.get(&handle).map(|tcb| tcb.state)
    }

    pub fn info(&self, handle: ThreadHandle) -> Option<ThreadInfo> {
        self.threads.get(&handle).map(ThreadInfo::from)
    }

    pub fn name_of(&self, handle: ThreadHandle) -> String {
        self.threads
            .get(&handle)
            .map(|tcb| tcb.name.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}
