//! A simulated single-processor machine for running kernel threads on a host.
//!
//! Every simulated thread is backed by a host thread, but only the one the
//! scheduler has dispatched is allowed to make progress: the others park until
//! the cpu is handed to them. Interleavings are therefore decided entirely by
//! the scheduler and the simulated timer, and a given [`MachineConfig`] always
//! replays the same run.
//!
//! [`Sim`] is the handle threads use; it implements
//! [`uniproc_kernel::Platform`] so kernel primitives can be created on it.

pub mod cpu;
pub mod error;
pub mod platform;
pub mod thread;

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use uniproc_kernel::ThreadHandle;

pub use cpu::Cpu;
pub use error::SimError;
pub use platform::Sim;
pub use thread::scheduler::{RandomScheduler, RoundRobinScheduler, Scheduler};
pub use thread::tcb::{ThreadInfo, ThreadState};

use thread::ThreadManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    #[default]
    RoundRobin,
    Random,
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub policy: SchedPolicy,
    /// Seeds both the random scheduler and the timer.
    pub seed: u64,
    /// Chance that a timer interrupt is taken each time a thread unmasks
    /// interrupts. Zero runs threads cooperatively.
    pub preempt_probability: f64,
    /// Context switches allowed before the run is abandoned.
    pub max_switches: Option<u64>,
    /// Bytes of kernel heap the primitives may claim.
    pub heap_limit: Option<usize>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            policy: SchedPolicy::RoundRobin,
            seed: 0,
            preempt_probability: 0.0,
            max_switches: Some(1_000_000),
            heap_limit: None,
        }
    }
}

/// Summary of a run that finished with every thread exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub threads: usize,
    pub switches: u64,
    pub timer_ticks: u64,
}

#[derive(Debug, Clone)]
pub(crate) enum Halt {
    Finished,
    Deadlock(Vec<ThreadHandle>),
    StepLimit(u64),
    Crashed {
        thread: ThreadHandle,
        name: String,
        message: String,
    },
}

pub(crate) type TimerHandler = Box<dyn FnMut(&Sim) + Send>;
pub(crate) type InterruptHandler = Box<dyn FnOnce(&Sim) + Send>;

pub(crate) struct MachineState {
    pub threads: ThreadManager,
    pub cpu: Cpu,
    pub halt: Option<Halt>,
    pub switches: u64,
    pub max_switches: Option<u64>,
    pub timer_rng: StdRng,
    pub preempt_probability: f64,
    pub timer_handler: Option<TimerHandler>,
    pub timer_ticks: u64,
    /// Interrupts raised while masked, delivered once the level drops to zero.
    pub pending_interrupts: VecDeque<InterruptHandler>,
    pub heap_limit: Option<usize>,
    pub heap_used: usize,
    /// Thread unwinding after a halt. They take turns so that no two of them
    /// touch kernel state at once.
    pub unwinding: Option<ThreadHandle>,
}

impl MachineState {
    /// Gives the cpu to the next ready thread, or halts when there is none.
    pub fn dispatch(&mut self) {
        match self.threads.switch_to_next() {
            Some((_, level)) => {
                self.cpu.level = level;
                self.switches += 1;
                if let Some(max) = self.max_switches {
                    if self.switches > max {
                        info!("halting after {} context switches", max);
                        self.halt_with(Halt::StepLimit(max));
                    }
                }
            }
            None => {
                let blocked = self.threads.blocked_threads();
                if blocked.is_empty() {
                    debug!("no threads left");
                    self.halt_with(Halt::Finished);
                } else {
                    info!("deadlock: {:?} blocked", blocked);
                    self.halt_with(Halt::Deadlock(blocked));
                }
            }
        }
    }

    /// The first reason to halt wins.
    pub fn halt_with(&mut self, halt: Halt) {
        if self.halt.is_none() {
            self.halt = Some(halt);
        }
        self.threads.current_thread = None;
    }
}

pub(crate) struct Shared {
    pub state: Mutex<MachineState>,
    /// Signalled whenever the cpu changes hands or the machine halts.
    pub turn: Condvar,
    pub hosts: Mutex<Vec<JoinHandle<()>>>,
}

/// Owner of a simulated machine.
pub struct Machine {
    sim: Sim,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        let scheduler: Box<dyn Scheduler> = match config.policy {
            SchedPolicy::RoundRobin => Box::new(RoundRobinScheduler::new()),
            SchedPolicy::Random => Box::new(RandomScheduler::new(config.seed)),
        };
        let state = MachineState {
            threads: ThreadManager::new(scheduler),
            cpu: Cpu::new(),
            halt: None,
            switches: 0,
            max_switches: config.max_switches,
            timer_rng: StdRng::seed_from_u64(config.seed.rotate_left(32)),
            preempt_probability: config.preempt_probability.clamp(0.0, 1.0),
            timer_handler: None,
            timer_ticks: 0,
            pending_interrupts: VecDeque::new(),
            heap_limit: config.heap_limit,
            heap_used: 0,
            unwinding: None,
        };
        Self {
            sim: Sim::from_shared(Arc::new(Shared {
                state: Mutex::new(state),
                turn: Condvar::new(),
                hosts: Mutex::new(Vec::new()),
            })),
        }
    }

    /// Handle for creating primitives and threads on this machine.
    pub fn sim(&self) -> Sim {
        self.sim.clone()
    }

    pub fn spawn<F>(&self, name: &str, f: F) -> Result<ThreadHandle, SimError>
    where
        F: FnOnce(Sim) + Send + 'static,
    {
        self.sim.spawn(name, f)
    }

    /// Runs `handler` in interrupt context on every timer tick.
    pub fn set_timer_handler<F>(&self, handler: F)
    where
        F: FnMut(&Sim) + Send + 'static,
    {
        self.sim.lock().timer_handler = Some(Box::new(handler));
    }

    pub fn thread_info(&self, handle: ThreadHandle) -> Option<ThreadInfo> {
        self.sim.lock().threads.info(handle)
    }

    pub fn heap_used(&self) -> usize {
        self.sim.lock().heap_used
    }

    /// Runs until every thread has exited, or the machine cannot go on.
    ///
    /// Threads left behind when the machine halts are unwound, so the host
    /// threads backing them are all gone when this returns.
    pub fn run(&self) -> Result<RunReport, SimError> {
        let shared = self.sim.shared();
        let mut state = self.sim.lock();
        if state.halt.is_none() && state.threads.current_thread.is_none() {
            info!("booting with {} threads", state.threads.len());
            state.dispatch();
            shared.turn.notify_all();
        }
        while state.halt.is_none() {
            state = shared.turn.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        let halt = state.halt.clone();
        let report = RunReport {
            threads: state.threads.len(),
            switches: state.switches,
            timer_ticks: state.timer_ticks,
        };
        drop(state);

        shared.turn.notify_all();
        self.join_hosts();

        let undelivered = mem::take(&mut self.sim.lock().pending_interrupts);
        if !undelivered.is_empty() {
            warn!("{} interrupts were never delivered", undelivered.len());
        }
        drop(undelivered);

        match halt {
            Some(Halt::Finished) | None => {
                info!(
                    "run finished: {} threads, {} switches",
                    report.threads, report.switches
                );
                Ok(report)
            }
            Some(Halt::Deadlock(blocked)) => Err(SimError::Deadlock { blocked }),
            Some(Halt::StepLimit(switches)) => Err(SimError::StepLimit { switches }),
            Some(Halt::Crashed {
                thread,
                name,
                message,
            }) => Err(SimError::ThreadPanicked {
                thread,
                name,
                message,
            }),
        }
    }

    fn join_hosts(&self) {
        let shared = self.sim.shared();
        loop {
            let hosts = {
                let mut hosts = shared.hosts.lock().unwrap_or_else(|e| e.into_inner());
                mem::take(&mut *hosts)
            };
            if hosts.is_empty() {
                break;
            }
            for host in hosts {
                let _ = host.join();
            }
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        // Release threads of a machine that was never run to completion.
        self.sim.lock().halt_with(Halt::Finished);
        self.sim.shared().turn.notify_all();
        self.join_hosts();
    }
}
