//! Stress workloads for the primitives.
//!
//! Every workload builds its primitives on a fresh machine and hands them all
//! to the simulated threads, so a failed run never leaves a busy primitive
//! behind on the host. Checks made inside a thread fail the run; checks made
//! afterwards fail the workload.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{ensure, Context, Result};
use log::info;
use uniproc_kernel::{ConditionVariable, Lock, Semaphore};
use uniproc_sim::{Machine, MachineConfig, RunReport, Sim};

/// Items the producer/consumer buffer holds before producers wait.
const BUFFER_SLOTS: usize = 4;

#[derive(Debug, Clone)]
pub struct Params {
    pub threads: usize,
    pub iterations: usize,
    pub machine: MachineConfig,
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub workload: &'static str,
    pub report: RunReport,
    /// Work items completed by the simulated threads.
    pub operations: usize,
}

/// Workers share a pool of units guarded by a semaphore; a second semaphore
/// counts finished workers for the thread that checks the pool at the end.
pub fn semtest(params: &Params) -> Result<Summary> {
    let machine = Machine::new(params.machine.clone());
    let units = (params.threads / 2).max(1);
    let pool = Arc::new(Semaphore::new(machine.sim(), "pool", units as isize)?);
    let finished = Arc::new(Semaphore::new(machine.sim(), "finished", 0)?);
    let inside = Arc::new(AtomicUsize::new(0));
    let operations = Arc::new(AtomicUsize::new(0));

    for id in 0..params.threads {
        let (pool, finished) = (pool.clone(), finished.clone());
        let (inside, operations) = (inside.clone(), operations.clone());
        let iterations = params.iterations;
        machine.spawn(&format!("semworker{}", id), move |sim| {
            for _ in 0..iterations {
                let _unit = pool.acquire_guard();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                assert!(now <= units, "{} threads hold {} units", now, units);
                sim.yield_now();
                inside.fetch_sub(1, Ordering::SeqCst);
                operations.fetch_add(1, Ordering::SeqCst);
            }
            finished.release();
        })?;
    }

    let threads = params.threads;
    machine.spawn("semcheck", move |_| {
        for _ in 0..threads {
            finished.acquire();
        }
        assert_eq!(pool.count(), units, "units went missing");
        assert!(!pool.has_waiters());
    })?;

    finish(&machine, "semtest", operations)
}

/// Workers bump a shared counter with a yield in the middle of the
/// read-modify-write; only the lock keeps updates from being lost.
pub fn locktest(params: &Params) -> Result<Summary> {
    let machine = Machine::new(params.machine.clone());
    let lock = Arc::new(Lock::new(machine.sim(), "counter")?);
    let counter = Arc::new(AtomicUsize::new(0));

    for id in 0..params.threads {
        let (lock, counter) = (lock.clone(), counter.clone());
        let iterations = params.iterations;
        machine.spawn(&format!("lockworker{}", id), move |sim| {
            for _ in 0..iterations {
                let held = lock.guard();
                assert!(held.lock().held_by_caller());
                let seen = counter.load(Ordering::SeqCst);
                sim.yield_now();
                counter.store(seen + 1, Ordering::SeqCst);
            }
            assert!(!lock.held_by_caller());
        })?;
    }
    drop(lock);

    let summary = finish(&machine, "locktest", counter.clone())?;
    let expected = params.threads * params.iterations;
    ensure!(
        summary.operations == expected,
        "locktest: counter is {}, expected {}",
        summary.operations,
        expected
    );
    Ok(summary)
}

struct BoundedBuffer {
    lock: Lock<Sim>,
    not_full: ConditionVariable<Sim>,
    not_empty: ConditionVariable<Sim>,
    // `lock` serializes access; the mutex only makes the queue shareable
    // between host threads.
    items: Mutex<VecDeque<usize>>,
}

impl BoundedBuffer {
    fn new(sim: &Sim) -> Result<Self> {
        Ok(Self {
            lock: Lock::new(sim.clone(), "buffer")?,
            not_full: ConditionVariable::new(sim.clone(), "buffer not full")?,
            not_empty: ConditionVariable::new(sim.clone(), "buffer not empty")?,
            items: Mutex::new(VecDeque::with_capacity(BUFFER_SLOTS)),
        })
    }

    /// A thread that panicked while touching the queue fails the run, so a
    /// poisoned queue is never trusted.
    fn items(&self) -> MutexGuard<'_, VecDeque<usize>> {
        match self.items.lock() {
            Ok(items) => items,
            Err(_) => panic!("bounded buffer queue poisoned by a panicked thread"),
        }
    }

    fn queued(&self) -> usize {
        self.items().len()
    }

    fn put(&self, item: usize) {
        self.lock.acquire();
        while self.queued() == BUFFER_SLOTS {
            self.not_full.wait(&self.lock);
        }
        self.items().push_back(item);
        self.not_empty.signal(&self.lock);
        self.lock.release();
    }

    fn take(&self) -> usize {
        self.lock.acquire();
        let item = loop {
            let next = self.items().pop_front();
            if let Some(item) = next {
                break item;
            }
            self.not_empty.wait(&self.lock);
        };
        self.not_full.signal(&self.lock);
        self.lock.release();
        item
    }
}

/// Producers feed numbered items through a small buffer to one consumer.
pub fn cvtest(params: &Params) -> Result<Summary> {
    let machine = Machine::new(params.machine.clone());
    let buffer = Arc::new(BoundedBuffer::new(&machine.sim())?);
    let total = params.threads * params.iterations;
    let consumed = Arc::new(AtomicUsize::new(0));
    let sum = Arc::new(AtomicUsize::new(0));

    for id in 0..params.threads {
        let buffer = buffer.clone();
        let iterations = params.iterations;
        machine.spawn(&format!("producer{}", id), move |_| {
            for i in 0..iterations {
                buffer.put(id * iterations + i);
            }
        })?;
    }

    let (consumer_sum, consumer_count) = (sum.clone(), consumed.clone());
    machine.spawn("consumer", move |_| {
        for _ in 0..total {
            let item = buffer.take();
            consumer_sum.fetch_add(item, Ordering::SeqCst);
            consumer_count.fetch_add(1, Ordering::SeqCst);
        }
        assert!(!buffer.not_full.has_waiters());
    })?;

    let summary = finish(&machine, "cvtest", consumed)?;
    let expected = total * total.saturating_sub(1) / 2;
    let sum = sum.load(Ordering::SeqCst);
    ensure!(
        sum == expected,
        "cvtest: items add up to {}, expected {}",
        sum,
        expected
    );
    Ok(summary)
}

fn finish(
    machine: &Machine,
    workload: &'static str,
    operations: Arc<AtomicUsize>,
) -> Result<Summary> {
    let report = machine
        .run()
        .with_context(|| format!("{} did not complete", workload))?;
    let operations = operations.load(Ordering::SeqCst);
    info!("{}: {:?}, {} operations", workload, report, operations);
    Ok(Summary {
        workload,
        report,
        operations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniproc_sim::SchedPolicy;

    fn params(machine: MachineConfig) -> Params {
        Params {
            threads: 4,
            iterations: 8,
            machine,
        }
    }

    fn stressed(seed: u64) -> MachineConfig {
        MachineConfig {
            policy: SchedPolicy::Random,
            seed,
            preempt_probability: 0.25,
            ..MachineConfig::default()
        }
    }

    #[test]
    fn semtest_passes() {
        let summary = semtest(&params(MachineConfig::default())).unwrap();
        assert_eq!(summary.operations, 32);
        assert_eq!(summary.report.threads, 5);
    }

    #[test]
    fn locktest_passes_under_preemption() {
        for seed in 0..4 {
            let summary = locktest(&params(stressed(seed))).unwrap();
            assert_eq!(summary.operations, 32);
        }
    }

    #[test]
    fn cvtest_moves_every_item() {
        for seed in 0..4 {
            let summary = cvtest(&params(stressed(seed))).unwrap();
            assert_eq!(summary.operations, 32);
        }
    }

    #[test]
    fn workloads_report_a_tight_switch_limit() {
        let machine = MachineConfig {
            max_switches: Some(3),
            ..MachineConfig::default()
        };
        let err = locktest(&params(machine)).unwrap_err();
        assert!(
            format!("{:#}", err).contains("context switches"),
            "{:#}",
            err
        );
    }

    #[test]
    fn workloads_report_heap_exhaustion() {
        let machine = MachineConfig {
            heap_limit: Some(8),
            ..MachineConfig::default()
        };
        let err = semtest(&params(machine)).unwrap_err();
        assert!(format!("{:#}", err).contains("out of memory"), "{:#}", err);
    }

    #[test]
    #[should_panic(expected = "poisoned")]
    fn poisoned_buffer_is_not_read_as_empty() {
        let machine = Machine::default();
        let buffer = BoundedBuffer::new(&machine.sim()).unwrap();
        buffer.items().push_back(7);

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _items = buffer.items.lock().unwrap();
            panic!("producer died mid-update");
        }));
        assert!(buffer.items.is_poisoned());
        buffer.queued();
    }
}
