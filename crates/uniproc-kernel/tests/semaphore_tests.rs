//! Semaphores driven by threads on the simulated machine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use uniproc_kernel::Semaphore;
use uniproc_sim::{Machine, MachineConfig, SchedPolicy, SimError, ThreadState};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn third_acquire_of_two_units_waits_for_a_release() {
    init_logging();
    let machine = Machine::default();
    let sem = Arc::new(Semaphore::new(machine.sim(), "two", 2).unwrap());
    let events = Arc::new(Mutex::new(Vec::new()));

    let (s, log) = (sem.clone(), events.clone());
    let taker = machine
        .spawn("taker", move |sim| {
            s.acquire();
            s.acquire();
            log.lock()
                .unwrap()
                .push(format!("two taken, count {}", s.count()));
            let me = sim.thread_info(sim.current()).unwrap();
            assert_eq!(me.blocks, 0);

            s.acquire();
            log.lock()
                .unwrap()
                .push(format!("third taken, count {}", s.count()));
        })
        .unwrap();

    let (s, log) = (sem.clone(), events.clone());
    machine
        .spawn("giver", move |sim| {
            assert_eq!(sim.thread_state(taker), Some(ThreadState::Blocked));
            assert!(s.has_waiters());
            s.release();
            log.lock()
                .unwrap()
                .push(format!("released, count {}", s.count()));
        })
        .unwrap();

    machine.run().unwrap();
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "two taken, count 0",
            "released, count 1",
            "third taken, count 0",
        ]
    );
    assert_eq!(machine.thread_info(taker).unwrap().blocks, 1);
    assert_eq!(sem.count(), 0);
}

#[test]
fn release_from_an_interrupt_handler_wakes_the_waiter() {
    init_logging();
    let machine = Machine::default();
    let sem = Arc::new(Semaphore::new(machine.sim(), "irq", 0).unwrap());
    let got_it = Arc::new(AtomicUsize::new(0));

    let (s, got) = (sem.clone(), got_it.clone());
    machine
        .spawn("waiter", move |_| {
            s.acquire();
            got.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let s = sem.clone();
    machine
        .spawn("device", move |sim| {
            sim.interrupt(move |_| s.release());
        })
        .unwrap();

    machine.run().unwrap();
    assert_eq!(got_it.load(Ordering::SeqCst), 1);
    assert_eq!(sem.count(), 0);
}

#[test]
fn timer_handler_can_release_units() {
    init_logging();
    let machine = Machine::new(MachineConfig {
        preempt_probability: 0.5,
        seed: 3,
        ..MachineConfig::default()
    });
    let sem = Arc::new(Semaphore::new(machine.sim(), "ticks", 0).unwrap());
    let s = sem.clone();
    machine.set_timer_handler(move |_| s.release());

    let s = sem.clone();
    machine
        .spawn("sleeper", move |sim| {
            // Keeps unmasking interrupts until the timer has fired once.
            while s.count() == 0 {
                sim.yield_now();
            }
            s.acquire();
        })
        .unwrap();

    let report = machine.run().unwrap();
    assert!(report.timer_ticks >= 1);
    assert_eq!(sem.count() as u64, report.timer_ticks - 1);
}

#[test]
fn waiting_forever_is_reported_as_deadlock() {
    init_logging();
    let machine = Machine::default();
    let sem = Arc::new(Semaphore::new(machine.sim(), "empty", 0).unwrap());

    let mut expected = Vec::new();
    for name in ["w1", "w2"] {
        let s = sem.clone();
        expected.push(machine.spawn(name, move |_| s.acquire()).unwrap());
    }
    // The waiters own the semaphore now; it goes away as they unwind.
    drop(sem);

    match machine.run() {
        Err(SimError::Deadlock { blocked }) => assert_eq!(blocked, expected),
        other => panic!("expected deadlock, got {:?}", other),
    }
}

#[test]
fn guard_hands_the_unit_back() {
    init_logging();
    let machine = Machine::default();
    let sem = Arc::new(Semaphore::new(machine.sim(), "guarded", 1).unwrap());

    for name in ["a", "b", "c"] {
        let s = sem.clone();
        machine
            .spawn(name, move |sim| {
                let _unit = s.acquire_guard();
                assert_eq!(s.count(), 0);
                sim.yield_now();
            })
            .unwrap();
    }

    machine.run().unwrap();
    assert_eq!(sem.count(), 1);
}

fn run_bounded_workers(
    seed: u64,
    units: usize,
    workers: usize,
    rounds: usize,
) -> Result<(usize, usize), SimError> {
    let machine = Machine::new(MachineConfig {
        policy: SchedPolicy::Random,
        seed,
        preempt_probability: 0.3,
        ..MachineConfig::default()
    });
    let sem = Arc::new(
        Semaphore::new(machine.sim(), "pool", units as isize).unwrap(),
    );
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for id in 0..workers {
        let (s, inside, peak) = (sem.clone(), inside.clone(), peak.clone());
        machine.spawn(&format!("worker{}", id), move |sim| {
            for _ in 0..rounds {
                s.acquire();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(now <= units, "{} threads share {} units", now, units);
                sim.yield_now();
                inside.fetch_sub(1, Ordering::SeqCst);
                s.release();
            }
        })?;
    }

    machine.run()?;
    let peak = peak.load(Ordering::SeqCst);
    Ok((peak, sem.count()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn count_stays_within_its_units(
        seed in any::<u64>(),
        units in 1usize..4,
        workers in 1usize..6,
        rounds in 1usize..5,
    ) {
        init_logging();
        let result = run_bounded_workers(seed, units, workers, rounds);
        prop_assert!(result.is_ok(), "{:?}", result);
        let (peak, count) = result.unwrap();
        prop_assert!(peak <= units);
        prop_assert!(peak >= 1);
        prop_assert_eq!(count, units);
    }
}
