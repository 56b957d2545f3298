use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, MutexGuard};

use log::{debug, error, trace};
use rand::Rng;
use uniproc_kernel::{AllocError, IrqLevel, Platform, ThreadHandle};

use crate::error::SimError;
use crate::thread::tcb::{ThreadInfo, ThreadState};
use crate::{Halt, MachineState, Shared};

thread_local! {
    /// The simulated thread a host thread runs, if any.
    static CURRENT: Cell<Option<ThreadHandle>> = const { Cell::new(None) };
}

/// Unwinds a simulated thread whose machine has halted.
struct Shutdown;

/// Handle to a simulated machine, passed to every thread it runs.
#[derive(Clone)]
pub struct Sim {
    shared: Arc<Shared>,
}

impl Sim {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates a ready thread running `f`. Usable before and during a run.
    pub fn spawn<F>(&self, name: &str, f: F) -> Result<ThreadHandle, SimError>
    where
        F: FnOnce(Sim) + Send + 'static,
    {
        let handle = {
            let mut state = self.lock();
            if state.halt.is_some() {
                return Err(SimError::Halted);
            }
            state.threads.create_thread(name)
        };

        let sim = self.clone();
        let host = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || sim.thread_main(handle, f));
        match host {
            Ok(host) => {
                self.shared
                    .hosts
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(host);
                Ok(handle)
            }
            Err(e) => {
                self.lock().threads.exit_thread(handle);
                Err(e.into())
            }
        }
    }

    /// The running thread.
    pub fn current(&self) -> ThreadHandle {
        self.current_thread()
    }

    /// Gives up the cpu to the next ready thread, if there is one.
    pub fn yield_now(&self) {
        let me = self.current_thread();
        let mut state = self.lock();
        if state.halt.is_some() {
            self.unwind(me, state);
        }
        if state.cpu.in_interrupt {
            drop(state);
            self.fatal(format_args!("{} yielded in an interrupt handler", me));
        }
        let level = state.cpu.level;
        state.threads.yield_current_thread(level);
        state.dispatch();
        if state.halt.is_none() && state.threads.current_thread == Some(me) {
            return;
        }
        self.shared.turn.notify_all();
        self.park(me, state);
    }

    /// Raises an interrupt whose handler is `f`.
    ///
    /// The handler runs at once on the current thread if interrupts are
    /// unmasked. Otherwise it stays pending until a restore brings the level
    /// back to zero, the way a device interrupt waits out a critical section.
    /// Handlers run masked and may not sleep. Returns whether `f` ran.
    pub fn interrupt<F>(&self, f: F) -> bool
    where
        F: FnOnce(&Sim) + Send + 'static,
    {
        {
            let mut state = self.lock();
            if !state.cpu.interrupts_deliverable() {
                trace!("interrupt pending at {}", state.cpu.level);
                state.pending_interrupts.push_back(Box::new(f));
                return false;
            }
        }
        self.deliver(f);
        self.deliver_pending();
        true
    }

    pub fn thread_state(&self, handle: ThreadHandle) -> Option<ThreadState> {
        self.lock().threads.state_of(handle)
    }

    pub fn thread_info(&self, handle: ThreadHandle) -> Option<ThreadInfo> {
        self.lock().threads.info(handle)
    }

    /// Context switches so far.
    pub fn switches(&self) -> u64 {
        self.lock().switches
    }

    pub fn timer_ticks(&self) -> u64 {
        self.lock().timer_ticks
    }

    fn thread_main<F: FnOnce(Sim)>(self, me: ThreadHandle, f: F) {
        CURRENT.with(|current| current.set(Some(me)));
        let state = self.wait_for_cpu(self.lock(), me);
        let dispatched = state.halt.is_none();
        if dispatched {
            drop(state);
        } else {
            // Never ran. Its closure still has to be dropped in turn.
            self.take_unwind_turn(me, state);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if dispatched {
                self.deliver_pending();
                f(self.clone());
                self.deliver_pending();
            } else {
                drop(f);
            }
        }));
        let unwinding = self.lock().unwinding == Some(me);
        match outcome {
            Ok(()) if dispatched => self.exit(me),
            Ok(()) => self.end_unwind(me),
            Err(payload) if payload.is::<Shutdown>() => {
                debug!("{} unwound after halt", me);
                self.end_unwind(me);
            }
            Err(payload) if unwinding => {
                debug!(
                    "{} panicked while unwinding: {}",
                    me,
                    panic_message(payload.as_ref())
                );
                self.end_unwind(me);
            }
            Err(payload) => self.crash(me, panic_message(payload.as_ref())),
        }
    }

    /// Blocks the host thread until `me` owns the cpu or the machine halts.
    fn wait_for_cpu<'a>(
        &'a self,
        mut state: MutexGuard<'a, MachineState>,
        me: ThreadHandle,
    ) -> MutexGuard<'a, MachineState> {
        while state.halt.is_none() && state.threads.current_thread != Some(me) {
            state = self
                .shared
                .turn
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        state
    }

    /// Waits to be dispatched again, unwinding the thread if that never happens.
    fn park(&self, me: ThreadHandle, state: MutexGuard<'_, MachineState>) {
        let state = self.wait_for_cpu(state, me);
        if state.halt.is_some() {
            self.unwind(me, state);
        }
        drop(state);
        self.deliver_pending();
    }

    fn take_unwind_turn(&self, me: ThreadHandle, mut state: MutexGuard<'_, MachineState>) {
        while state.unwinding.is_some() {
            state = self
                .shared
                .turn
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        state.unwinding = Some(me);
    }

    /// Unwinds a thread of a halted machine out of whatever it was doing.
    fn unwind(&self, me: ThreadHandle, state: MutexGuard<'_, MachineState>) -> ! {
        self.take_unwind_turn(me, state);
        panic::resume_unwind(Box::new(Shutdown))
    }

    fn end_unwind(&self, me: ThreadHandle) {
        let mut state = self.lock();
        if state.unwinding == Some(me) {
            state.unwinding = None;
            self.shared.turn.notify_all();
        }
    }

    fn exit(&self, me: ThreadHandle) {
        let mut state = self.lock();
        if state.cpu.level != IrqLevel::ZERO {
            let message = format!("exited with interrupts masked at {}", state.cpu.level);
            drop(state);
            self.crash(me, message);
            return;
        }
        state.threads.exit_thread(me);
        state.dispatch();
        self.shared.turn.notify_all();
    }

    fn crash(&self, me: ThreadHandle, message: String) {
        let mut state = self.lock();
        let name = state.threads.name_of(me);
        error!("{} `{}` crashed: {}", me, name, message);
        state.threads.exit_thread(me);
        state.halt_with(Halt::Crashed {
            thread: me,
            name,
            message,
        });
        self.shared.turn.notify_all();
    }

    /// Whether the caller is a thread of a machine that has already halted.
    /// Such threads are unwinding and must leave the machine alone.
    fn stale(&self, state: &MachineState) -> bool {
        state.halt.is_some() && CURRENT.with(Cell::get).is_some()
    }

    /// Runs `f` in interrupt context, then puts the interrupted level back.
    fn deliver(&self, f: impl FnOnce(&Sim)) {
        let prior = {
            let mut state = self.lock();
            state.cpu.in_interrupt = true;
            mem::replace(&mut state.cpu.level, IrqLevel::HIGH)
        };
        trace!("interrupt entry");
        f(self);
        trace!("interrupt exit");
        let mut state = self.lock();
        state.cpu.in_interrupt = false;
        state.cpu.level = prior;
    }

    /// Runs the interrupts held back while the level was raised, in the order
    /// they were raised, for as long as the current level lets them in.
    fn deliver_pending(&self) {
        loop {
            let next = {
                let mut state = self.lock();
                if self.stale(&state) || !state.cpu.interrupts_deliverable() {
                    break;
                }
                state.pending_interrupts.pop_front()
            };
            match next {
                Some(handler) => self.deliver(handler),
                None => break,
            }
        }
    }

    /// Delivers a timer interrupt and preempts the current thread.
    fn timer_interrupt(&self) {
        let handler = {
            let mut state = self.lock();
            state.timer_ticks += 1;
            state.timer_handler.take()
        };
        if let Some(mut handler) = handler {
            self.deliver(|sim| handler(sim));
            self.deliver_pending();
            let mut state = self.lock();
            if state.timer_handler.is_none() {
                state.timer_handler = Some(handler);
            }
        }
        self.yield_now();
    }
}

impl Platform for Sim {
    fn current_thread(&self) -> ThreadHandle {
        match CURRENT.with(Cell::get) {
            Some(me) => me,
            None => self.fatal(format_args!("no simulated thread on this host thread")),
        }
    }

    fn in_interrupt(&self) -> bool {
        self.lock().cpu.in_interrupt
    }

    fn interrupt_level(&self) -> IrqLevel {
        self.lock().cpu.level
    }

    fn raise_to_max(&self) -> IrqLevel {
        let mut state = self.lock();
        if self.stale(&state) {
            return IrqLevel::HIGH;
        }
        mem::replace(&mut state.cpu.level, IrqLevel::HIGH)
    }

    fn restore(&self, level: IrqLevel) {
        let mut state = self.lock();
        if self.stale(&state) {
            return;
        }
        state.cpu.level = level;

        let deliverable = state.cpu.interrupts_deliverable()
            && state.threads.current_thread.is_some()
            && !std::thread::panicking();
        if !deliverable {
            return;
        }
        if !state.pending_interrupts.is_empty() {
            drop(state);
            self.deliver_pending();
            state = self.lock();
            if state.halt.is_some() {
                return;
            }
        }

        let p = state.preempt_probability;
        if p > 0.0 && state.timer_rng.gen_bool(p) {
            drop(state);
            self.timer_interrupt();
        }
    }

    fn block_current(&self) {
        let me = self.current_thread();
        let mut state = self.lock();
        if state.halt.is_some() {
            self.unwind(me, state);
        }
        if state.cpu.in_interrupt {
            drop(state);
            self.fatal(format_args!(
                "{} tried to sleep in an interrupt handler",
                me
            ));
        }
        let level = state.cpu.level;
        state.threads.block_current_thread(level);
        state.dispatch();
        self.shared.turn.notify_all();
        self.park(me, state);
    }

    fn wakeup(&self, thread: ThreadHandle) {
        let mut state = self.lock();
        if self.stale(&state) {
            return;
        }
        if state.threads.wake_thread(thread) {
            trace!("{} ready", thread);
        }
    }

    fn allocate(&self, bytes: usize) -> Result<(), AllocError> {
        let mut state = self.lock();
        if let Some(limit) = state.heap_limit {
            if state.heap_used + bytes > limit {
                debug!(
                    "heap exhausted: {} + {} > {}",
                    state.heap_used, bytes, limit
                );
                return Err(AllocError { requested: bytes });
            }
        }
        state.heap_used += bytes;
        Ok(())
    }

    fn deallocate(&self, bytes: usize) {
        let mut state = self.lock();
        state.heap_used = state.heap_used.saturating_sub(bytes);
    }

    fn fatal(&self, message: fmt::Arguments<'_>) -> ! {
        error!("fatal: {}", message);
        panic!("{}", message)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".into()
    }
}
