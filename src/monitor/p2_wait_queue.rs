//! # Wait queue
//!
//! The condition variable part of a monitor. The interface is the usual one:
//! - `wait` releases the gate, sleeps until signaled, then takes the gate again
//! - `signal_one` wakes one waiter
//! - `signal_all` wakes all the current waiters
//!
//! Unlike the counter-based condvar (a single futex word everybody sleeps on), every waiter
//! here gets its own little state word and a place in the queue. It costs an allocation per wait,
//! and in exchange:
//! - `signal_one` wakes exactly one waiter, not "probably one"
//! - there are no spurious wake-ups from our side (callers still loop, see [WaitQueue::wait_while])
//! - a single waiter can be woken by an [Interrupt] without disturbing the others
//!
//! ## Signal and continue
//!
//! Signaling takes `&GateGuard`, so the signaler has to hold the gate and keeps holding it.
//! Woken waiters compete for the gate once the signaler lets it go, and the state they waited for
//! may be gone by then. Hence the loop.
//!
//! ## Binding
//!
//! A queue belongs to the first gate it's used with. Using it with another gate afterwards is
//! [Error::GateMismatch]: waiting on a queue while holding an unrelated gate is a lost wake-up
//! waiting to happen.
//!
//! ## Signals vs interrupts
//!
//! A waiter's word goes from `WAITING` to either `SIGNALED` or `INTERRUPTED` exactly once,
//! whoever wins the compare-exchange decides. A signal that loses to an interrupt is handed to the
//! next waiter, so cancelled callers don't swallow wake-ups meant for somebody else.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{
            AtomicU32, AtomicU64,
            Ordering::{Acquire, Relaxed, Release},
        },
        Arc,
    },
};

use atomic_wait::{wait, wake_one};
use log::{debug, error};

use super::{interrupt::Interrupt, p1_gate::GateGuard};
use crate::{
    error::{Error, Result},
    spin::SpinLock,
};

const WAITING: u32 = 0;
const SIGNALED: u32 = 1;
const INTERRUPTED: u32 = 2;

/// One suspended caller.
pub(crate) struct Waiter {
    state: AtomicU32,
}

impl Waiter {
    fn new() -> Self {
        Self {
            state: AtomicU32::new(WAITING),
        }
    }

    /// `false` if the waiter was already signaled or interrupted
    fn settle(&self, outcome: u32) -> bool {
        if self
            .state
            .compare_exchange(WAITING, outcome, Release, Relaxed)
            .is_ok()
        {
            wake_one(&self.state);
            true
        } else {
            false
        }
    }

    fn signal(&self) -> bool {
        self.settle(SIGNALED)
    }

    pub(crate) fn interrupt(&self) -> bool {
        self.settle(INTERRUPTED)
    }

    fn park(&self) -> u32 {
        loop {
            let state = self.state.load(Acquire);
            if state != WAITING {
                return state;
            }
            wait(&self.state, WAITING);
        }
    }
}

#[derive(Default)]
pub struct WaitQueue {
    /// id of the bound gate, 0 - not bound yet
    gate: AtomicU64,
    waiters: SpinLock<VecDeque<Arc<Waiter>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            gate: AtomicU64::new(0),
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// How many callers are suspended right now.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn gate_id(&self) -> Option<u64> {
        match self.gate.load(Relaxed) {
            0 => None,
            id => Some(id),
        }
    }

    fn bind(&self, gate: u64) -> Result<()> {
        match self.gate.compare_exchange(0, gate, Relaxed, Relaxed) {
            Ok(_) => Ok(()),
            Err(bound) if bound == gate => Ok(()),
            Err(bound) => {
                error!("wait queue of gate {bound} used with gate {gate}");
                Err(Error::GateMismatch {
                    expected: bound,
                    found: gate,
                })
            }
        }
    }

    /// Releases the gate, sleeps until signaled, then re-acquires the gate.
    ///
    /// The state may have changed again by the time we get the gate back,
    /// so check the condition in a loop or use [WaitQueue::wait_while].
    pub fn wait<'a, T>(&self, guard: GateGuard<'a, T>) -> Result<GateGuard<'a, T>> {
        self.suspend(guard, None)
    }

    /// Same as [WaitQueue::wait], but gives up with [Error::Interrupted] once `interrupt` fires.
    /// An interrupted caller doesn't get the gate back.
    pub fn wait_interruptibly<'a, T>(
        &self,
        guard: GateGuard<'a, T>,
        interrupt: &Interrupt,
    ) -> Result<GateGuard<'a, T>> {
        self.suspend(guard, Some(interrupt))
    }

    /// Waits as long as `predicate` holds. Checks it before the first wait too.
    pub fn wait_while<'a, T>(
        &self,
        mut guard: GateGuard<'a, T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> Result<GateGuard<'a, T>> {
        while predicate(&mut *guard) {
            guard = self.wait(guard)?;
        }
        Ok(guard)
    }

    pub fn wait_while_interruptibly<'a, T>(
        &self,
        mut guard: GateGuard<'a, T>,
        interrupt: &Interrupt,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> Result<GateGuard<'a, T>> {
        while predicate(&mut *guard) {
            guard = self.wait_interruptibly(guard, interrupt)?;
        }
        Ok(guard)
    }

    fn suspend<'a, T>(
        &self,
        guard: GateGuard<'a, T>,
        interrupt: Option<&Interrupt>,
    ) -> Result<GateGuard<'a, T>> {
        let gate = guard.gate;
        self.bind(gate.id())?;

        // enqueue while still holding the gate: no signal can slip in between.
        // Registered before it's visible in the queue, so whoever sees it there can interrupt it.
        let waiter = Arc::new(Waiter::new());
        if let Some(interrupt) = interrupt {
            interrupt.register(&waiter);
        }
        self.waiters.lock().push_back(Arc::clone(&waiter));

        drop(guard);
        debug!("gate {}: waiting", gate.id());
        let outcome = waiter.park();

        if let Some(interrupt) = interrupt {
            interrupt.unregister(&waiter);
        }

        if outcome == SIGNALED {
            debug!("gate {}: signaled, re-acquiring", gate.id());
            return Ok(gate.lock());
        }

        // a signal may have popped us already, otherwise we're still in the queue
        self.waiters.lock().retain(|w| !Arc::ptr_eq(w, &waiter));
        debug!("gate {}: wait interrupted", gate.id());
        Err(Error::Interrupted)
    }

    /// Wakes one waiter if there's any. The choice of the waiter isn't specified.
    pub fn signal_one<T>(&self, guard: &GateGuard<'_, T>) -> Result<bool> {
        self.bind(guard.gate_id())?;
        loop {
            let Some(waiter) = self.waiters.lock().pop_front() else {
                return Ok(false);
            };
            if waiter.signal() {
                debug!("gate {}: signaled one waiter", guard.gate_id());
                return Ok(true);
            }
            // it got interrupted in the meantime, pass the signal on
        }
    }

    /// Wakes all current waiters, returns how many. Callers that start waiting later aren't affected.
    pub fn signal_all<T>(&self, guard: &GateGuard<'_, T>) -> Result<usize> {
        self.bind(guard.gate_id())?;
        let waiters: Vec<_> = self.waiters.lock().drain(..).collect();
        let woken = waiters.iter().filter(|w| w.signal()).count();
        if woken > 0 {
            debug!("gate {}: signaled {woken} waiters", guard.gate_id());
        }
        Ok(woken)
    }
}
