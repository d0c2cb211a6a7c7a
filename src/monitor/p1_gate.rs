//! # Gate
//!
//! The mutual exclusion part of a monitor. At most one thread holds the gate at a time,
//! and the state behind it is only reachable through a [GateGuard].
//!
//! It's a futex-style lock: a `u32` state word plus `wait` / `wake` from the `atomic-wait` crate
//! to sleep while the gate is taken. Wait and wake don't take part in correctness,
//! they only spare us from burning cycles.
//!
//! ## Ownership tracking
//!
//! On top of the state word the gate remembers which thread holds it. That costs a relaxed
//! store per acquire and buys two checks:
//! - acquiring a gate the current thread already holds is reported instead of deadlocking forever
//! - releasing a gate the current thread doesn't hold (including a second release) is rejected
//!   and the gate stays as it was
//!
//! Because of that, a [GateGuard] isn't `Send`: the thread that acquired is the one that releases.
//!
//! ## Fairness
//!
//! [Fairness::Barging] is the usual 3-state mutex:
//! - 0 - unlocked
//! - 1 - locked, no other threads
//! - 2 - locked, other threads are (possibly) sleeping
//!
//! A contended acquirer spins for `spin_limit` rounds, then sleeps. The release only calls `wake_one`
//! when the state says somebody sleeps. The woken thread races with everybody else, so there's no
//! promise on who goes next.
//!
//! [Fairness::Ticket] hands out tickets from the state word and serves them in order through a second
//! word. Each release bumps `serving` and wakes all sleepers, only the one with the matching ticket proceeds.
//! Bounded contention can't starve anybody, the price is a thundering herd on every release.

use std::{
    cell::UnsafeCell,
    hint,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicU32, AtomicU64,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use atomic_wait::{wait, wake_all, wake_one};
use log::{error, trace};

use crate::{
    config::{Fairness, GateConfig},
    error::GateError,
};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// 0 is reserved for "nobody"
const NOBODY: u64 = 0;

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // ThreadId can't be turned into an integer on stable, so every thread draws its own token
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Relaxed);
}

fn current_thread() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

/// The gate without any data behind it. See the module docs.
pub struct RawGate {
    id: u64,
    fairness: Fairness,
    spin_limit: u32,
    /// barging: 0/1/2, ticket: the next ticket to hand out
    state: AtomicU32,
    /// ticket: the ticket being served
    serving: AtomicU32,
    owner: AtomicU64,
}

impl RawGate {
    pub fn new() -> Self {
        Self::with_config(&GateConfig::default())
    }

    pub fn with_config(config: &GateConfig) -> Self {
        Self {
            id: NEXT_GATE_ID.fetch_add(1, Relaxed),
            fairness: config.fairness,
            spin_limit: config.spin_limit,
            state: AtomicU32::new(UNLOCKED),
            serving: AtomicU32::new(0),
            owner: AtomicU64::new(NOBODY),
        }
    }

    /// Process-unique and never 0. Wait queues use it to remember their gate.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn fairness(&self) -> Fairness {
        self.fairness
    }

    /// Only the current thread ever stores its own token, so a relaxed load is enough
    /// to tell if it's us.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Relaxed) == current_thread()
    }

    /// Blocks until the gate is ours.
    pub fn acquire(&self) -> Result<(), GateError> {
        let me = current_thread();
        if self.owner.load(Relaxed) == me {
            error!("gate {}: re-entrant acquire", self.id);
            return Err(GateError::Reentrant);
        }

        match self.fairness {
            Fairness::Barging => self.acquire_barging(),
            Fairness::Ticket => self.acquire_ticket(),
        }

        self.owner.store(me, Relaxed);
        Ok(())
    }

    /// Takes the gate if it's free right now, never sleeps.
    pub fn try_acquire(&self) -> Result<bool, GateError> {
        let me = current_thread();
        if self.owner.load(Relaxed) == me {
            return Err(GateError::Reentrant);
        }

        let acquired = match self.fairness {
            Fairness::Barging => self
                .state
                .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
                .is_ok(),
            Fairness::Ticket => {
                // the gate is free iff nobody holds a ticket that isn't served yet
                let serving = self.serving.load(Acquire);
                self.state
                    .compare_exchange(serving, serving.wrapping_add(1), Acquire, Relaxed)
                    .is_ok()
            }
        };

        if acquired {
            self.owner.store(me, Relaxed);
        }
        Ok(acquired)
    }

    /// Hands the gate over to whoever comes next.
    /// Only the holder may do it, anyone else gets [GateError::NotHeld] and the gate is left alone.
    pub fn release(&self) -> Result<(), GateError> {
        if self
            .owner
            .compare_exchange(current_thread(), NOBODY, Relaxed, Relaxed)
            .is_err()
        {
            error!("gate {}: release by a thread that doesn't hold it", self.id);
            return Err(GateError::NotHeld);
        }

        match self.fairness {
            Fairness::Barging => {
                // wake somebody only if somebody said they're sleeping
                if self.state.swap(UNLOCKED, Release) == CONTENDED {
                    wake_one(&self.state);
                }
            }
            Fairness::Ticket => {
                self.serving.fetch_add(1, Release);
                // we can't tell which sleeper has the next ticket
                wake_all(&self.serving);
            }
        }
        Ok(())
    }

    fn acquire_barging(&self) {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            self.acquire_barging_contended();
        }
    }

    #[cold]
    fn acquire_barging_contended(&self) {
        let mut spin_count = 0;

        // only spin on 1, 2 means somebody already gave up and went to sleep
        while self.state.load(Relaxed) == LOCKED && spin_count < self.spin_limit {
            spin_count += 1;
            hint::spin_loop();
        }

        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok()
        {
            return;
        }

        trace!("gate {}: sleeping until released", self.id);
        // leave 2 behind so the release doesn't skip the other sleepers
        while self.state.swap(CONTENDED, Acquire) != UNLOCKED {
            wait(&self.state, CONTENDED);
        }
    }

    fn acquire_ticket(&self) {
        let ticket = self.state.fetch_add(1, Relaxed);
        let mut spin_count = 0;
        loop {
            let serving = self.serving.load(Acquire);
            if serving == ticket {
                return;
            }
            if spin_count < self.spin_limit {
                spin_count += 1;
                hint::spin_loop();
            } else {
                // returns right away if serving moved on since the load
                wait(&self.serving, serving);
            }
        }
    }
}

impl Default for RawGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A [RawGate] with the state it guards.
pub struct Gate<T> {
    raw: RawGate,
    value: UnsafeCell<T>,
}

// it's safe to share the gate as long as the state can be sent to whoever holds the gate
unsafe impl<T> Sync for Gate<T> where T: Send {}

impl<T> Gate<T> {
    pub fn new(value: T) -> Self {
        Self::with_config(value, &GateConfig::default())
    }

    pub fn with_config(value: T, config: &GateConfig) -> Self {
        Self {
            raw: RawGate::with_config(config),
            value: UnsafeCell::new(value),
        }
    }

    pub fn id(&self) -> u64 {
        self.raw.id()
    }

    pub fn raw(&self) -> &RawGate {
        &self.raw
    }

    /// # Panics
    /// If the current thread already holds the gate: that's a deadlock otherwise.
    pub fn lock(&self) -> GateGuard<'_, T> {
        if let Err(e) = self.raw.acquire() {
            panic!("gate {}: {e}", self.raw.id());
        }
        GateGuard::new(self)
    }

    /// `None` if the gate is taken, including by the current thread.
    pub fn try_lock(&self) -> Option<GateGuard<'_, T>> {
        match self.raw.try_acquire() {
            Ok(true) => Some(GateGuard::new(self)),
            _ => None,
        }
    }

    /// No locking needed, `&mut self` proves there are no other users.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for Gate<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// The proof that the gate is held. Dropping it is the only way to release the gate,
/// so it's released on every exit path: returns, `?`, panics.
pub struct GateGuard<'a, T> {
    pub(crate) gate: &'a Gate<T>,
    /// not Send - the acquiring thread has to be the releasing one
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T> Sync for GateGuard<'_, T> where T: Sync {}

impl<'a, T> GateGuard<'a, T> {
    fn new(gate: &'a Gate<T>) -> Self {
        Self {
            gate,
            _not_send: PhantomData,
        }
    }

    pub fn gate_id(&self) -> u64 {
        self.gate.id()
    }
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard exists only while the gate is held
        unsafe { &*self.gate.value.get() }
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard exists only while the gate is held
        unsafe { &mut *self.gate.value.get() }
    }
}

impl<T> Drop for GateGuard<'_, T> {
    fn drop(&mut self) {
        // the guard can't outlive or leave its thread, so this is a broken invariant
        if let Err(e) = self.gate.raw.release() {
            error!("gate {}: guard release failed: {e}", self.gate.id());
        }
    }
}
