//! # Monitor and its operations
//!
//! A [Monitor] is a [Gate] plus a set of [WaitQueue]s indexed by a key. One queue per key
//! lets an operation wake only the waiters that care: one queue per bank account instead of
//! waking every pending transfer whenever any balance changes.
//!
//! An [Operation] is one named unit of work against the monitor's state. It walks through
//! [Phase]s:
//!
//! ```text
//! Requesting -> Holding <-> Waiting
//!                  |           |
//!              Releasing       | interrupted
//!                  |           |
//!                 Done <-------+
//! ```
//!
//! A key's queue exists only while somebody sleeps on it: waiting creates it, a signal that leaves it
//! empty removes it. Both happen under the gate, so nobody can be about to enqueue on a queue that's
//! being removed. Keys that are only ever signaled cost nothing.
//!
//! There's no error phase. An operation that can't succeed returns a failure value from `Holding`,
//! only interrupts (and misuse) come back as errors.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use log::trace;
use strum_macros::Display;

use super::{
    interrupt::Interrupt,
    p1_gate::{Gate, GateGuard},
    p2_wait_queue::WaitQueue,
};
use crate::{config::GateConfig, error::Result, spin::SpinLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Requesting,
    Holding,
    Waiting,
    Releasing,
    Done,
}

impl Phase {
    pub fn can_become(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Requesting, Holding)
                | (Holding, Waiting)
                | (Waiting, Holding)
                | (Waiting, Done)
                | (Holding, Releasing)
                | (Releasing, Done)
        )
    }
}

pub struct Monitor<S, K = ()> {
    gate: Gate<S>,
    conditions: SpinLock<HashMap<K, Arc<WaitQueue>>>,
}

impl<S, K> Monitor<S, K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(state: S) -> Self {
        Self::with_config(state, &GateConfig::default())
    }

    pub fn with_config(state: S, config: &GateConfig) -> Self {
        Self {
            gate: Gate::with_config(state, config),
            conditions: SpinLock::new(HashMap::new()),
        }
    }

    pub fn gate(&self) -> &Gate<S> {
        &self.gate
    }

    /// Plain access, no phases and no logging.
    pub fn lock(&self) -> GateGuard<'_, S> {
        self.gate.lock()
    }

    /// How many callers sleep on `key` right now.
    pub fn waiting(&self, key: &K) -> usize {
        self.conditions.lock().get(key).map_or(0, |queue| queue.len())
    }

    /// How many keys have a queue at the moment.
    pub fn conditions(&self) -> usize {
        self.conditions.lock().len()
    }

    /// Only with the gate held: the queue for `key`, created if needed.
    fn queue(&self, key: &K) -> Arc<WaitQueue> {
        Arc::clone(self.conditions.lock().entry(key.clone()).or_default())
    }

    fn find(&self, key: &K) -> Option<Arc<WaitQueue>> {
        self.conditions.lock().get(key).cloned()
    }

    /// Only with the gate held: drops the queue of `key` if nobody's on it.
    fn prune(&self, key: &K) {
        let mut conditions = self.conditions.lock();
        if conditions.get(key).is_some_and(|queue| queue.is_empty()) {
            conditions.remove(key);
        }
    }

    /// Waits for the gate and starts an operation. The waits of this operation can't be interrupted.
    pub fn begin(&self, name: &'static str) -> Operation<'_, S, K> {
        self.enter(name, None)
    }

    pub fn begin_interruptible<'m>(
        &'m self,
        name: &'static str,
        interrupt: &'m Interrupt,
    ) -> Operation<'m, S, K> {
        self.enter(name, Some(interrupt))
    }

    fn enter<'m>(
        &'m self,
        name: &'static str,
        interrupt: Option<&'m Interrupt>,
    ) -> Operation<'m, S, K> {
        trace!("{name}: {}", Phase::Requesting);
        let guard = self.gate.lock();
        let mut op = Operation {
            name,
            monitor: self,
            interrupt,
            guard,
            phase: Phase::Requesting,
            waits: 0,
        };
        op.transition(Phase::Holding);
        op
    }

    pub fn into_inner(self) -> S {
        self.gate.into_inner()
    }
}

/// A running operation. Holds the gate from [Monitor::begin] until [Operation::finish] or drop.
pub struct Operation<'m, S, K> {
    name: &'static str,
    monitor: &'m Monitor<S, K>,
    interrupt: Option<&'m Interrupt>,
    guard: GateGuard<'m, S>,
    phase: Phase,
    waits: usize,
}

impl<S, K> Operation<'_, S, K>
where
    K: Eq + Hash + Clone,
{
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// How many times the operation went to sleep and came back.
    pub fn waits(&self) -> usize {
        self.waits
    }

    pub fn state(&self) -> &S {
        &self.guard
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.guard
    }

    /// # Panics
    /// On a transition the state machine doesn't have - that's a bug in this module.
    fn transition(&mut self, next: Phase) {
        assert!(
            self.phase.can_become(next),
            "{}: illegal transition {} -> {next}",
            self.name,
            self.phase
        );
        trace!("{}: {} -> {next}", self.name, self.phase);
        self.phase = next;
    }

    /// Sleeps on the `key` queue once, until signaled or interrupted.
    ///
    /// Takes the operation by value: if the wait is interrupted, the gate is gone
    /// and so is the operation.
    pub fn wait(mut self, key: &K) -> Result<Self> {
        let queue = self.monitor.queue(key);
        self.transition(Phase::Waiting);
        let Operation {
            name,
            monitor,
            interrupt,
            guard,
            phase,
            waits,
        } = self;

        let resumed = match interrupt {
            Some(interrupt) => queue.wait_interruptibly(guard, interrupt),
            None => queue.wait(guard),
        };
        let guard = match resumed {
            Ok(guard) => guard,
            Err(e) => {
                trace!("{name}: {phase} -> {}", Phase::Done);
                return Err(e);
            }
        };

        // the gate is ours again, a queue left empty by interrupted waiters can go
        monitor.prune(key);
        let mut op = Operation {
            name,
            monitor,
            interrupt,
            guard,
            phase,
            waits: waits + 1,
        };
        op.transition(Phase::Holding);
        Ok(op)
    }

    /// Sleeps on the `key` queue as long as `predicate` holds. Checks it before the first wait too.
    pub fn wait_while(
        mut self,
        key: &K,
        mut predicate: impl FnMut(&mut S) -> bool,
    ) -> Result<Self> {
        while predicate(&mut *self.guard) {
            self = self.wait(key)?;
        }
        Ok(self)
    }

    pub fn signal_one(&self, key: &K) -> Result<bool> {
        let Some(queue) = self.monitor.find(key) else {
            return Ok(false);
        };
        let woken = queue.signal_one(&self.guard)?;
        self.monitor.prune(key);
        Ok(woken)
    }

    pub fn signal_all(&self, key: &K) -> Result<usize> {
        let Some(queue) = self.monitor.find(key) else {
            return Ok(0);
        };
        let woken = queue.signal_all(&self.guard)?;
        self.monitor.prune(key);
        Ok(woken)
    }

    /// Releases the gate and ends the operation.
    pub fn finish(mut self) {
        self.transition(Phase::Releasing);
        let name = self.name;
        let phase = self.phase;
        drop(self.guard);
        trace!("{name}: {phase} -> {}", Phase::Done);
    }
}
