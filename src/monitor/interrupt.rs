//! # Interrupts
//!
//! A waiting caller can be asked to give up. The caller passes an [Interrupt] to the wait,
//! somebody else keeps a clone and calls [Interrupt::interrupt].
//!
//! - if the caller is asleep in a wait queue, it's woken and the wait returns [Error::Interrupted](crate::Error::Interrupted)
//! - otherwise the interrupt stays pending and the next interruptible wait fails right away
//!
//! Delivering the interrupt consumes it. A token can be shared: one interrupt wakes every caller
//! asleep on it at that moment.

use std::sync::Arc;

use log::debug;

use super::p2_wait_queue::Waiter;
use crate::spin::SpinLock;

#[derive(Default)]
struct Slot {
    pending: bool,
    /// who's asleep on this token right now
    waiters: Vec<Arc<Waiter>>,
}

#[derive(Clone, Default)]
pub struct Interrupt {
    slot: Arc<SpinLock<Slot>>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        let mut slot = self.slot.lock();
        // no short-circuit, every registered waiter has to get it
        let delivered = slot.waiters.iter().filter(|w| w.interrupt()).count();
        if delivered > 0 {
            debug!("interrupt delivered to {delivered} waiters");
        } else {
            // nobody's waiting, or they were all signaled first
            slot.pending = true;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().pending
    }

    pub fn clear(&self) {
        self.slot.lock().pending = false;
    }

    /// Called with the gate still held, right before going to sleep.
    /// The pending flag and the registration share one lock, so an interrupt
    /// either sees the waiter or leaves the flag for us to find here.
    pub(crate) fn register(&self, waiter: &Arc<Waiter>) {
        let mut slot = self.slot.lock();
        if std::mem::take(&mut slot.pending) {
            waiter.interrupt();
        }
        slot.waiters.push(Arc::clone(waiter));
    }

    /// Removes only `waiter`, the others sharing the token stay reachable.
    pub(crate) fn unregister(&self, waiter: &Arc<Waiter>) {
        self.slot
            .lock()
            .waiters
            .retain(|w| !Arc::ptr_eq(w, waiter));
    }

    #[cfg(test)]
    fn registered(&self) -> usize {
        self.slot.lock().waiters.len()
    }
}
