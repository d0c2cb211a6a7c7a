/*
 * A tiny spin lock for the bookkeeping that lives next to the gate:
 * the list of waiters in a wait queue, the slot of an interrupt token,
 * the map of per-key queues in a monitor.
 *
 * Those critical sections are a handful of instructions long,
 * so sleeping on them would cost more than spinning.
 * It also can't be the gate itself - waiters have to enqueue themselves
 * while the gate is still held and signalers dequeue while holding it.
 */

use std::{
    cell::UnsafeCell,
    hint,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicBool,
        Ordering::{Acquire, Relaxed, Release},
    },
};

pub(crate) struct SpinLock<Y> {
    locked: AtomicBool,
    value: UnsafeCell<Y>,
}

// we promise the compiler the value only gets touched by the lock holder
unsafe impl<Y> Sync for SpinLock<Y> where Y: Send {}

impl<Y> SpinLock<Y> {
    pub(crate) const fn new(value: Y) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub(crate) fn lock(&self) -> SpinGuard<'_, Y> {
        // Acquire makes sure the previous holder happens-before us
        while self.locked.swap(true, Acquire) {
            // spin on a plain load, the swap would bounce the cache line around
            while self.locked.load(Relaxed) {
                hint::spin_loop();
            }
        }
        SpinGuard { lock: self }
    }
}

impl<Y: Default> Default for SpinLock<Y> {
    fn default() -> Self {
        Self::new(Y::default())
    }
}

pub(crate) struct SpinGuard<'a, Y> {
    lock: &'a SpinLock<Y>,
}

impl<Y> Deref for SpinGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: existence of the guard means the lock is taken
        unsafe { &*self.lock.value.get() }
    }
}

impl<Y> DerefMut for SpinGuard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: existence of the guard means the lock is taken
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<Y> Drop for SpinGuard<'_, Y> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Release);
    }
}

#[cfg(test)]
mod test {
    use std::{collections::VecDeque, sync::Arc, thread};

    use super::*;

    #[test]
    fn test_enqueue_and_leave() {
        // the way waiters use it: push a handle, later take exactly that handle out again
        let queue: SpinLock<VecDeque<Arc<usize>>> = SpinLock::default();
        thread::scope(|s| {
            for t in 0..4 {
                let queue = &queue;
                s.spawn(move || {
                    let mine: Vec<_> = (0..200).map(|i| Arc::new(t * 1000 + i)).collect();
                    for handle in &mine {
                        queue.lock().push_back(Arc::clone(handle));
                    }
                    for handle in &mine {
                        let mut q = queue.lock();
                        let before = q.len();
                        q.retain(|h| !Arc::ptr_eq(h, handle));
                        assert_eq!(before - q.len(), 1);
                    }
                });
            }
        });
        assert!(queue.lock().is_empty());
    }
}
