//! # Peterson's lock
//!
//! Mutual exclusion for exactly two parties with nothing but loads and stores.
//! Each party raises its flag, gives the turn away, then spins while the other one
//! is interested and has the turn.
//!
//! It only works with sequentially consistent ordering: the store of our flag and the load of
//! the other's flag must not be reordered, and Release/Acquire allows exactly that
//! (store-load reordering). With SeqCst all 4 operations are in a single total order.
//!
//! It spins, it's for two, and it needs SeqCst on every step. It's here for comparison
//! with the [Gate](crate::monitor::Gate), not for use.

use std::{
    cell::UnsafeCell,
    hint,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicBool, AtomicUsize,
        Ordering::{Acquire, Release, SeqCst},
    },
    thread,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    First,
    Second,
}

impl Party {
    fn index(self) -> usize {
        match self {
            Party::First => 0,
            Party::Second => 1,
        }
    }
}

pub struct PetersonLock<Y> {
    interested: [AtomicBool; 2],
    turn: AtomicUsize,
    /// keeps two threads from locking as the same party
    claimed: [AtomicBool; 2],
    value: UnsafeCell<Y>,
}

unsafe impl<Y> Sync for PetersonLock<Y> where Y: Send {}

impl<Y> PetersonLock<Y> {
    pub const fn new(value: Y) -> Self {
        Self {
            interested: [AtomicBool::new(false), AtomicBool::new(false)],
            turn: AtomicUsize::new(0),
            claimed: [AtomicBool::new(false), AtomicBool::new(false)],
            value: UnsafeCell::new(value),
        }
    }

    /// # Panics
    /// If `party` is already holding or waiting for the lock: the algorithm has no answer
    /// for two threads on the same side.
    pub fn lock(&self, party: Party) -> PetersonGuard<'_, Y> {
        let me = party.index();
        let other = 1 - me;

        if self.claimed[me].swap(true, Acquire) {
            panic!("{party:?} is already using the lock");
        }

        self.interested[me].store(true, SeqCst);
        self.turn.store(other, SeqCst);
        while self.interested[other].load(SeqCst) && self.turn.load(SeqCst) == other {
            hint::spin_loop();
        }

        PetersonGuard { lock: self, me }
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }
}

pub struct PetersonGuard<'a, Y> {
    lock: &'a PetersonLock<Y>,
    me: usize,
}

impl<Y> Deref for PetersonGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard exists only inside the critical section
        unsafe { &*self.lock.value.get() }
    }
}

impl<Y> DerefMut for PetersonGuard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard exists only inside the critical section
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<Y> Drop for PetersonGuard<'_, Y> {
    fn drop(&mut self) {
        self.lock.interested[self.me].store(false, SeqCst);
        self.lock.claimed[self.me].store(false, Release);
    }
}

/// Two threads count to a thousand each, without a single atomic read-modify-write on the counter.
pub fn run() {
    let lock = PetersonLock::new(0u32);
    thread::scope(|s| {
        for party in [Party::First, Party::Second] {
            let lock = &lock;
            s.spawn(move || {
                for _ in 0..1000 {
                    *lock.lock(party) += 1;
                }
            });
        }
    });
    let total = lock.into_inner();
    println!("counted to {total}");
}

#[cfg(test)]
mod test {
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::atomic::Ordering::Relaxed,
    };

    use super::*;

    #[test]
    fn test_mutual_exclusion() {
        let lock = PetersonLock::new(Vec::new());
        thread::scope(|s| {
            for party in [Party::First, Party::Second] {
                let lock = &lock;
                s.spawn(move || {
                    for i in 0..2000 {
                        let mut g = lock.lock(party);
                        // two pushes in a row, interleaving would break the pairs
                        g.push((party, i));
                        g.push((party, i));
                    }
                });
            }
        });

        let entries = lock.into_inner();
        assert_eq!(entries.len(), 8000);
        for pair in entries.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_same_party_twice_panics() {
        let lock = PetersonLock::new(());
        let _g = lock.lock(Party::First);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _again = lock.lock(Party::First);
        }));
        assert!(result.is_err());
        // the failed attempt didn't reset the claim of the real holder
        assert!(lock.claimed[0].load(Relaxed));
    }
}
