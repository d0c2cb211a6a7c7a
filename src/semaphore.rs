//! # Semaphore
//!
//! A counter of permits on top of a [Monitor]: acquiring waits while there are none left,
//! releasing adds one back and wakes a single waiter. One waiter is enough, one permit
//! can only let one of them through.

use std::{thread, time::Duration};

use log::error;

use crate::{
    config::{Config, GateConfig},
    error::Result,
    monitor::{Interrupt, Monitor},
};

pub struct Semaphore {
    monitor: Monitor<usize>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self::with_config(permits, &GateConfig::default())
    }

    pub fn with_config(permits: usize, config: &GateConfig) -> Self {
        Self {
            monitor: Monitor::with_config(permits, config),
        }
    }

    pub fn available(&self) -> usize {
        *self.monitor.lock()
    }

    /// Waits for a permit. It goes back when the [Permit] is dropped.
    pub fn acquire(&self) -> Result<Permit<'_>> {
        self.take(None)
    }

    pub fn acquire_interruptibly(&self, interrupt: &Interrupt) -> Result<Permit<'_>> {
        self.take(Some(interrupt))
    }

    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut op = self.monitor.begin("try_acquire");
        let permits = op.state_mut();
        let acquired = *permits > 0;
        if acquired {
            *permits -= 1;
        }
        op.finish();
        acquired.then(|| Permit { semaphore: self })
    }

    fn take(&self, interrupt: Option<&Interrupt>) -> Result<Permit<'_>> {
        let op = match interrupt {
            Some(interrupt) => self.monitor.begin_interruptible("acquire", interrupt),
            None => self.monitor.begin("acquire"),
        };
        let mut op = op.wait_while(&(), |permits| *permits == 0)?;
        *op.state_mut() -= 1;
        op.finish();
        Ok(Permit { semaphore: self })
    }

    /// Adds a permit. Also usable on its own, e.g. to signal "done" from another thread.
    pub fn release(&self) -> Result<()> {
        let mut op = self.monitor.begin("release");
        *op.state_mut() += 1;
        op.signal_one(&())?;
        op.finish();
        Ok(())
    }
}

/// A taken permit, given back on drop.
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Permit<'_> {
    /// Keeps the permit taken for good.
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.semaphore.release() {
            error!("failed to give a permit back: {e}");
        }
    }
}

/// Five workers share two permits.
pub fn run(config: &Config) {
    let semaphore = Semaphore::with_config(2, &config.gate());
    thread::scope(|s| {
        for worker in 0..5 {
            let semaphore = &semaphore;
            s.spawn(move || match semaphore.acquire() {
                Ok(_permit) => {
                    println!("worker {worker} got a permit");
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => println!("worker {worker} gave up: {e}"),
            });
        }
    });
    println!("permits left: {}", semaphore.available());
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering::Relaxed},
        thread::{scope, sleep},
    };

    use super::*;
    use crate::error::Error;

    #[test]
    fn test_limits_concurrency() {
        let semaphore = Semaphore::new(3);
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        scope(|s| {
            for _ in 0..10 {
                s.spawn(|| {
                    for _ in 0..20 {
                        let _permit = semaphore.acquire().unwrap();
                        let now = inside.fetch_add(1, Relaxed) + 1;
                        max_inside.fetch_max(now, Relaxed);
                        thread::yield_now();
                        inside.fetch_sub(1, Relaxed);
                    }
                });
            }
        });

        assert!(max_inside.load(Relaxed) <= 3);
        assert_eq!(semaphore.available(), 3);
    }

    #[test]
    fn test_try_acquire() {
        let semaphore = Semaphore::new(1);
        let permit = semaphore.try_acquire();
        assert!(permit.is_some());
        assert!(semaphore.try_acquire().is_none());
        drop(permit);
        assert_eq!(semaphore.available(), 1);

        semaphore.try_acquire().unwrap().forget();
        assert_eq!(semaphore.available(), 0);
    }

    #[test]
    fn test_release_wakes_waiter() {
        let semaphore = Semaphore::new(0);
        scope(|s| {
            let h = s.spawn(|| semaphore.acquire().map(Permit::forget));
            sleep(Duration::from_millis(20));
            assert!(!h.is_finished());
            semaphore.release().unwrap();
            assert_eq!(h.join().unwrap(), Ok(()));
        });
        assert_eq!(semaphore.available(), 0);
    }

    #[test]
    fn test_interrupted_acquire() {
        let semaphore = Semaphore::new(0);
        let interrupt = Interrupt::new();
        scope(|s| {
            let h = s.spawn(|| semaphore.acquire_interruptibly(&interrupt).map(Permit::forget));
            sleep(Duration::from_millis(20));
            interrupt.interrupt();
            assert_eq!(h.join().unwrap(), Err(Error::Interrupted));
        });

        // the permit released afterwards isn't lost on the cancelled waiter
        semaphore.release().unwrap();
        assert_eq!(semaphore.available(), 1);
    }
}
