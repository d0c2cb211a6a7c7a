//! # Bounded buffer
//!
//! The producer/consumer queue: a `VecDeque` behind a monitor with two conditions.
//! Producers sleep on [Slot::NotFull], consumers on [Slot::NotEmpty], and each side
//! only wakes the other one.
//!
//! Compared to a single condvar for both sides, a put never wakes another producer
//! and a take never wakes another consumer.

use std::{collections::VecDeque, thread};

use crate::{
    config::{Config, GateConfig},
    error::{Error, Result},
    monitor::{Interrupt, Monitor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    NotFull,
    NotEmpty,
}

pub struct BoundedBuffer<T> {
    monitor: Monitor<VecDeque<T>, Slot>,
    capacity: usize,
}

impl<T> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_config(capacity, &GateConfig::default())
    }

    pub fn with_config(capacity: usize, config: &GateConfig) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        Ok(Self {
            monitor: Monitor::with_config(VecDeque::with_capacity(capacity), config),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.monitor.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for a free slot.
    pub fn put(&self, item: T) -> Result<()> {
        self.push(item, None)
    }

    /// An interrupted put drops the item.
    pub fn put_interruptibly(&self, item: T, interrupt: &Interrupt) -> Result<()> {
        self.push(item, Some(interrupt))
    }

    /// Waits for an item.
    pub fn take(&self) -> Result<T> {
        self.pop(None)
    }

    pub fn take_interruptibly(&self, interrupt: &Interrupt) -> Result<T> {
        self.pop(Some(interrupt))
    }

    fn push(&self, item: T, interrupt: Option<&Interrupt>) -> Result<()> {
        let op = match interrupt {
            Some(interrupt) => self.monitor.begin_interruptible("put", interrupt),
            None => self.monitor.begin("put"),
        };
        let capacity = self.capacity;
        let mut op = op.wait_while(&Slot::NotFull, |queue| queue.len() >= capacity)?;
        op.state_mut().push_back(item);
        op.signal_one(&Slot::NotEmpty)?;
        op.finish();
        Ok(())
    }

    fn pop(&self, interrupt: Option<&Interrupt>) -> Result<T> {
        let mut op = match interrupt {
            Some(interrupt) => self.monitor.begin_interruptible("take", interrupt),
            None => self.monitor.begin("take"),
        };
        loop {
            if let Some(item) = op.state_mut().pop_front() {
                op.signal_one(&Slot::NotFull)?;
                op.finish();
                return Ok(item);
            }
            op = op.wait(&Slot::NotEmpty)?;
        }
    }
}

/// Two producers, one consumer, room for two items.
pub fn run(config: &Config) {
    let buffer = match BoundedBuffer::with_config(2, &config.gate()) {
        Ok(buffer) => buffer,
        Err(e) => {
            println!("can't make a buffer: {e}");
            return;
        }
    };

    thread::scope(|s| {
        for producer in 0..2 {
            let buffer = &buffer;
            s.spawn(move || {
                for i in 0..5 {
                    if let Err(e) = buffer.put(producer * 100 + i) {
                        println!("producer {producer} stopped: {e}");
                        return;
                    }
                }
            });
        }

        let mut received = Vec::new();
        for _ in 0..10 {
            match buffer.take() {
                Ok(item) => received.push(item),
                Err(e) => println!("consumer stopped: {e}"),
            }
        }
        println!("received {received:?}");
    });
}
