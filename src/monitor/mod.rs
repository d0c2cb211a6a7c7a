//! # Monitors
//!
//! A monitor pairs mutual exclusion with condition waiting:
//! - the [Gate] lets one operation at a time touch the guarded state
//! - [WaitQueue]s let an operation sleep, with the gate released, until another operation
//!   changes the state and signals
//!
//! A caller that finds its precondition unmet doesn't spin and doesn't fail,
//! it waits and re-checks once signaled:
//!
//! ```text
//! acquire -> check -> (wait -> re-acquire -> check)* -> mutate -> signal -> release
//! ```
//!
//! The parts are built bottom-up:
//! 1. [p1_gate] - the futex-based lock with scoped release and ownership checks
//! 2. [p2_wait_queue] - per-waiter condition queues bound to one gate
//! 3. [p3_operation] - the [Monitor] with keyed queues and the [Operation] state machine
//!
//! [interrupt] lets somebody cancel a waiting caller.

pub mod interrupt;
pub mod p1_gate;
pub mod p2_wait_queue;
pub mod p3_operation;

pub use interrupt::Interrupt;
pub use p1_gate::{Gate, GateGuard, RawGate};
pub use p2_wait_queue::WaitQueue;
pub use p3_operation::{Monitor, Operation, Phase};
