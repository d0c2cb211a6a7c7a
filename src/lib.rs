pub mod bank;
pub mod buffer;
pub mod config;
pub mod error;
pub mod monitor;
pub mod peterson;
pub mod semaphore;
mod spin;

pub use config::{Config, Fairness, GateConfig};
pub use error::{Error, GateError, Result};
