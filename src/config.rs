//! # Configuration
//!
//! The only knobs are how the gate hands itself over: who gets it next and how long
//! an acquirer spins before asking the OS to put it to sleep.
//!
//! Both are read from the environment:
//! - `MONITOR_FAIRNESS` - `barging` (default) or `ticket`
//! - `MONITOR_SPIN_LIMIT` - spin iterations before sleeping, `100` by default

use std::{env, str::FromStr};

use strum_macros::{Display, EnumIter, EnumString};

use crate::error::{Error, Result};

pub const FAIRNESS_VAR: &str = "MONITOR_FAIRNESS";
pub const SPIN_LIMIT_VAR: &str = "MONITOR_SPIN_LIMIT";

/// Who wins the gate once it's released.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Fairness {
    /// Any thread may grab the gate, including one that just arrived.
    /// Fast when uncontended, no promise on who's next.
    #[default]
    Barging,
    /// Every acquirer draws a ticket and waits to be served.
    /// Nobody gets postponed forever while contention is bounded.
    Ticket,
}

/// What a single gate needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub fairness: Fairness,
    pub spin_limit: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            fairness: Fairness::default(),
            spin_limit: 100,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Config {
    pub gate: GateConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [Config::from_env], but the values come from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut gate = GateConfig::default();

        if let Some(value) = lookup(FAIRNESS_VAR) {
            gate.fairness = Fairness::from_str(value.trim()).map_err(|_| Error::Config {
                key: FAIRNESS_VAR,
                value,
            })?;
        }

        if let Some(value) = lookup(SPIN_LIMIT_VAR) {
            gate.spin_limit = value.trim().parse().map_err(|_| Error::Config {
                key: SPIN_LIMIT_VAR,
                value,
            })?;
        }

        Ok(Self { gate })
    }

    pub fn gate(&self) -> GateConfig {
        self.gate
    }
}
