use thiserror::Error;

/// Misuse of the raw gate API.
///
/// The scoped [`GateGuard`](crate::monitor::GateGuard) makes both of these impossible,
/// so they only come out of [`RawGate`](crate::monitor::RawGate) calls.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    #[error("gate is already held by the current thread")]
    Reentrant,
    #[error("gate is not held by the current thread")]
    NotHeld,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("gate error: {0}")]
    Gate(#[from] GateError),
    #[error("interrupted while waiting")]
    Interrupted,
    #[error("wait queue is bound to gate {expected}, used with gate {found}")]
    GateMismatch { expected: u64, found: u64 },
    #[error("unknown account {account}, the bank has {accounts}")]
    UnknownAccount { account: usize, accounts: usize },
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),
    #[error("balance out of range")]
    Overflow,
    #[error("buffer capacity must be positive")]
    ZeroCapacity,
    #[error("invalid value {value:?} for {key}")]
    Config { key: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;
