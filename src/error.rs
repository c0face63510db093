//! Error types for the gate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for gate operations.
pub type GateResult<T> = Result<T, GateError>;

/// Result type alias for counter store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the gate itself.
///
/// Rate-limit denials are not errors; they are [`crate::guard::Verdict`]
/// values. Everything here is either a startup-time misconfiguration (fail
/// fast) or an internal store condition that never reaches the client.
#[derive(Debug, Error)]
pub enum GateError {
    /// Invalid configuration value. Raised at load/validate time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid route policy (non-positive limit or window). Raised at
    /// route-registration time, never at request time.
    #[error("policy error: {0}")]
    Policy(String),

    /// Counter store failure that escaped local recovery.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the counter store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Store round trip exceeded its time budget.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Store responded with something the client could not interpret.
    #[error("store protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Whether the error indicates a transient outage worth retrying later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}
