//! Error taxonomy shared by every adapter and store implementation.
//!
//! `AdapterError` is the uniform failure surface for device I/O regardless of which
//! protocol produced it; `StoreError` plays the same role for the two storage traits.
//! Call sites that need caller context reach for `anyhow`, matching the split the
//! teacher crate uses between a `thiserror` library error and `anyhow::Result` at the
//! orchestration layer.

use thiserror::Error;

/// Uniform adapter failure, regardless of whether it originated in the native, REST,
/// or SNMP transport.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// L3/L4 failure to reach the device.
    #[error("router unreachable")]
    Unreachable,

    /// Credentials rejected. Retrying without operator intervention has no value.
    #[error("authentication failed")]
    AuthFailed,

    /// Framing, parsing, or schema mismatch. Retryable, but counts toward demotion.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response within the per-call deadline.
    #[error("operation timed out")]
    Timeout,

    /// This adapter cannot service the call at all (e.g. SNMP has no route table).
    /// Terminal for this adapter; callers must try the next one in the fallback order.
    #[error("feature unavailable on this adapter")]
    FeatureUnavailable,
}

impl AdapterError {
    /// Whether the Supervisor should try the next adapter in the fallback order after
    /// this failure. Only `FeatureUnavailable` forecloses retry entirely for the call;
    /// everything else is worth trying on the next adapter tier.
    pub fn retryable(&self) -> bool {
        !matches!(self, AdapterError::FeatureUnavailable)
    }
}

/// Failure surface for the Time-Series Store and State Store traits.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The unique partial-index insert lost a race. Consumed internally by the alert
    /// engine; must never be surfaced past it.
    #[error("conflicting row already exists")]
    Conflict,

    /// Backing storage is unreachable or erroring. The engine degrades affected
    /// operations to a no-op for this tick rather than buffering indefinitely.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The referenced row does not exist.
    #[error("not found")]
    NotFound,
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}
