//! Engine-wide counters, exported as Prometheus metrics when the `prometheus` feature
//! is enabled.
//!
//! Unlike a per-packet pipeline, poll-tick-frequency counters don't need thread-local
//! batching before going into an atomic `Counter`; every call site here just
//! increments directly.

#[cfg(feature = "prometheus")]
mod prometheus;

#[cfg(feature = "prometheus")]
pub use prometheus::*;

/// No-op stand-ins so call sites don't need `#[cfg(feature = "prometheus")]`
/// scattered through the supervisor, alert engine, and fan-out hub.
#[cfg(not(feature = "prometheus"))]
mod noop {
    use crate::domain::RouterId;

    pub fn record_poll_success(_router: RouterId) {}
    pub fn record_poll_failure(_router: RouterId) {}
    pub fn record_sample_appended() {}
    pub fn record_alert_fired(_condition: &'static str) {}
    pub fn record_alert_cleared(_condition: &'static str) {}
    pub fn record_fanout_drop() {}
}

#[cfg(not(feature = "prometheus"))]
pub use noop::*;
