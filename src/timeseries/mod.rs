//! Append-only traffic history: raw samples plus hourly/daily aggregates.
//!
//! Writes come from the supervisor after each successful poll; reads come from the
//! dashboard API (range queries) and from retention/compaction housekeeping run by
//! the scheduler. The trait is storage-agnostic so tests can run against
//! [`memory::InMemoryTimeSeriesStore`] without a database.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{InterfaceName, RouterId};
use crate::error::StoreError;

/// One observation of an interface's rx/tx byte counters and derived bit rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrafficSample {
    pub at: DateTime<Utc>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_bps: f64,
    pub tx_bps: f64,
}

/// Granularity requested from a range query. Raw samples are kept for
/// `compaction_after`; older ranges are served from whichever aggregate covers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Raw,
    Hourly,
    Daily,
}

/// A pre-aggregated bucket: min/max/avg over the bucket's raw samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub bucket_start: DateTime<Utc>,
    pub avg_rx_bps: f64,
    pub avg_tx_bps: f64,
    pub avg_total_bps: f64,
    pub max_rx_bps: f64,
    pub max_tx_bps: f64,
    /// The bucket's peak combined rx+tx rate. Not derivable from `max_rx_bps` and
    /// `max_tx_bps`, since the two maxima can fall on different samples.
    pub max_total_bps: f64,
}

/// Either a raw series or a pre-aggregated one, depending on what the requested range
/// and the store's compaction horizon resolve to.
#[derive(Debug, Clone)]
pub enum RangeResult {
    Raw(Vec<TrafficSample>),
    Aggregated(Vec<AggregateBucket>),
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Appends one sample for `(router, interface)`. Idempotent-adjacent: callers
    /// never retry a failed append blindly, since a duplicate timestamp would
    /// double-count in an average.
    async fn append(
        &self,
        router: RouterId,
        interface: &InterfaceName,
        sample: TrafficSample,
    ) -> Result<(), StoreError>;

    /// Returns samples (or aggregates, once the range is old enough to be compacted)
    /// for `(router, interface)` between `from` and `to`, inclusive.
    async fn range(
        &self,
        router: RouterId,
        interface: &InterfaceName,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<RangeResult, StoreError>;

    /// Deletes raw samples older than `cutoff`. Run by the scheduler on a daily tick,
    /// never from a poll path.
    async fn retain(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Builds or refreshes hourly/daily aggregates for samples older than
    /// `compacted_before`, so that range queries over old history don't have to
    /// scan raw rows. Also run by the scheduler, not per-poll.
    async fn compact(&self, compacted_before: DateTime<Utc>) -> Result<(), StoreError>;
}
