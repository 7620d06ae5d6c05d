//! Configuration options.
//!
//! The engine loads a layered configuration: compiled-in defaults, optionally
//! overridden by a TOML file (`load_config`), optionally overridden again by a small
//! set of recognized environment variables read by the `mikromond` binary. This
//! mirrors the admin knobs covering poll cadence, debounce width, retention and
//! compaction horizons, backoff ceiling, and per-protocol poll deadlines.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Loads a configuration file from `path`, falling back to defaults for any field the
/// file omits.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<EngineConfig> {
    let config_str = fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
}

/// Returns the compiled-in default configuration.
pub fn default_config() -> EngineConfig {
    EngineConfig::default()
}

/* --------------------------------------------------------------------------------- */

/// Top-level engine configuration options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EngineConfig {
    /// Default poll interval per router, in seconds. Defaults to `60`.
    #[serde(default = "default_base_interval_secs")]
    pub base_interval_secs: u64,

    /// Real-time fan-out poll interval, in seconds. Defaults to `5`.
    #[serde(default = "default_rt_interval_secs")]
    pub rt_interval_secs: u64,

    /// Number of real-time ticks before a subscription auto-pauses. Defaults to `50`
    /// (≈ 4 minutes at the default `rt_interval_secs`). Exposed as configuration
    /// rather than hard-coded, since different deployments disagree on how long an
    /// idle dashboard tab should keep a live poll running.
    #[serde(default = "default_rt_max_ticks")]
    pub rt_max_ticks: u32,

    /// Per-session bounded delivery queue depth for real-time snapshots. Defaults to `8`.
    #[serde(default = "default_rt_queue_depth")]
    pub rt_queue_depth: usize,

    /// Consecutive polls a condition must hold before firing/clearing. Defaults to `2`.
    #[serde(default = "default_debounce_window")]
    pub debounce_window: u32,

    /// Largest gap, in seconds, between two counter samples before the rate deriver
    /// discards the pair and re-seeds instead of computing a rate. Defaults to 15
    /// minutes (`900`); a gap this size usually means the device rebooted or the poll
    /// loop stalled, and a naive delta across it would read as a huge rate spike.
    #[serde(default = "default_max_gap_secs")]
    pub max_gap_secs: i64,

    /// Time-series retention, in days. Defaults to 2 years (`730`).
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Sample age, in days, at which pre-aggregated views replace raw reads. Defaults to `7`.
    #[serde(default = "default_compaction_after_days")]
    pub compaction_after_days: u32,

    /// Cap on the exponential backoff multiplier applied to `base_interval_secs`, in
    /// seconds. Defaults to 5 minutes (`300`).
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Interval between reconcile ticks that pick up router CRUD changes. Defaults to `30`.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Grace period allotted to in-flight polls during shutdown, in seconds. Defaults to `10`.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Global cap on concurrently subscribed real-time routers. Defaults to `64`.
    #[serde(default = "default_fanout_max_routers")]
    pub fanout_max_routers: usize,

    /// Per-protocol adapter deadlines.
    #[serde(default)]
    pub deadlines: AdapterDeadlines,

    /// Connection pool sizing per router per protocol.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Storage connection string (`DATABASE_URL`). Required to start in production;
    /// optional only so the in-memory store can be selected in tests.
    #[serde(default)]
    pub database_url: Option<String>,
}

fn default_base_interval_secs() -> u64 {
    60
}
fn default_rt_interval_secs() -> u64 {
    5
}
fn default_rt_max_ticks() -> u32 {
    50
}
fn default_rt_queue_depth() -> usize {
    8
}
fn default_debounce_window() -> u32 {
    2
}
fn default_max_gap_secs() -> i64 {
    900
}
fn default_retention_days() -> u32 {
    730
}
fn default_compaction_after_days() -> u32 {
    7
}
fn default_max_backoff_secs() -> u64 {
    300
}
fn default_reconcile_interval_secs() -> u64 {
    30
}
fn default_grace_period_secs() -> u64 {
    10
}
fn default_fanout_max_routers() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            base_interval_secs: default_base_interval_secs(),
            rt_interval_secs: default_rt_interval_secs(),
            rt_max_ticks: default_rt_max_ticks(),
            rt_queue_depth: default_rt_queue_depth(),
            debounce_window: default_debounce_window(),
            max_gap_secs: default_max_gap_secs(),
            retention_days: default_retention_days(),
            compaction_after_days: default_compaction_after_days(),
            max_backoff_secs: default_max_backoff_secs(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            grace_period_secs: default_grace_period_secs(),
            fanout_max_routers: default_fanout_max_routers(),
            deadlines: AdapterDeadlines::default(),
            pool: PoolConfig::default(),
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Startup validation: a config that can never succeed should refuse to start
    /// rather than fail silently at the first poll.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.debounce_window == 0 {
            anyhow::bail!("debounce_window must be >= 1");
        }
        if self.rt_max_ticks == 0 {
            anyhow::bail!("rt_max_ticks must be >= 1");
        }
        if self.max_gap_secs <= 0 {
            anyhow::bail!("max_gap_secs must be > 0");
        }
        Ok(())
    }

    pub fn base_interval(&self) -> Duration {
        Duration::from_secs(self.base_interval_secs)
    }

    pub fn rt_interval(&self) -> Duration {
        Duration::from_secs(self.rt_interval_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn max_gap(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_gap_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days as i64)
    }

    pub fn compaction_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.compaction_after_days as i64)
    }
}

/* --------------------------------------------------------------------------------- */

/// Per-protocol poll deadlines. Each adapter call is wrapped in
/// `tokio::time::timeout` against the relevant field.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AdapterDeadlines {
    /// Native API deadline, in milliseconds. Defaults to `10_000`.
    #[serde(default = "default_deadline_ms")]
    pub native_ms: u64,

    /// REST deadline, in milliseconds. Defaults to `10_000`.
    #[serde(default = "default_deadline_ms")]
    pub rest_ms: u64,

    /// SNMP deadline, in milliseconds. Defaults to `10_000`.
    #[serde(default = "default_deadline_ms")]
    pub snmp_ms: u64,

    /// Deadline for a reachability probe, in milliseconds. Defaults to `3_000`.
    #[serde(default = "default_probe_deadline_ms")]
    pub probe_ms: u64,

    /// Deadline for a time-series or state store call, in milliseconds. Defaults to
    /// `5_000`.
    #[serde(default = "default_store_deadline_ms")]
    pub store_ms: u64,
}

fn default_deadline_ms() -> u64 {
    10_000
}
fn default_probe_deadline_ms() -> u64 {
    3_000
}
fn default_store_deadline_ms() -> u64 {
    5_000
}

impl Default for AdapterDeadlines {
    fn default() -> Self {
        AdapterDeadlines {
            native_ms: default_deadline_ms(),
            rest_ms: default_deadline_ms(),
            snmp_ms: default_deadline_ms(),
            probe_ms: default_probe_deadline_ms(),
            store_ms: default_store_deadline_ms(),
        }
    }
}

impl AdapterDeadlines {
    pub fn native(&self) -> Duration {
        Duration::from_millis(self.native_ms)
    }
    pub fn rest(&self) -> Duration {
        Duration::from_millis(self.rest_ms)
    }
    pub fn snmp(&self) -> Duration {
        Duration::from_millis(self.snmp_ms)
    }
    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }
    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }
}

/* --------------------------------------------------------------------------------- */

/// Connection pool sizing: at most a handful of simultaneous native/REST connections
/// per router; SNMP is stateless and unpooled.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PoolConfig {
    /// Max simultaneous native-API connections per router. Defaults to `2`.
    #[serde(default = "default_pool_native")]
    pub native_per_router: usize,

    /// Max simultaneous REST connections per router. Defaults to `2`.
    #[serde(default = "default_pool_rest")]
    pub rest_per_router: usize,
}

fn default_pool_native() -> usize {
    2
}
fn default_pool_rest() -> usize {
    2
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            native_per_router: default_pool_native(),
            rest_per_router: default_pool_rest(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.base_interval_secs, 60);
        assert_eq!(cfg.rt_interval_secs, 5);
        assert_eq!(cfg.rt_max_ticks, 50);
        assert_eq!(cfg.debounce_window, 2);
        assert_eq!(cfg.max_gap_secs, 900);
        assert_eq!(cfg.max_backoff_secs, 300);
        assert_eq!(cfg.compaction_after_days, 7);
    }

    #[test]
    fn toml_roundtrip_with_partial_overrides() {
        let partial = r#"
            base_interval_secs = 30

            [deadlines]
            native_ms = 2000
        "#;
        let cfg: EngineConfig = toml::from_str(partial).unwrap();
        assert_eq!(cfg.base_interval_secs, 30);
        assert_eq!(cfg.deadlines.native_ms, 2000);
        // Untouched fields still take their defaults.
        assert_eq!(cfg.rt_interval_secs, 5);
        assert_eq!(cfg.deadlines.rest_ms, 10_000);
    }

    #[test]
    fn rejects_zero_debounce_window() {
        let mut cfg = EngineConfig::default();
        cfg.debounce_window = 0;
        assert!(cfg.validate().is_err());
    }
}
