//! Pure conversion from successive byte counters to a bits-per-second rate.
//!
//! This module owns no I/O and no async runtime; it is a plain function of two samples.
//! Supervisors and real-time pollers each keep their own cache keyed by router and
//! interface, since a base-interval poll and a real-time poll of the same port must not
//! clobber each other's "previous sample" state.

use std::collections::HashMap;

use crate::domain::{InterfaceName, RouterId};

/// A raw counter observation taken at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct CounterSample {
    pub at: chrono::DateTime<chrono::Utc>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// A derived rate between two consecutive samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub rx_bps: f64,
    pub tx_bps: f64,
}

/// Counters wrap at 2^64 and routers occasionally reset them (reboot, interface reset).
/// A single-interval magnitude check distinguishes the two: a wrap produces an apparent
/// decrease of nearly the full 64-bit range, while a genuine reset produces a decrease of
/// an arbitrary, typically much smaller, size. Anything that looks like neither is
/// reported as a reset rather than risk a wildly wrong rate.
const WRAP_THRESHOLD: u64 = 1 << 63;

fn delta(prev: u64, cur: u64) -> Option<u64> {
    if cur >= prev {
        Some(cur - prev)
    } else {
        let apparent_drop = prev - cur;
        if apparent_drop >= WRAP_THRESHOLD {
            // Treat as wraparound: the counter rolled over past u64::MAX.
            Some(cur.wrapping_sub(prev))
        } else {
            // Counter reset (reboot or interface flap). No sane delta; skip this tick.
            None
        }
    }
}

/// Default ceiling on the gap between consecutive samples before the deriver treats
/// the device as rebooted/clock-jumped and re-seeds instead of emitting a rate.
pub const DEFAULT_MAX_GAP: chrono::Duration = chrono::Duration::minutes(15);

/// Tracks the last observed sample per `(router, interface)` pair and turns each new
/// sample into a rate relative to the previous one.
#[derive(Debug)]
pub struct RateDeriver {
    last: HashMap<(RouterId, InterfaceName), CounterSample>,
    max_gap: chrono::Duration,
}

impl Default for RateDeriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RateDeriver {
    pub fn new() -> Self {
        Self {
            last: HashMap::new(),
            max_gap: DEFAULT_MAX_GAP,
        }
    }

    /// Builds a deriver with a non-default gap ceiling, e.g. for the real-time
    /// poller's own cache, which ticks far more often than the scheduled one.
    pub fn with_max_gap(max_gap: chrono::Duration) -> Self {
        Self {
            last: HashMap::new(),
            max_gap,
        }
    }

    /// Feeds a new sample for `(router, interface)` and returns the derived rate versus
    /// the previous sample, or `None` if there was no previous sample to compare against,
    /// the clock did not advance or jumped by more than `max_gap`, or the counters reset
    /// rather than wrapped. In every `None` case the new sample still replaces the cache
    /// entry, re-seeding the series from here.
    pub fn observe(
        &mut self,
        router: RouterId,
        interface: &str,
        sample: CounterSample,
    ) -> Option<Rate> {
        let key = (router, interface.to_string());
        let prev = self.last.insert(key, sample);
        let prev = prev?;

        let elapsed = sample.at - prev.at;
        if elapsed <= chrono::Duration::zero() || elapsed > self.max_gap {
            return None;
        }
        let secs = elapsed.num_milliseconds() as f64 / 1000.0;

        let rx_delta = delta(prev.rx_bytes, sample.rx_bytes)?;
        let tx_delta = delta(prev.tx_bytes, sample.tx_bytes)?;

        Some(Rate {
            rx_bps: 8.0 * rx_delta as f64 / secs,
            tx_bps: 8.0 * tx_delta as f64 / secs,
        })
    }

    /// Drops cached state for a router, e.g. when it is deleted or demoted to a
    /// different adapter whose counters start from an unrelated baseline.
    pub fn forget_router(&mut self, router: RouterId) {
        self.last.retain(|(r, _), _| *r != router);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn router() -> RouterId {
        RouterId(uuid::Uuid::nil())
    }

    fn sample_at(secs: i64, rx: u64, tx: u64) -> CounterSample {
        CounterSample {
            at: chrono::DateTime::UNIX_EPOCH + ChronoDuration::seconds(secs),
            rx_bytes: rx,
            tx_bytes: tx,
        }
    }

    #[test]
    fn first_observation_has_no_rate() {
        let mut d = RateDeriver::new();
        let r = d.observe(router(), "ether1", sample_at(0, 1000, 500));
        assert!(r.is_none());
    }

    #[test]
    fn normal_interval_derives_bps() {
        let mut d = RateDeriver::new();
        d.observe(router(), "ether1", sample_at(0, 0, 0));
        let rate = d
            .observe(router(), "ether1", sample_at(10, 12_500, 1_250))
            .unwrap();
        // 12_500 bytes over 10s = 1250 B/s = 10_000 bps
        assert!((rate.rx_bps - 10_000.0).abs() < 1e-6);
        assert!((rate.tx_bps - 1_000.0).abs() < 1e-6);
    }

    #[test]
    fn counter_reset_yields_no_rate() {
        let mut d = RateDeriver::new();
        d.observe(router(), "ether1", sample_at(0, 1_000_000, 1_000_000));
        // Router rebooted; counters restarted near zero, a small decrease.
        let r = d.observe(router(), "ether1", sample_at(10, 500, 500));
        assert!(r.is_none());
    }

    #[test]
    fn counter_wraparound_is_detected_and_handled() {
        let mut d = RateDeriver::new();
        let near_max = u64::MAX - 100;
        d.observe(router(), "ether1", sample_at(0, near_max, near_max));
        // Wrapped past u64::MAX and accumulated another 200 bytes.
        let rate = d.observe(router(), "ether1", sample_at(1, 100, 100)).unwrap();
        assert!((rate.rx_bps - 1600.0).abs() < 1e-6);
    }

    #[test]
    fn independent_interfaces_do_not_interfere() {
        let mut d = RateDeriver::new();
        d.observe(router(), "ether1", sample_at(0, 0, 0));
        d.observe(router(), "ether2", sample_at(0, 0, 0));
        let r1 = d.observe(router(), "ether1", sample_at(1, 100, 0)).unwrap();
        let r2 = d.observe(router(), "ether2", sample_at(1, 800, 0)).unwrap();
        assert!((r1.rx_bps - 800.0).abs() < 1e-6);
        assert!((r2.rx_bps - 6400.0).abs() < 1e-6);
    }

    #[test]
    fn forget_router_clears_only_that_router() {
        let mut d = RateDeriver::new();
        let other = RouterId(uuid::Uuid::from_u128(1));
        d.observe(router(), "ether1", sample_at(0, 0, 0));
        d.observe(other, "ether1", sample_at(0, 0, 0));
        d.forget_router(router());
        assert!(d.observe(router(), "ether1", sample_at(1, 100, 0)).is_none());
        assert!(d.observe(other, "ether1", sample_at(1, 100, 0)).is_some());
    }
}
