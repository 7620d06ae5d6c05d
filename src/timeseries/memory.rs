//! In-memory reference implementation, used by tests and by `mikromond --no-db`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{InterfaceName, RouterId};
use crate::error::StoreError;
use crate::timeseries::{AggregateBucket, RangeResult, Resolution, TimeSeriesStore, TrafficSample};

type SeriesKey = (RouterId, InterfaceName);

#[derive(Default)]
pub struct InMemoryTimeSeriesStore {
    series: RwLock<BTreeMap<SeriesKey, BTreeMap<DateTime<Utc>, TrafficSample>>>,
}

impl InMemoryTimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_start(at: DateTime<Utc>, resolution: Resolution) -> DateTime<Utc> {
        match resolution {
            Resolution::Hourly => at
                .date_naive()
                .and_hms_opt(at.time().hour(), 0, 0)
                .unwrap()
                .and_utc(),
            Resolution::Daily => at.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc(),
            Resolution::Raw => at,
        }
    }
}

use chrono::Timelike;

#[async_trait]
impl TimeSeriesStore for InMemoryTimeSeriesStore {
    async fn append(
        &self,
        router: RouterId,
        interface: &InterfaceName,
        sample: TrafficSample,
    ) -> Result<(), StoreError> {
        let mut guard = self.series.write().await;
        guard
            .entry((router, interface.clone()))
            .or_default()
            .insert(sample.at, sample);
        Ok(())
    }

    async fn range(
        &self,
        router: RouterId,
        interface: &InterfaceName,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<RangeResult, StoreError> {
        let guard = self.series.read().await;
        let Some(series) = guard.get(&(router, interface.clone())) else {
            return Ok(match resolution {
                Resolution::Raw => RangeResult::Raw(Vec::new()),
                _ => RangeResult::Aggregated(Vec::new()),
            });
        };

        let in_range: Vec<TrafficSample> = series.range(from..=to).map(|(_, s)| *s).collect();

        match resolution {
            Resolution::Raw => Ok(RangeResult::Raw(in_range)),
            res => {
                let mut buckets: BTreeMap<DateTime<Utc>, Vec<TrafficSample>> = BTreeMap::new();
                for s in in_range {
                    buckets.entry(Self::bucket_start(s.at, res)).or_default().push(s);
                }
                let out = buckets
                    .into_iter()
                    .map(|(bucket_start, samples)| {
                        let n = samples.len() as f64;
                        let avg_rx_bps = samples.iter().map(|s| s.rx_bps).sum::<f64>() / n;
                        let avg_tx_bps = samples.iter().map(|s| s.tx_bps).sum::<f64>() / n;
                        let avg_total_bps = samples.iter().map(|s| s.rx_bps + s.tx_bps).sum::<f64>() / n;
                        let max_rx_bps = samples.iter().map(|s| s.rx_bps).fold(0.0, f64::max);
                        let max_tx_bps = samples.iter().map(|s| s.tx_bps).fold(0.0, f64::max);
                        // Computed per-sample, not as `max_rx_bps + max_tx_bps`: the two
                        // maxima can land on different samples within the bucket.
                        let max_total_bps = samples.iter().map(|s| s.rx_bps + s.tx_bps).fold(0.0, f64::max);
                        AggregateBucket {
                            bucket_start,
                            avg_rx_bps,
                            avg_tx_bps,
                            avg_total_bps,
                            max_rx_bps,
                            max_tx_bps,
                            max_total_bps,
                        }
                    })
                    .collect();
                Ok(RangeResult::Aggregated(out))
            }
        }
    }

    async fn retain(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut guard = self.series.write().await;
        let mut removed = 0u64;
        for series in guard.values_mut() {
            let keep: BTreeMap<_, _> = series.split_off(&cutoff);
            removed += series.len() as u64;
            *series = keep;
        }
        Ok(removed)
    }

    async fn compact(&self, _compacted_before: DateTime<Utc>) -> Result<(), StoreError> {
        // The in-memory store derives aggregates on read (see `range`); there is no
        // separate materialized aggregate to build ahead of time.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RouterId;
    use chrono::Duration;

    fn sample(at: DateTime<Utc>, rx_bps: f64) -> TrafficSample {
        TrafficSample {
            at,
            rx_bytes: 0,
            tx_bytes: 0,
            rx_bps,
            tx_bps: 0.0,
        }
    }

    #[tokio::test]
    async fn append_then_range_returns_inserted_samples() {
        let store = InMemoryTimeSeriesStore::new();
        let router = RouterId(uuid::Uuid::nil());
        let t0 = Utc::now();
        store.append(router, &"ether1".to_string(), sample(t0, 100.0)).await.unwrap();
        store
            .append(router, &"ether1".to_string(), sample(t0 + Duration::seconds(60), 200.0))
            .await
            .unwrap();

        let result = store
            .range(
                router,
                &"ether1".to_string(),
                t0 - Duration::seconds(1),
                t0 + Duration::hours(1),
                Resolution::Raw,
            )
            .await
            .unwrap();
        match result {
            RangeResult::Raw(samples) => assert_eq!(samples.len(), 2),
            _ => panic!("expected raw result"),
        }
    }

    #[tokio::test]
    async fn retain_drops_samples_before_cutoff() {
        let store = InMemoryTimeSeriesStore::new();
        let router = RouterId(uuid::Uuid::nil());
        let t0 = Utc::now();
        store.append(router, &"ether1".to_string(), sample(t0, 1.0)).await.unwrap();
        store
            .append(router, &"ether1".to_string(), sample(t0 + Duration::days(800), 2.0))
            .await
            .unwrap();

        let removed = store.retain(t0 + Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);

        let result = store
            .range(
                router,
                &"ether1".to_string(),
                t0 - Duration::days(1),
                t0 + Duration::days(1000),
                Resolution::Raw,
            )
            .await
            .unwrap();
        match result {
            RangeResult::Raw(samples) => assert_eq!(samples.len(), 1),
            _ => panic!("expected raw result"),
        }
    }
}
