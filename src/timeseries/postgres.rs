//! Postgres-backed time-series store.
//!
//! Raw samples live in `traffic_samples`; `traffic_hourly`/`traffic_daily` hold the
//! materialized aggregates `compact` maintains. Migrations for all three tables ship
//! under `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{InterfaceName, RouterId};
use crate::error::StoreError;
use crate::timeseries::{AggregateBucket, RangeResult, Resolution, TimeSeriesStore, TrafficSample};

pub struct PostgresTimeSeriesStore {
    pool: PgPool,
}

impl PostgresTimeSeriesStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_err(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl TimeSeriesStore for PostgresTimeSeriesStore {
    async fn append(
        &self,
        router: RouterId,
        interface: &InterfaceName,
        sample: TrafficSample,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO traffic_samples (router_id, interface_name, at, rx_bytes, tx_bytes, rx_bps, tx_bps)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (router_id, interface_name, at) DO NOTHING
            "#,
        )
        .bind(router.0)
        .bind(interface)
        .bind(sample.at)
        .bind(sample.rx_bytes as i64)
        .bind(sample.tx_bytes as i64)
        .bind(sample.rx_bps)
        .bind(sample.tx_bps)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
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
        match resolution {
            Resolution::Raw => {
                let rows: Vec<(DateTime<Utc>, i64, i64, f64, f64)> = sqlx::query_as(
                    r#"
                    SELECT at, rx_bytes, tx_bytes, rx_bps, tx_bps
                    FROM traffic_samples
                    WHERE router_id = $1 AND interface_name = $2 AND at BETWEEN $3 AND $4
                    ORDER BY at ASC
                    "#,
                )
                .bind(router.0)
                .bind(interface)
                .bind(from)
                .bind(to)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

                Ok(RangeResult::Raw(
                    rows.into_iter()
                        .map(|(at, rx_bytes, tx_bytes, rx_bps, tx_bps)| TrafficSample {
                            at,
                            rx_bytes: rx_bytes as u64,
                            tx_bytes: tx_bytes as u64,
                            rx_bps,
                            tx_bps,
                        })
                        .collect(),
                ))
            }
            Resolution::Hourly | Resolution::Daily => {
                let table = match resolution {
                    Resolution::Hourly => "traffic_hourly",
                    _ => "traffic_daily",
                };
                let query = format!(
                    r#"
                    SELECT bucket_start, avg_rx_bps, avg_tx_bps, avg_total_bps, max_rx_bps, max_tx_bps, max_total_bps
                    FROM {table}
                    WHERE router_id = $1 AND interface_name = $2 AND bucket_start BETWEEN $3 AND $4
                    ORDER BY bucket_start ASC
                    "#
                );
                let rows: Vec<(DateTime<Utc>, f64, f64, f64, f64, f64, f64)> = sqlx::query_as(&query)
                    .bind(router.0)
                    .bind(interface)
                    .bind(from)
                    .bind(to)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_err)?;

                Ok(RangeResult::Aggregated(
                    rows.into_iter()
                        .map(
                            |(bucket_start, avg_rx_bps, avg_tx_bps, avg_total_bps, max_rx_bps, max_tx_bps, max_total_bps)| {
                                AggregateBucket {
                                    bucket_start,
                                    avg_rx_bps,
                                    avg_tx_bps,
                                    avg_total_bps,
                                    max_rx_bps,
                                    max_tx_bps,
                                    max_total_bps,
                                }
                            },
                        )
                        .collect(),
                ))
            }
        }
    }

    async fn retain(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM traffic_samples WHERE at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn compact(&self, compacted_before: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO traffic_hourly
                (router_id, interface_name, bucket_start, avg_rx_bps, avg_tx_bps, avg_total_bps, max_rx_bps, max_tx_bps, max_total_bps)
            SELECT
                router_id,
                interface_name,
                date_trunc('hour', at) AS bucket_start,
                avg(rx_bps), avg(tx_bps), avg(rx_bps + tx_bps),
                max(rx_bps), max(tx_bps), max(rx_bps + tx_bps)
            FROM traffic_samples
            WHERE at < $1
            GROUP BY router_id, interface_name, date_trunc('hour', at)
            ON CONFLICT (router_id, interface_name, bucket_start) DO UPDATE SET
                avg_rx_bps = excluded.avg_rx_bps,
                avg_tx_bps = excluded.avg_tx_bps,
                avg_total_bps = excluded.avg_total_bps,
                max_rx_bps = excluded.max_rx_bps,
                max_tx_bps = excluded.max_tx_bps,
                max_total_bps = excluded.max_total_bps
            "#,
        )
        .bind(compacted_before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // Rolled up from the hourly table's own `*_total_bps` columns, not recomputed
        // from rx/tx: an hour's rx and tx maxima don't necessarily coincide, so
        // `max(max_rx_bps) + max(max_tx_bps)` would overstate the daily peak.
        sqlx::query(
            r#"
            INSERT INTO traffic_daily
                (router_id, interface_name, bucket_start, avg_rx_bps, avg_tx_bps, avg_total_bps, max_rx_bps, max_tx_bps, max_total_bps)
            SELECT
                router_id,
                interface_name,
                date_trunc('day', bucket_start) AS bucket_start,
                avg(avg_rx_bps), avg(avg_tx_bps), avg(avg_total_bps),
                max(max_rx_bps), max(max_tx_bps), max(max_total_bps)
            FROM traffic_hourly
            WHERE bucket_start < $1
            GROUP BY router_id, interface_name, date_trunc('day', bucket_start)
            ON CONFLICT (router_id, interface_name, bucket_start) DO UPDATE SET
                avg_rx_bps = excluded.avg_rx_bps,
                avg_tx_bps = excluded.avg_tx_bps,
                avg_total_bps = excluded.avg_total_bps,
                max_rx_bps = excluded.max_rx_bps,
                max_tx_bps = excluded.max_tx_bps,
                max_total_bps = excluded.max_total_bps
            "#,
        )
        .bind(compacted_before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }
}
