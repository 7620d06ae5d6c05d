//! Postgres-backed state store.
//!
//! `alerts.acknowledged` plus a partial unique index
//! `UNIQUE (router_id, port_id, condition) WHERE acknowledged = false` are what make
//! `fire_alert` safe to call concurrently from more than one scheduler instance: the
//! loser of the race gets a unique-violation, which this module turns into
//! `StoreError::Conflict` rather than a generic database error. The predicate names
//! `acknowledged`, not a separate "cleared" flag, so that an operator acknowledging a
//! still-firing alert frees the slot for the next transition immediately.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{AdapterKind, AlertId, PortId, RouterId, Severity, UserId};
use crate::error::StoreError;
use crate::state::{Alert, AlertCondition, AlertFilter, MonitoredPort, Router, RouterInterface, StateStore};

pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict,
        _ => StoreError::Unavailable(e.to_string()),
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn list_routers(&self) -> Result<Vec<Router>, StoreError> {
        sqlx::query_as::<_, Router>("SELECT * FROM routers ORDER BY display_name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    async fn get_router(&self, id: RouterId) -> Result<Router, StoreError> {
        sqlx::query_as::<_, Router>("SELECT * FROM routers WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(StoreError::NotFound)
    }

    async fn update_router_status(
        &self,
        id: RouterId,
        last_successful_method: Option<AdapterKind>,
        reachable: bool,
        connected: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE routers SET
                last_successful_method = COALESCE($2, last_successful_method),
                reachable = $3,
                connected = $4,
                last_connected_at = CASE WHEN $4 THEN now() ELSE last_connected_at END
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(last_successful_method)
        .bind(reachable)
        .bind(connected)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn upsert_interfaces(&self, router: RouterId, interfaces: Vec<RouterInterface>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        for iface in interfaces {
            sqlx::query(
                r#"
                INSERT INTO router_interfaces (router_id, name, kind, mac, comment, running, disabled, last_seen_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (router_id, name) DO UPDATE SET
                    kind = excluded.kind,
                    mac = excluded.mac,
                    comment = excluded.comment,
                    running = excluded.running,
                    disabled = excluded.disabled,
                    last_seen_at = excluded.last_seen_at
                "#,
            )
            .bind(router.0)
            .bind(&iface.name)
            .bind(&iface.kind)
            .bind(&iface.mac)
            .bind(&iface.comment)
            .bind(iface.running)
            .bind(iface.disabled)
            .bind(iface.last_seen_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_interfaces(&self, router: RouterId) -> Result<Vec<RouterInterface>, StoreError> {
        sqlx::query_as::<_, RouterInterface>("SELECT * FROM router_interfaces WHERE router_id = $1")
            .bind(router.0)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    async fn list_monitored_ports(&self, router: RouterId) -> Result<Vec<MonitoredPort>, StoreError> {
        sqlx::query_as::<_, MonitoredPort>("SELECT * FROM monitored_ports WHERE router_id = $1")
            .bind(router.0)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    async fn list_all_monitored_ports(&self) -> Result<Vec<MonitoredPort>, StoreError> {
        sqlx::query_as::<_, MonitoredPort>("SELECT * FROM monitored_ports")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    async fn update_port_snapshot(&self, port: PortId, mac: Option<String>, comment: Option<String>) -> Result<(), StoreError> {
        sqlx::query("UPDATE monitored_ports SET mac = $2, comment = $3 WHERE id = $1")
            .bind(port.0)
            .bind(mac)
            .bind(comment)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn fire_alert(
        &self,
        router: RouterId,
        port: PortId,
        port_name: &str,
        condition: AlertCondition,
        severity: Severity,
        message: String,
        current_bps: Option<f64>,
        threshold_bps: Option<f64>,
        fired_at: DateTime<Utc>,
    ) -> Result<AlertId, StoreError> {
        let id = AlertId(uuid::Uuid::new_v4());
        sqlx::query(
            r#"
            INSERT INTO alerts
                (id, router_id, port_id, port_name, condition, severity, message,
                 current_bps, threshold_bps, fired_at, acknowledged, ack_at, ack_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, false, NULL, NULL)
            "#,
        )
        .bind(id.0)
        .bind(router.0)
        .bind(port.0)
        .bind(port_name)
        .bind(condition)
        .bind(severity)
        .bind(message)
        .bind(current_bps)
        .bind(threshold_bps)
        .bind(fired_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(id)
    }

    async fn clear_alert(
        &self,
        router: RouterId,
        port: PortId,
        condition: AlertCondition,
        cleared_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE alerts SET acknowledged = true, ack_at = $4, ack_by = 'system'
            WHERE router_id = $1 AND port_id = $2 AND condition = $3 AND acknowledged = false
            "#,
        )
        .bind(router.0)
        .bind(port.0)
        .bind(condition)
        .bind(cleared_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn acknowledge_alert(&self, id: AlertId, ack_by: String, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE alerts SET acknowledged = true, ack_at = $2, ack_by = $3
            WHERE id = $1 AND acknowledged = false
            "#,
        )
        .bind(id.0)
        .bind(at)
        .bind(ack_by)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        // A no-op when already acknowledged is intentional: the existing row's
        // ack_at/ack_by are left untouched, matching the idempotence law.
        Ok(())
    }

    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>, StoreError> {
        sqlx::query_as::<_, Alert>(
            r#"
            SELECT * FROM alerts
            WHERE ($1::uuid IS NULL OR router_id = $1)
              AND (NOT $2 OR acknowledged = false)
            ORDER BY fired_at DESC
            "#,
        )
        .bind(filter.router.map(|r| r.0))
        .bind(filter.unacknowledged_only)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn user_can_see_router(&self, user: UserId, router: RouterId) -> Result<bool, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT true FROM routers r
            WHERE r.id = $2 AND (
                r.owner = $1
                OR EXISTS (
                    SELECT 1 FROM group_members gm
                    WHERE gm.group_name = r."group" AND gm.user_id = $1
                )
            )
            "#,
        )
        .bind(user.0)
        .bind(router.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(row.is_some())
    }
}
