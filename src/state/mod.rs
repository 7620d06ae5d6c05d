//! CRUD-owned entities the engine consumes but does not manage the lifecycle of:
//! routers, their interfaces, monitored ports, and alerts.
//!
//! The engine is not the source of truth for what a "router" is — an operator UI (or
//! its API) owns create/update/delete. What the engine needs is read access to the
//! current fleet plus the ability to write back derived state: `last_successful_method`,
//! `reachable`/`connected`, and alert rows it fires or clears.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AdapterKind, AlertId, Condition, InterfaceDisplayMode, PortId, RouterId, Severity, UserId};
use crate::error::StoreError;

/// A fleet member as owned by the CRUD surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Router {
    pub id: RouterId,
    pub owner: UserId,
    pub group: Option<String>,
    pub display_name: String,
    pub host: String,
    pub native_port: u16,
    pub username: String,
    /// Opaque handle; the engine never sees the plaintext credential, only whatever
    /// the adapter layer needs to authenticate (resolved outside this store).
    pub credential_handle: String,
    pub rest_enabled: bool,
    pub rest_port: Option<u16>,
    pub snmp_enabled: bool,
    pub snmp_port: Option<u16>,
    pub snmp_community: Option<String>,
    pub snmp_version: Option<crate::adapter::snmp::SnmpVersion>,
    pub interface_display_mode: InterfaceDisplayMode,
    pub last_successful_method: AdapterKind,
    pub reachable: bool,
    pub connected: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// An interface as last observed on a router, independent of whether it is monitored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct RouterInterface {
    pub router_id: RouterId,
    pub name: String,
    pub kind: String,
    pub mac: Option<String>,
    pub comment: Option<String>,
    pub running: bool,
    pub disabled: bool,
    pub last_seen_at: DateTime<Utc>,
}

/// A port the operator has opted into monitoring, with its own alert thresholds.
/// `mac`/`comment` are a snapshot taken from the matching [`RouterInterface`] the
/// last time the supervisor refreshed interface metadata, not a live read — the
/// monitored port can outlive the interface it was snapshotted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct MonitoredPort {
    pub id: PortId,
    pub router_id: RouterId,
    pub interface_name: String,
    pub mac: Option<String>,
    pub comment: Option<String>,
    pub traffic_low_bps: Option<f64>,
    pub alerts_enabled: bool,
    pub email_enabled: bool,
    pub popup_enabled: bool,
}

/// A fired alert. Rows are only ever inserted by the alert engine under a partial
/// unique index on `(router_id, port_id, condition) WHERE acknowledged = false`,
/// which is what makes firing safe across multiple scheduler instances: the
/// predicate must name `acknowledged`, not some derived "resolved" flag, since an
/// operator acknowledging a still-firing condition must free the slot for the next
/// transition to open a new row (`DESIGN NOTES`, dedup via partial unique constraint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Alert {
    pub id: AlertId,
    pub router_id: RouterId,
    pub port_id: PortId,
    pub port_name: Option<String>,
    pub condition: AlertCondition,
    pub severity: Severity,
    pub message: String,
    pub current_bps: Option<f64>,
    pub threshold_bps: Option<f64>,
    pub fired_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub ack_at: Option<DateTime<Utc>>,
    pub ack_by: Option<String>,
}

/// Narrows a `list_alerts` query to one router and/or to only the currently-open
/// (unacknowledged) alerts. User-scoping is applied by the caller via
/// [`StateStore::user_can_see_router`] rather than pushed into this filter, so the
/// store itself never makes an authorization decision (see `engine::MonitoringEngine`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertFilter {
    pub router: Option<RouterId>,
    pub unacknowledged_only: bool,
}

/// Serializable twin of [`Condition`] for storage; `Condition` itself stays
/// `Copy`/non-serde since it is only ever compared and matched in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(type_name = "alert_condition", rename_all = "snake_case"))]
pub enum AlertCondition {
    PortDown,
    TrafficLow,
}

impl From<Condition> for AlertCondition {
    fn from(c: Condition) -> Self {
        match c {
            Condition::PortDown => AlertCondition::PortDown,
            Condition::TrafficLow => AlertCondition::TrafficLow,
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn list_routers(&self) -> Result<Vec<Router>, StoreError>;
    async fn get_router(&self, id: RouterId) -> Result<Router, StoreError>;

    /// Persists the sticky adapter preference and reachability flags after a poll.
    /// Called once per poll tick regardless of outcome, so the UI's "last seen"
    /// indicator reflects reality even when every adapter failed.
    async fn update_router_status(
        &self,
        id: RouterId,
        last_successful_method: Option<AdapterKind>,
        reachable: bool,
        connected: bool,
    ) -> Result<(), StoreError>;

    async fn upsert_interfaces(&self, router: RouterId, interfaces: Vec<RouterInterface>) -> Result<(), StoreError>;
    async fn list_interfaces(&self, router: RouterId) -> Result<Vec<RouterInterface>, StoreError>;

    async fn list_monitored_ports(&self, router: RouterId) -> Result<Vec<MonitoredPort>, StoreError>;
    async fn list_all_monitored_ports(&self) -> Result<Vec<MonitoredPort>, StoreError>;

    /// Snapshots mac/comment from the current interface cache onto a monitored port.
    /// Called by the supervisor after every `upsert_interfaces` (§6
    /// `refresh_interface_metadata` and the ordinary poll loop both go through this);
    /// a no-op if the port no longer exists.
    async fn update_port_snapshot(&self, port: PortId, mac: Option<String>, comment: Option<String>) -> Result<(), StoreError>;

    /// Inserts a new alert row under the partial unique index. Returns
    /// `StoreError::Conflict` if an open alert for this `(router, port, condition)`
    /// already exists — the caller (alert engine) treats that as "already firing",
    /// not as a failure.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<AlertId, StoreError>;

    /// Auto-clears the open alert for `(router, port, condition)`, if one exists: sets
    /// `acknowledged = true`, `ack_by = "system"`, `ack_at = cleared_at`. Emits no
    /// notification; the alert engine never calls this for a row it expects to be
    /// absent, so a no-op here (condition already clear) is not an error.
    async fn clear_alert(
        &self,
        router: RouterId,
        port: PortId,
        condition: AlertCondition,
        cleared_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Operator acknowledgement. Idempotent: acknowledging an already-acknowledged
    /// alert preserves its original `ack_at`/`ack_by` rather than overwriting them.
    async fn acknowledge_alert(&self, id: AlertId, ack_by: String, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Lists alerts matching `filter`, most recently fired first. Callers apply
    /// `user_can_see_router` themselves to scope results to one principal's fleet.
    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>, StoreError>;

    /// Whether `user` is entitled to see `router` — direct ownership or group
    /// membership. The engine calls this only when filtering session subscriptions;
    /// it never makes authorization decisions for the CRUD surface itself.
    async fn user_can_see_router(&self, user: UserId, router: RouterId) -> Result<bool, StoreError>;
}
