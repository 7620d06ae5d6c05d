//! In-memory reference implementation, used by tests and standalone demo runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{AdapterKind, AlertId, PortId, RouterId, Severity, UserId};
use crate::error::StoreError;
use crate::state::{Alert, AlertCondition, AlertFilter, MonitoredPort, Router, RouterInterface, StateStore};

#[derive(Default)]
pub struct InMemoryStateStore {
    routers: RwLock<HashMap<RouterId, Router>>,
    interfaces: RwLock<HashMap<RouterId, Vec<RouterInterface>>>,
    ports: RwLock<HashMap<RouterId, Vec<MonitoredPort>>>,
    /// Full alert history, keyed by id. Mirrors a real `alerts` table.
    alerts: RwLock<HashMap<AlertId, Alert>>,
    /// The partial-unique-index stand-in: an open slot exists only while its alert
    /// is unacknowledged, exactly matching `WHERE acknowledged = false`.
    open_alerts: RwLock<HashMap<(RouterId, PortId, AlertCondition), AlertId>>,
    alert_id_seq: AtomicU64,
    group_members: RwLock<HashMap<String, Vec<UserId>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_router(&self, router: Router) {
        self.routers.write().await.insert(router.id, router);
    }

    pub async fn insert_port(&self, port: MonitoredPort) {
        self.ports.write().await.entry(port.router_id).or_default().push(port);
    }

    pub async fn add_group_member(&self, group: &str, user: UserId) {
        self.group_members
            .write()
            .await
            .entry(group.to_string())
            .or_default()
            .push(user);
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn list_routers(&self) -> Result<Vec<Router>, StoreError> {
        Ok(self.routers.read().await.values().cloned().collect())
    }

    async fn get_router(&self, id: RouterId) -> Result<Router, StoreError> {
        self.routers
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_router_status(
        &self,
        id: RouterId,
        last_successful_method: Option<AdapterKind>,
        reachable: bool,
        connected: bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.routers.write().await;
        let router = guard.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(method) = last_successful_method {
            router.last_successful_method = method;
        }
        router.reachable = reachable;
        router.connected = connected;
        if connected {
            router.last_connected_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn upsert_interfaces(&self, router: RouterId, interfaces: Vec<RouterInterface>) -> Result<(), StoreError> {
        self.interfaces.write().await.insert(router, interfaces);
        Ok(())
    }

    async fn list_interfaces(&self, router: RouterId) -> Result<Vec<RouterInterface>, StoreError> {
        Ok(self.interfaces.read().await.get(&router).cloned().unwrap_or_default())
    }

    async fn list_monitored_ports(&self, router: RouterId) -> Result<Vec<MonitoredPort>, StoreError> {
        Ok(self.ports.read().await.get(&router).cloned().unwrap_or_default())
    }

    async fn list_all_monitored_ports(&self) -> Result<Vec<MonitoredPort>, StoreError> {
        Ok(self.ports.read().await.values().flatten().cloned().collect())
    }

    async fn update_port_snapshot(&self, port: PortId, mac: Option<String>, comment: Option<String>) -> Result<(), StoreError> {
        let mut guard = self.ports.write().await;
        for ports in guard.values_mut() {
            if let Some(p) = ports.iter_mut().find(|p| p.id == port) {
                p.mac = mac;
                p.comment = comment;
                return Ok(());
            }
        }
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
        let key = (router, port, condition);
        let mut open = self.open_alerts.write().await;
        if open.contains_key(&key) {
            return Err(StoreError::Conflict);
        }
        let id = AlertId(Uuid::from_u128(self.alert_id_seq.fetch_add(1, Ordering::Relaxed) as u128));
        self.alerts.write().await.insert(
            id,
            Alert {
                id,
                router_id: router,
                port_id: port,
                port_name: Some(port_name.to_string()),
                condition,
                severity,
                message,
                current_bps,
                threshold_bps,
                fired_at,
                acknowledged: false,
                ack_at: None,
                ack_by: None,
            },
        );
        open.insert(key, id);
        Ok(id)
    }

    async fn clear_alert(
        &self,
        router: RouterId,
        port: PortId,
        condition: AlertCondition,
        cleared_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = (router, port, condition);
        let Some(id) = self.open_alerts.write().await.remove(&key) else {
            return Ok(());
        };
        if let Some(alert) = self.alerts.write().await.get_mut(&id) {
            alert.acknowledged = true;
            alert.ack_at = Some(cleared_at);
            alert.ack_by = Some("system".to_string());
        }
        Ok(())
    }

    async fn acknowledge_alert(&self, id: AlertId, ack_by: String, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(&id).ok_or(StoreError::NotFound)?;
        if alert.acknowledged {
            // Idempotent: the already-recorded ack_at/ack_by survive untouched.
            return Ok(());
        }
        alert.acknowledged = true;
        alert.ack_at = Some(at);
        alert.ack_by = Some(ack_by);
        let key = (alert.router_id, alert.port_id, alert.condition);
        drop(alerts);
        self.open_alerts.write().await.remove(&key);
        Ok(())
    }

    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let alerts = self.alerts.read().await;
        let mut out: Vec<Alert> = alerts
            .values()
            .filter(|a| filter.router.map_or(true, |r| r == a.router_id))
            .filter(|a| !filter.unacknowledged_only || !a.acknowledged)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.fired_at.cmp(&a.fired_at));
        Ok(out)
    }

    async fn user_can_see_router(&self, user: UserId, router: RouterId) -> Result<bool, StoreError> {
        let routers = self.routers.read().await;
        let router = routers.get(&router).ok_or(StoreError::NotFound)?;
        if router.owner == user {
            return Ok(true);
        }
        if let Some(group) = &router.group {
            let members = self.group_members.read().await;
            if let Some(users) = members.get(group) {
                return Ok(users.contains(&user));
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InterfaceDisplayMode;

    fn router_fixture(id: RouterId, owner: UserId) -> Router {
        Router {
            id,
            owner,
            group: None,
            display_name: "r1".into(),
            host: "10.0.0.1".into(),
            native_port: 8728,
            username: "admin".into(),
            credential_handle: "handle".into(),
            rest_enabled: false,
            rest_port: None,
            snmp_enabled: false,
            snmp_port: None,
            snmp_community: None,
            snmp_version: None,
            interface_display_mode: InterfaceDisplayMode::Static,
            last_successful_method: AdapterKind::Native,
            reachable: true,
            connected: true,
            last_connected_at: None,
        }
    }

    #[tokio::test]
    async fn fire_alert_then_fire_again_conflicts() {
        let store = InMemoryStateStore::new();
        let router = RouterId(Uuid::nil());
        let port = PortId(Uuid::nil());
        store
            .fire_alert(
                router,
                port,
                "ether1",
                AlertCondition::PortDown,
                Severity::Critical,
                "port down".into(),
                None,
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        let second = store
            .fire_alert(
                router,
                port,
                "ether1",
                AlertCondition::PortDown,
                Severity::Critical,
                "port down".into(),
                None,
                None,
                Utc::now(),
            )
            .await;
        assert!(matches!(second, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn clear_then_fire_again_succeeds() {
        let store = InMemoryStateStore::new();
        let router = RouterId(Uuid::nil());
        let port = PortId(Uuid::nil());
        store
            .fire_alert(
                router,
                port,
                "ether1",
                AlertCondition::PortDown,
                Severity::Critical,
                "port down".into(),
                None,
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        store
            .clear_alert(router, port, AlertCondition::PortDown, Utc::now())
            .await
            .unwrap();
        let refired = store
            .fire_alert(
                router,
                port,
                "ether1",
                AlertCondition::PortDown,
                Severity::Critical,
                "port down".into(),
                None,
                None,
                Utc::now(),
            )
            .await;
        assert!(refired.is_ok());
    }

    #[tokio::test]
    async fn acknowledging_twice_preserves_first_ack_timestamp() {
        let store = InMemoryStateStore::new();
        let router = RouterId(Uuid::nil());
        let port = PortId(Uuid::nil());
        let id = store
            .fire_alert(
                router,
                port,
                "ether1",
                AlertCondition::PortDown,
                Severity::Critical,
                "port down".into(),
                None,
                None,
                Utc::now(),
            )
            .await
            .unwrap();

        let first_ack = Utc::now();
        store.acknowledge_alert(id, "alice".into(), first_ack).await.unwrap();
        store
            .acknowledge_alert(id, "bob".into(), first_ack + chrono::Duration::seconds(30))
            .await
            .unwrap();

        let alerts = store.list_alerts(AlertFilter::default()).await.unwrap();
        let alert = alerts.into_iter().find(|a| a.id == id).unwrap();
        assert_eq!(alert.ack_by.as_deref(), Some("alice"));
        assert_eq!(alert.ack_at, Some(first_ack));
    }

    #[tokio::test]
    async fn acknowledging_a_firing_alert_allows_a_fresh_one_to_open() {
        let store = InMemoryStateStore::new();
        let router = RouterId(Uuid::nil());
        let port = PortId(Uuid::nil());
        let id = store
            .fire_alert(
                router,
                port,
                "ether1",
                AlertCondition::TrafficLow,
                Severity::Warning,
                "low traffic".into(),
                Some(100.0),
                Some(1_000_000.0),
                Utc::now(),
            )
            .await
            .unwrap();

        // Condition is still breaching, but the operator acknowledges anyway.
        store.acknowledge_alert(id, "alice".into(), Utc::now()).await.unwrap();

        // The next sustained transition to firing must be able to open a new row.
        let second = store
            .fire_alert(
                router,
                port,
                "ether1",
                AlertCondition::TrafficLow,
                Severity::Warning,
                "low traffic".into(),
                Some(90.0),
                Some(1_000_000.0),
                Utc::now(),
            )
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn owner_can_see_router_stranger_cannot() {
        let store = InMemoryStateStore::new();
        let owner = UserId(Uuid::from_u128(1));
        let stranger = UserId(Uuid::from_u128(2));
        let router_id = RouterId(Uuid::nil());
        store.insert_router(router_fixture(router_id, owner)).await;

        assert!(store.user_can_see_router(owner, router_id).await.unwrap());
        assert!(!store.user_can_see_router(stranger, router_id).await.unwrap());
    }
}
