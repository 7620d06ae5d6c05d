//! The boundary the outer HTTP/API layer actually calls: queries over alerts and
//! traffic history, the handful of control operations an operator can invoke, and
//! real-time subscription management. Everything here is a thin, authorization-aware
//! wrapper over the State Store, Time-Series Store, and Fan-out Hub; it owns no state
//! of its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{AlertId, InterfaceName, RouterId, UserId};
use crate::error::StoreError;
use crate::fanout::{FanoutHub, SessionId, SessionQueue, SubscribeError};
use crate::state::{Alert, AlertFilter, MonitoredPort, Router, StateStore};
use crate::supervisor::{SupervisorCommand, SupervisorRegistry};
use crate::timeseries::{RangeResult, Resolution, TimeSeriesStore};

/// One interface's worth of samples from a `list_samples` call, grouped so a
/// multi-port query returns one answer per interface rather than an interleaved list.
#[derive(Debug, Clone)]
pub struct SeriesResult {
    pub interface_name: InterfaceName,
    pub data: RangeResult,
}

/// A router's current reachability summary, as shown on a fleet overview page.
#[derive(Debug, Clone)]
pub struct RouterStatus {
    pub router: Router,
    pub monitored_ports: Vec<MonitoredPort>,
}

/// Errors the facade can surface to its caller. Distinguishes "you may not see this"
/// from "the store is unhappy" so the outer HTTP layer can pick the right status code.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    Unauthorized,
    NotFound,
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => EngineError::NotFound,
            other => EngineError::Store(other),
        }
    }
}

/// Façade over the engine's Query/Control boundary. Cheap to clone (every field is an
/// `Arc`); construct one per process and hand clones to however many API handlers
/// need it.
#[derive(Clone)]
pub struct MonitoringEngine {
    state_store: Arc<dyn StateStore>,
    timeseries: Arc<dyn TimeSeriesStore>,
    fanout: Arc<FanoutHub>,
    supervisors: SupervisorRegistry,
}

impl MonitoringEngine {
    pub fn new(
        state_store: Arc<dyn StateStore>,
        timeseries: Arc<dyn TimeSeriesStore>,
        fanout: Arc<FanoutHub>,
        supervisors: SupervisorRegistry,
    ) -> Self {
        Self {
            state_store,
            timeseries,
            fanout,
            supervisors,
        }
    }

    /// Returns historical traffic for one port, or every monitored port on the router
    /// when `port` is `None`.
    pub async fn list_samples(
        &self,
        user: UserId,
        router: RouterId,
        port: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Vec<SeriesResult>, EngineError> {
        self.authorize(user, router).await?;

        let interfaces: Vec<InterfaceName> = match port {
            Some(name) => vec![name.to_string()],
            None => self
                .state_store
                .list_monitored_ports(router)
                .await?
                .into_iter()
                .map(|p| p.interface_name)
                .collect(),
        };

        let mut out = Vec::with_capacity(interfaces.len());
        for interface_name in interfaces {
            let data = self.timeseries.range(router, &interface_name, from, to, resolution).await?;
            out.push(SeriesResult { interface_name, data });
        }
        Ok(out)
    }

    /// Lists alerts visible to `user`. When `filter.router` is set, authorizes against
    /// that one router; otherwise scopes to every router `user` can see.
    pub async fn list_alerts(&self, user: UserId, filter: AlertFilter) -> Result<Vec<Alert>, EngineError> {
        if let Some(router) = filter.router {
            self.authorize(user, router).await?;
            return Ok(self.state_store.list_alerts(filter).await?);
        }

        let routers = self.state_store.list_routers().await?;
        let mut visible = Vec::new();
        for router in routers {
            if self.state_store.user_can_see_router(user, router.id).await? {
                visible.push(router.id);
            }
        }

        let mut alerts = Vec::new();
        for router_id in visible {
            let scoped = AlertFilter {
                router: Some(router_id),
                unacknowledged_only: filter.unacknowledged_only,
            };
            alerts.extend(self.state_store.list_alerts(scoped).await?);
        }
        alerts.sort_by(|a, b| b.fired_at.cmp(&a.fired_at));
        Ok(alerts)
    }

    pub async fn get_router_status(&self, user: UserId, router: RouterId) -> Result<RouterStatus, EngineError> {
        self.authorize(user, router).await?;
        let router_row = self.state_store.get_router(router).await?;
        let monitored_ports = self.state_store.list_monitored_ports(router).await?;
        Ok(RouterStatus {
            router: router_row,
            monitored_ports,
        })
    }

    /// Acknowledges an alert. The store's idempotent `acknowledge_alert` means calling
    /// this twice for the same alert is harmless; the first ack wins.
    pub async fn acknowledge_alert(&self, ack_by: String, alert_id: AlertId, at: DateTime<Utc>) -> Result<(), EngineError> {
        self.state_store.acknowledge_alert(alert_id, ack_by, at).await?;
        Ok(())
    }

    /// Forces the interface cache for a router to refresh on its next poll tick rather
    /// than waiting for the scheduled interval. Drives this by sending
    /// `SupervisorCommand::Reload` to the router's running supervisor; if the router
    /// has no supervisor yet (scheduler hasn't reconciled it in), this is a no-op —
    /// the next reconcile tick will spawn one that reads current config anyway.
    pub async fn refresh_interface_metadata(&self, user: UserId, router: RouterId) -> Result<(), EngineError> {
        self.authorize(user, router).await?;
        if let Some(sender) = self.supervisors.lock().await.get(&router) {
            let _ = sender.send(SupervisorCommand::Reload).await;
        }
        Ok(())
    }

    /// Subscribes `user`'s session to `router`'s real-time stream. Returns the session
    /// id (hand it back to `resume_realtime`/unsubscribe) and the queue to poll.
    pub async fn subscribe_realtime(&self, user: UserId, router: RouterId) -> Result<(SessionId, Arc<SessionQueue>), EngineError> {
        self.fanout.subscribe(user, router).await.map_err(|e| match e {
            SubscribeError::Unauthorized => EngineError::Unauthorized,
            SubscribeError::Busy => EngineError::Store(StoreError::Unavailable("fanout at capacity".to_string())),
            SubscribeError::Store(e) => EngineError::from(e),
        })
    }

    pub async fn resume_realtime(&self, router: RouterId) {
        self.fanout.resume(router).await;
    }

    pub async fn unsubscribe_realtime(&self, router: RouterId, session: SessionId) {
        self.fanout.unsubscribe(router, session).await;
    }

    async fn authorize(&self, user: UserId, router: RouterId) -> Result<(), EngineError> {
        if self.state_store.user_can_see_router(user, router).await? {
            Ok(())
        } else {
            Err(EngineError::Unauthorized)
        }
    }
}
