//! Owns the lifecycle of every per-router Supervisor task: spawns one for each router
//! the State Store reports, tears one down when its router disappears, and drives
//! graceful shutdown of the whole fleet plus the Fan-out Hub.
//!
//! Reconciliation runs on its own ticker rather than reacting to individual CRUD
//! writes, the same way the teacher prefers a periodic sweep over a notification feed
//! for anything whose staleness window is already bounded by a short interval.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::alert::{AlertEngine, NotificationSink};
use crate::config::EngineConfig;
use crate::domain::RouterId;
use crate::fanout::FanoutHub;
use crate::state::StateStore;
use crate::supervisor::{RouterSupervisor, SupervisorCommand, SupervisorRegistry};
use crate::timeseries::TimeSeriesStore;

struct RunningSupervisor {
    commands: mpsc::Sender<SupervisorCommand>,
    handle: tokio::task::JoinHandle<()>,
}

/// A single cooperative scheduler for the whole process. Construct one, call
/// [`Scheduler::run`] inside its own `tokio::spawn`, and hold the returned handle to
/// request shutdown later via the `CancellationToken` passed in at construction.
pub struct Scheduler {
    config: Arc<EngineConfig>,
    state_store: Arc<dyn StateStore>,
    timeseries: Arc<dyn TimeSeriesStore>,
    sink: Arc<dyn NotificationSink>,
    fanout: Arc<FanoutHub>,
    cancel: CancellationToken,
    supervisors: HashMap<RouterId, RunningSupervisor>,
    registry: SupervisorRegistry,
}

impl Scheduler {
    pub fn new(
        config: Arc<EngineConfig>,
        state_store: Arc<dyn StateStore>,
        timeseries: Arc<dyn TimeSeriesStore>,
        sink: Arc<dyn NotificationSink>,
        fanout: Arc<FanoutHub>,
        cancel: CancellationToken,
        registry: SupervisorRegistry,
    ) -> Self {
        Self {
            config,
            state_store,
            timeseries,
            sink,
            fanout,
            cancel,
            supervisors: HashMap::new(),
            registry,
        }
    }

    /// Runs the reconcile loop until cancelled, then drains every Supervisor with a
    /// bounded grace period before returning.
    pub async fn run(mut self) {
        let mut reconcile_ticker = tokio::time::interval(self.config.reconcile_interval());
        let mut housekeeping_ticker = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = reconcile_ticker.tick() => self.reconcile().await,
                _ = housekeeping_ticker.tick() => self.housekeeping().await,
            }
        }
        self.shutdown().await;
    }

    /// Daily retention/compaction sweep: drops raw samples past `retention`, and
    /// materializes aggregates for samples old enough to be served from them instead
    /// of a raw scan (`compaction_after`).
    async fn housekeeping(&self) {
        let now = chrono::Utc::now();
        match self.timeseries.retain(now - self.config.retention()).await {
            Ok(deleted) => log::info!("scheduler: retention sweep removed {deleted} raw samples"),
            Err(e) => log::warn!("scheduler: retention sweep failed: {e}"),
        }
        if let Err(e) = self.timeseries.compact(now - self.config.compaction_after()).await {
            log::warn!("scheduler: compaction sweep failed: {e}");
        }
    }

    async fn reconcile(&mut self) {
        let routers = match self.state_store.list_routers().await {
            Ok(rs) => rs,
            Err(e) => {
                log::warn!("scheduler: failed to list routers for reconciliation: {e}");
                return;
            }
        };

        let live_ids: std::collections::HashSet<RouterId> = routers.iter().map(|r| r.id).collect();

        let stale: Vec<RouterId> = self
            .supervisors
            .keys()
            .copied()
            .filter(|id| !live_ids.contains(id))
            .collect();
        for id in stale {
            if let Some(sup) = self.supervisors.remove(&id) {
                log::debug!("scheduler: router {id:?} no longer present, stopping its supervisor");
                let _ = sup.commands.send(SupervisorCommand::Stop).await;
            }
            self.registry.lock().await.remove(&id);
        }

        for router in &routers {
            if self.supervisors.contains_key(&router.id) {
                continue;
            }
            log::debug!("scheduler: spawning supervisor for new router {:?}", router.id);
            self.spawn_supervisor(router.id).await;
        }
    }

    async fn spawn_supervisor(&mut self, router_id: RouterId) {
        let (tx, rx) = mpsc::channel(4);
        let alert_engine = AlertEngine::new(self.config.debounce_window, self.state_store.clone(), self.sink.clone());
        let supervisor = RouterSupervisor::new(
            router_id,
            self.config.clone(),
            self.state_store.clone(),
            self.timeseries.clone(),
            alert_engine,
            rx,
        );
        let handle = tokio::spawn(supervisor.run());
        self.registry.lock().await.insert(router_id, tx.clone());
        self.supervisors.insert(router_id, RunningSupervisor { commands: tx, handle });
    }

    async fn shutdown(mut self) {
        log::info!("scheduler: shutting down, signalling {} supervisors", self.supervisors.len());
        for sup in self.supervisors.values() {
            let _ = sup.commands.send(SupervisorCommand::Stop).await;
        }
        self.registry.lock().await.clear();
        self.fanout.shutdown().await;

        let handles: Vec<_> = self.supervisors.drain().map(|(_, sup)| sup.handle).collect();
        let grace = self.config.grace_period();
        if tokio::time::timeout(grace, futures_join_all(handles)).await.is_err() {
            log::warn!("scheduler: grace period elapsed with supervisors still in flight; abandoning them");
        }
    }
}

/// Waits for every handle, tolerating individual task panics rather than propagating
/// one failed join as a whole-shutdown error.
async fn futures_join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}
