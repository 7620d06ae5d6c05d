//! Per-router poll loop: adapter selection with fallback, backoff on failure, and the
//! writes that keep state and time-series stores current.
//!
//! One `RouterSupervisor` owns exactly one router for its whole lifetime. It is
//! driven by its own `tokio::spawn`ed loop and accepts out-of-band commands (stop,
//! reload) over an `mpsc` channel rather than being polled externally, mirroring how
//! a long-lived worker task is structured elsewhere in this crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::adapter::{native::NativeEndpoint, pool::AdapterPool, rest::RestEndpoint, snmp::SnmpEndpoint, DeviceAdapter};
use crate::adapter::{NativeAdapter, RestAdapter, SnmpAdapter};
use crate::alert::{AlertEngine, NotifyTarget};
use crate::config::{AdapterDeadlines, EngineConfig};
use crate::deriver::{CounterSample, RateDeriver};
use crate::domain::{AdapterKind, PortId, RouterId};
use crate::error::AdapterError;
use crate::state::{MonitoredPort, Router, RouterInterface, StateStore};
use crate::timeseries::{TimeSeriesStore, TrafficSample};

/// Where a supervisor's poll loop currently is. Exposed for tests and for the
/// scheduler's reconciliation logging; not persisted anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Probing,
    Polling,
    Unreachable,
    Stopping,
}

/// What one `poll_once` attempt resolved to, for the backoff/interval decision in
/// `run`. Distinct from `Result<(), AdapterError>` because a reachability-only tick
/// (router with nothing monitored) is a success that still wants a longer interval.
enum PollOutcome {
    Success,
    ReachabilityOnly,
    Failed(AdapterError),
}

/// Commands a supervisor task accepts from the scheduler.
pub enum SupervisorCommand {
    /// Router configuration changed (adapters enabled, credentials, etc.); re-read
    /// from the state store on the next tick instead of waiting a full interval.
    Reload,
    Stop,
}

/// Shared view of every running supervisor's command sender, so a component other
/// than the Scheduler (the query/control façade in `engine.rs`) can reach into a
/// live poll loop without owning it. The Scheduler is still the only writer; this is
/// read-mostly fan-out of the same senders `Scheduler` already holds.
pub type SupervisorRegistry = Arc<Mutex<HashMap<RouterId, mpsc::Sender<SupervisorCommand>>>>;

/// Per-router counter state kept across ticks. Separate from the real-time poller's
/// own `RateDeriver` so a live-subscribed dashboard tab doesn't perturb the
/// base-interval series the alert engine reasons about.
struct Backoff {
    consecutive_failures: u32,
}

impl Backoff {
    fn new() -> Self {
        Self { consecutive_failures: 0 }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    fn next_interval(&self, base: Duration, max: Duration) -> Duration {
        let multiplier = 1u32 << self.consecutive_failures.min(5); // caps at 32x
        base.saturating_mul(multiplier).min(max)
    }
}

/// Builds every adapter the router has enabled, in no particular order. Shared with
/// the fan-out hub's real-time poller, which picks a single one rather than the
/// supervisor's full fallback loop.
pub(crate) fn build_adapters(
    router: &Router,
    deadlines: &AdapterDeadlines,
    native_pool: AdapterPool,
    rest_pool: AdapterPool,
) -> Vec<(AdapterKind, Arc<dyn DeviceAdapter>)> {
    let mut out: Vec<(AdapterKind, Arc<dyn DeviceAdapter>)> = Vec::new();

    out.push((
        AdapterKind::Native,
        Arc::new(NativeAdapter::new(
            NativeEndpoint {
                host: router.host.clone(),
                port: router.native_port,
                username: router.username.clone(),
                password: router.credential_handle.clone(),
            },
            deadlines.native(),
            native_pool,
        )),
    ));

    if router.rest_enabled {
        out.push((
            AdapterKind::Rest,
            Arc::new(RestAdapter::new(
                RestEndpoint {
                    base_url: format!("https://{}:{}", router.host, router.rest_port.unwrap_or(443)),
                    username: router.username.clone(),
                    password: router.credential_handle.clone(),
                },
                deadlines.rest(),
                rest_pool,
            )),
        ));
    }

    if router.snmp_enabled {
        if let (Some(port), Some(community), Some(version)) =
            (router.snmp_port, router.snmp_community.clone(), router.snmp_version)
        {
            let snmp_version = version;
            out.push((
                AdapterKind::Snmp,
                Arc::new(SnmpAdapter::new(
                    SnmpEndpoint {
                        host: router.host.clone(),
                        port,
                        community,
                        version: snmp_version,
                    },
                    deadlines.snmp(),
                )),
            ));
        }
    }

    out
}

/// Runs one router's poll loop until told to stop. Call [`RouterSupervisor::run`]
/// inside a `tokio::spawn`; the scheduler holds the returned `JoinHandle` plus the
/// `mpsc::Sender<SupervisorCommand>` created alongside it.
pub struct RouterSupervisor {
    router_id: RouterId,
    config: Arc<EngineConfig>,
    state_store: Arc<dyn StateStore>,
    timeseries: Arc<dyn TimeSeriesStore>,
    alert_engine: AlertEngine,
    deriver: RateDeriver,
    backoff: Backoff,
    state: SupervisorState,
    commands: mpsc::Receiver<SupervisorCommand>,
    /// Adapters this router has demoted after an `auth_failed`. Retrying them has no
    /// value until the operator edits the router's configuration, so they're skipped
    /// in the fallback order until the next `Reload`.
    auth_disabled: std::collections::HashSet<AdapterKind>,
}

impl RouterSupervisor {
    pub fn new(
        router_id: RouterId,
        config: Arc<EngineConfig>,
        state_store: Arc<dyn StateStore>,
        timeseries: Arc<dyn TimeSeriesStore>,
        alert_engine: AlertEngine,
        commands: mpsc::Receiver<SupervisorCommand>,
    ) -> Self {
        Self {
            router_id,
            state_store,
            timeseries,
            alert_engine,
            deriver: RateDeriver::with_max_gap(config.max_gap()),
            backoff: Backoff::new(),
            state: SupervisorState::Idle,
            commands,
            config,
            auth_disabled: std::collections::HashSet::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub async fn run(mut self) {
        loop {
            let router = match self.state_store.get_router(self.router_id).await {
                Ok(r) => r,
                Err(_) => {
                    // Router was deleted out from under us; nothing left to poll.
                    self.state = SupervisorState::Stopping;
                    return;
                }
            };

            self.state = SupervisorState::Probing;
            let outcome = self.poll_once(&router).await;

            let mut interval_floor = self.config.base_interval();
            match outcome {
                PollOutcome::Success => {
                    self.backoff.record_success();
                    crate::stats::record_poll_success(self.router_id);
                }
                PollOutcome::ReachabilityOnly => {
                    // Nothing assigned to this router is worth a full interface/counter
                    // round trip every tick; back off to a reduced cadence even though
                    // the probe itself succeeded.
                    self.backoff.record_success();
                    crate::stats::record_poll_success(self.router_id);
                    interval_floor = self.config.base_interval().saturating_mul(4);
                }
                PollOutcome::Failed(_) => {
                    self.backoff.record_failure();
                    crate::stats::record_poll_failure(self.router_id);
                }
            }

            let interval = self
                .backoff
                .next_interval(self.config.base_interval(), self.config.max_backoff())
                .max(interval_floor);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(SupervisorCommand::Stop) | None => {
                            self.state = SupervisorState::Stopping;
                            return;
                        }
                        Some(SupervisorCommand::Reload) => {
                            self.auth_disabled.clear();
                            continue;
                        }
                    }
                }
            }
        }
    }

    async fn poll_once(&mut self, router: &Router) -> PollOutcome {
        let native_pool = AdapterPool::new(self.config.pool.native_per_router);
        let rest_pool = AdapterPool::new(self.config.pool.rest_per_router);
        let adapters = build_adapters(router, &self.config.deadlines, native_pool, rest_pool);
        let order = AdapterKind::fallback_order(router.last_successful_method, router.rest_enabled, router.snmp_enabled);

        // Step 2 of the adapter selection algorithm: a cheap reachability probe ahead
        // of committing to a full interface/counter round trip. Probed with the sticky
        // (first-in-order) adapter, since host reachability doesn't depend on which
        // protocol answers it.
        let probe_adapter = order
            .first()
            .and_then(|k| adapters.iter().find(|(kind, _)| kind == k))
            .map(|(_, a)| a.clone());
        let reachable = match &probe_adapter {
            Some(a) => timeout(self.config.deadlines.probe(), a.probe())
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false),
            None => false,
        };
        if !reachable {
            let _ = self
                .state_store
                .update_router_status(router.id, None, false, false)
                .await;
            self.state = SupervisorState::Unreachable;
            return PollOutcome::Failed(AdapterError::Unreachable);
        }

        let monitored_empty = self
            .state_store
            .list_monitored_ports(router.id)
            .await
            .map(|ports| ports.is_empty())
            .unwrap_or(false);
        if monitored_empty {
            let _ = self
                .state_store
                .update_router_status(router.id, None, true, true)
                .await;
            self.state = SupervisorState::Idle;
            return PollOutcome::ReachabilityOnly;
        }

        let mut last_err = AdapterError::Unreachable;
        for kind in order {
            if self.auth_disabled.contains(&kind) {
                continue;
            }
            let Some((_, adapter)) = adapters.iter().find(|(k, _)| *k == kind) else {
                continue;
            };

            self.state = SupervisorState::Polling;
            let snapshot = timeout(self.config.deadlines.store(), adapter.poll()).await;
            let snapshot = match snapshot {
                Ok(Ok(s)) => s,
                Ok(Err(AdapterError::AuthFailed)) => {
                    log::warn!(
                        "supervisor: router {:?} rejected credentials over {kind}, disabling it until reload",
                        router.id
                    );
                    self.auth_disabled.insert(kind);
                    last_err = AdapterError::AuthFailed;
                    continue;
                }
                Ok(Err(e)) => {
                    last_err = e;
                    continue;
                }
                Err(_) => {
                    last_err = AdapterError::Timeout;
                    continue;
                }
            };

            self.handle_snapshot(router, kind, snapshot).await;
            return PollOutcome::Success;
        }

        // Every adapter failed past a successful probe: reachable at L3, but no
        // protocol could complete a poll.
        let _ = self
            .state_store
            .update_router_status(router.id, None, true, false)
            .await;
        self.state = SupervisorState::Unreachable;
        PollOutcome::Failed(last_err)
    }

    async fn handle_snapshot(
        &mut self,
        router: &Router,
        used: AdapterKind,
        snapshot: crate::adapter::PollSnapshot,
    ) {
        let _ = self
            .state_store
            .update_router_status(router.id, Some(used), true, true)
            .await;

        let interfaces: Vec<RouterInterface> = snapshot
            .interfaces
            .iter()
            .map(|i| RouterInterface {
                router_id: router.id,
                name: i.name.clone(),
                kind: format!("{:?}", i.kind),
                mac: i.mac.clone(),
                comment: i.comment.clone(),
                running: i.running,
                disabled: i.disabled,
                last_seen_at: Utc::now(),
            })
            .collect();
        let _ = self.state_store.upsert_interfaces(router.id, interfaces).await;

        let monitored = self
            .state_store
            .list_monitored_ports(router.id)
            .await
            .unwrap_or_default();
        let monitored_by_name: HashMap<&str, &MonitoredPort> =
            monitored.iter().map(|p| (p.interface_name.as_str(), p)).collect();
        let snapshot_by_name: HashMap<&str, &crate::adapter::InterfaceInfo> =
            snapshot.interfaces.iter().map(|i| (i.name.as_str(), i)).collect();

        // Snapshot mac/comment onto every monitored port the device still reports,
        // per §3 ("comment & MAC (snapshot)"); a port dropped from the device's
        // interface list simply keeps its last-known values.
        for port in &monitored {
            if let Some(info) = snapshot_by_name.get(port.interface_name.as_str()) {
                let _ = self
                    .state_store
                    .update_port_snapshot(port.id, info.mac.clone(), info.comment.clone())
                    .await;
            }
        }

        let by_name: HashMap<&str, &crate::adapter::CounterReading> =
            snapshot.counters.iter().map(|(n, c)| (n.as_str(), c)).collect();
        let running_by_name: HashMap<&str, bool> =
            snapshot.interfaces.iter().map(|i| (i.name.as_str(), i.running)).collect();

        for (name, counter) in &snapshot.counters {
            let Some(rate) = self.deriver.observe(
                router.id,
                name,
                CounterSample {
                    at: counter.at,
                    rx_bytes: counter.rx_bytes,
                    tx_bytes: counter.tx_bytes,
                },
            ) else {
                continue;
            };

            let _ = self
                .timeseries
                .append(
                    router.id,
                    name,
                    TrafficSample {
                        at: counter.at,
                        rx_bytes: counter.rx_bytes,
                        tx_bytes: counter.tx_bytes,
                        rx_bps: rate.rx_bps,
                        tx_bps: rate.tx_bps,
                    },
                )
                .await;
            crate::stats::record_sample_appended();

            if let Some(port) = monitored_by_name.get(name.as_str()) {
                if !port.alerts_enabled {
                    continue;
                }
                let total_bps = rate.rx_bps + rate.tx_bps;
                let port_down = !running_by_name.get(name.as_str()).copied().unwrap_or(false);
                let traffic_low = !port_down
                    && port
                        .traffic_low_bps
                        .map(|threshold| total_bps < threshold)
                        .unwrap_or(false);
                let target = NotifyTarget {
                    recipient: router.owner,
                    email_enabled: port.email_enabled,
                    popup_enabled: port.popup_enabled,
                };
                self.alert_engine
                    .observe(
                        router.id,
                        port.id,
                        name,
                        target,
                        port_down,
                        traffic_low,
                        Some(total_bps),
                        port.traffic_low_bps,
                        counter.at,
                    )
                    .await;
            }
        }

        // A monitored port the device no longer reports at all (renamed, removed,
        // adapter switched to one with a different interface set) is as "down" as one
        // that is merely `running=false`; it just never produced a counter this tick.
        for port in monitored.iter().filter(|p| p.alerts_enabled) {
            if by_name.contains_key(port.interface_name.as_str()) {
                continue;
            }
            let target = NotifyTarget {
                recipient: router.owner,
                email_enabled: port.email_enabled,
                popup_enabled: port.popup_enabled,
            };
            self.alert_engine
                .observe(
                    router.id,
                    port.id,
                    &port.interface_name,
                    target,
                    true,
                    false,
                    None,
                    port.traffic_low_bps,
                    Utc::now(),
                )
                .await;
        }
    }
}

/// Identifies which port is responsible for a given by-name lookup, used by the
/// fan-out hub when it needs to map a real-time sample back to a monitored port id
/// without duplicating the supervisor's own lookup.
pub fn port_id_for_interface(ports: &[MonitoredPort], interface: &str) -> Option<PortId> {
    ports.iter().find(|p| p.interface_name == interface).map(|p| p.id)
}
