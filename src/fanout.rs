//! Real-time fan-out: one live poller per actively-subscribed router, independent of
//! that router's scheduled Supervisor poll, serving operator sessions that want
//! sub-minute visibility.
//!
//! Grounded on the teacher's `ChannelDispatcher`/`SubscriptionStats` pair, but a
//! shared broadcast channel can't express "drop the oldest, keep the newest" per
//! subscriber, so each session gets its own bounded ring rather than a crossbeam
//! channel shared across subscribers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapter::pool::AdapterPool;
use crate::config::EngineConfig;
use crate::deriver::{CounterSample, RateDeriver};
use crate::domain::{InterfaceName, PortId, RouterId, UserId};
use crate::error::StoreError;
use crate::state::StateStore;
use crate::timeseries::{TimeSeriesStore, TrafficSample};

pub type SessionId = Uuid;

/// A derived sample pushed to every session subscribed to its router.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeSnapshot {
    pub router: RouterId,
    pub port: Option<PortId>,
    pub interface_name: InterfaceName,
    pub rx_bps: f64,
    pub tx_bps: f64,
    pub at: DateTime<Utc>,
}

/// What a session's queue can carry. `Paused` tells the UI the tab has been idle long
/// enough that the poller stopped doing device I/O; `resume` is the only way back.
#[derive(Debug, Clone, PartialEq)]
pub enum FanoutMessage {
    Sample(RealtimeSnapshot),
    Paused(RouterId),
}

/// Per-session bounded delivery queue. On overflow the oldest entry is dropped, not
/// the newest, since a live view only cares about converging on current state.
pub struct SessionQueue {
    capacity: usize,
    inner: Mutex<VecDeque<FanoutMessage>>,
    notify: Notify,
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

impl SessionQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dispatched: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    async fn push(&self, msg: FanoutMessage) {
        let mut q = self.inner.lock().await;
        if q.len() >= self.capacity {
            q.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            crate::stats::record_fanout_drop();
        }
        q.push_back(msg);
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        drop(q);
        self.notify.notify_waiters();
    }

    /// Waits for and returns the next queued message, in FIFO order.
    pub async fn recv(&self) -> FanoutMessage {
        loop {
            {
                let mut q = self.inner.lock().await;
                if let Some(msg) = q.pop_front() {
                    return msg;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn broadcast(sessions: &Mutex<HashMap<SessionId, Arc<SessionQueue>>>, msg: FanoutMessage) {
    let sessions = sessions.lock().await;
    for queue in sessions.values() {
        queue.push(msg.clone()).await;
    }
}

struct RealtimePoller {
    sessions: Arc<Mutex<HashMap<SessionId, Arc<SessionQueue>>>>,
    ticks: Arc<AtomicU32>,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl RealtimePoller {
    fn spawn(
        router_id: RouterId,
        config: Arc<EngineConfig>,
        state_store: Arc<dyn StateStore>,
        timeseries: Arc<dyn TimeSeriesStore>,
    ) -> Self {
        let sessions = Arc::new(Mutex::new(HashMap::new()));
        let ticks = Arc::new(AtomicU32::new(0));
        let paused = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_poller(
            router_id,
            config,
            state_store,
            timeseries,
            sessions.clone(),
            ticks.clone(),
            paused.clone(),
            cancel.clone(),
        ));

        Self {
            sessions,
            ticks,
            paused,
            cancel,
            handle,
        }
    }
}

async fn run_poller(
    router_id: RouterId,
    config: Arc<EngineConfig>,
    state_store: Arc<dyn StateStore>,
    timeseries: Arc<dyn TimeSeriesStore>,
    sessions: Arc<Mutex<HashMap<SessionId, Arc<SessionQueue>>>>,
    ticks: Arc<AtomicU32>,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    // Its own deriver cache, distinct from the supervisor's scheduled-poll cache, so a
    // live-subscribed dashboard tab never perturbs the series the alert engine reasons
    // about.
    let mut deriver = RateDeriver::with_max_gap(config.max_gap());
    let mut ticker = tokio::time::interval(config.rt_interval());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if paused.load(Ordering::Relaxed) {
            continue;
        }

        let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if tick > config.rt_max_ticks {
            paused.store(true, Ordering::Relaxed);
            broadcast(&sessions, FanoutMessage::Paused(router_id)).await;
            continue;
        }

        let router = match state_store.get_router(router_id).await {
            Ok(r) => r,
            Err(_) => return,
        };

        let native_pool = AdapterPool::new(config.pool.native_per_router);
        let rest_pool = AdapterPool::new(config.pool.rest_per_router);
        let adapters = crate::supervisor::build_adapters(&router, &config.deadlines, native_pool, rest_pool);
        let adapter = adapters
            .iter()
            .find(|(kind, _)| *kind == router.last_successful_method)
            .or_else(|| adapters.first())
            .map(|(_, a)| a.clone());
        let Some(adapter) = adapter else { continue };

        let snapshot = tokio::time::timeout(config.deadlines.store(), adapter.poll()).await;
        let Ok(Ok(snapshot)) = snapshot else { continue };

        let monitored = state_store.list_monitored_ports(router_id).await.unwrap_or_default();
        let port_by_name: HashMap<&str, PortId> =
            monitored.iter().map(|p| (p.interface_name.as_str(), p.id)).collect();

        for (name, counter) in &snapshot.counters {
            let Some(rate) = deriver.observe(
                router_id,
                name,
                CounterSample {
                    at: counter.at,
                    rx_bytes: counter.rx_bytes,
                    tx_bytes: counter.tx_bytes,
                },
            ) else {
                continue;
            };

            let _ = timeseries
                .append(
                    router_id,
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

            broadcast(
                &sessions,
                FanoutMessage::Sample(RealtimeSnapshot {
                    router: router_id,
                    port: port_by_name.get(name.as_str()).copied(),
                    interface_name: name.clone(),
                    rx_bps: rate.rx_bps,
                    tx_bps: rate.tx_bps,
                    at: counter.at,
                }),
            )
            .await;
        }
    }
}

impl Drop for RealtimePoller {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Rejected at `subscribe` time; never mid-stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeError {
    Unauthorized,
    /// The global cap on concurrently subscribed routers (`fanout_max_routers`) is
    /// already saturated.
    Busy,
    Store(StoreError),
}

/// Owns every live poller plus the per-router session registries sitting on top of
/// them. One `FanoutHub` per process.
pub struct FanoutHub {
    config: Arc<EngineConfig>,
    state_store: Arc<dyn StateStore>,
    timeseries: Arc<dyn TimeSeriesStore>,
    pollers: Mutex<HashMap<RouterId, RealtimePoller>>,
}

impl FanoutHub {
    pub fn new(config: Arc<EngineConfig>, state_store: Arc<dyn StateStore>, timeseries: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            config,
            state_store,
            timeseries,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    /// Authorizes `user` against `router_id`, then registers a new session on that
    /// router's poller, starting one if this is the first subscriber. Returns the
    /// session id the caller must hand back to `unsubscribe`/`resume`, plus the queue
    /// to read snapshots from.
    pub async fn subscribe(&self, user: UserId, router_id: RouterId) -> Result<(SessionId, Arc<SessionQueue>), SubscribeError> {
        let allowed = self
            .state_store
            .user_can_see_router(user, router_id)
            .await
            .map_err(SubscribeError::Store)?;
        if !allowed {
            return Err(SubscribeError::Unauthorized);
        }

        let mut pollers = self.pollers.lock().await;
        if !pollers.contains_key(&router_id) && pollers.len() >= self.config.fanout_max_routers {
            return Err(SubscribeError::Busy);
        }

        let poller = pollers.entry(router_id).or_insert_with(|| {
            RealtimePoller::spawn(
                router_id,
                self.config.clone(),
                self.state_store.clone(),
                self.timeseries.clone(),
            )
        });

        let session_id = Uuid::new_v4();
        let queue = Arc::new(SessionQueue::new(self.config.rt_queue_depth));
        poller.sessions.lock().await.insert(session_id, queue.clone());
        Ok((session_id, queue))
    }

    /// Drops a session's subscription. Stops the router's poller once its last
    /// session leaves.
    pub async fn unsubscribe(&self, router_id: RouterId, session_id: SessionId) {
        let mut pollers = self.pollers.lock().await;
        let Some(poller) = pollers.get(&router_id) else {
            return;
        };

        let mut sessions = poller.sessions.lock().await;
        sessions.remove(&session_id);
        let empty = sessions.is_empty();
        drop(sessions);

        if empty {
            pollers.remove(&router_id);
        }
    }

    /// Resets a router's poller past its auto-pause, restarting device I/O on the
    /// next tick.
    pub async fn resume(&self, router_id: RouterId) {
        let pollers = self.pollers.lock().await;
        if let Some(poller) = pollers.get(&router_id) {
            poller.ticks.store(0, Ordering::Relaxed);
            poller.paused.store(false, Ordering::Relaxed);
        }
    }

    /// Terminates every live poller; sessions observe no further messages. Called
    /// once from the scheduler's shutdown path.
    pub async fn shutdown(&self) {
        let mut pollers = self.pollers.lock().await;
        pollers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_drops_oldest_when_full() {
        let q = SessionQueue::new(2);
        let sample = |n: i64| {
            FanoutMessage::Sample(RealtimeSnapshot {
                router: RouterId(uuid::Uuid::nil()),
                port: None,
                interface_name: "ether1".to_string(),
                rx_bps: n as f64,
                tx_bps: 0.0,
                at: DateTime::UNIX_EPOCH + chrono::Duration::seconds(n),
            })
        };

        q.push(sample(1)).await;
        q.push(sample(2)).await;
        q.push(sample(3)).await; // drops sample(1)

        let first = q.recv().await;
        match first {
            FanoutMessage::Sample(s) => assert_eq!(s.rx_bps, 2.0),
            _ => panic!("expected sample"),
        }
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.dispatched(), 3);
    }

    #[tokio::test]
    async fn subscribe_rejects_unauthorized_user() {
        use crate::domain::{AdapterKind, InterfaceDisplayMode};
        use crate::state::memory::InMemoryStateStore;
        use crate::state::Router;
        use crate::timeseries::memory::InMemoryTimeSeriesStore;

        let state_store = Arc::new(InMemoryStateStore::new());
        let router_id = RouterId(uuid::Uuid::new_v4());
        state_store
            .insert_router(Router {
                id: router_id,
                owner: UserId(uuid::Uuid::new_v4()),
                group: None,
                display_name: "edge1".to_string(),
                host: "10.0.0.1".to_string(),
                native_port: 8728,
                username: "admin".to_string(),
                credential_handle: "handle".to_string(),
                rest_enabled: false,
                rest_port: None,
                snmp_enabled: false,
                snmp_port: None,
                snmp_community: None,
                snmp_version: None,
                interface_display_mode: InterfaceDisplayMode::Static,
                last_successful_method: AdapterKind::Native,
                reachable: false,
                connected: false,
                last_connected_at: None,
            })
            .await;

        let timeseries = Arc::new(InMemoryTimeSeriesStore::new());
        let hub = FanoutHub::new(Arc::new(EngineConfig::default()), state_store, timeseries);

        let stranger = UserId(uuid::Uuid::new_v4());
        let err = hub.subscribe(stranger, router_id).await.unwrap_err();
        assert_eq!(err, SubscribeError::Unauthorized);
    }
}
