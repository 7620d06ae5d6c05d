//! Debounced threshold alerting: port-down and traffic-low conditions, firing and
//! clearing after a run of consecutive samples rather than on a single blip.
//!
//! Debounce state for a given `(router, port, condition)` lives exclusively inside
//! whichever supervisor task owns that router's poll loop, so there is never a lock
//! to take here. The only place concurrency shows up is the store write: two
//! scheduler instances racing to fire the same alert resolve through the partial
//! unique index, surfaced to this module as `StoreError::Conflict`.

pub mod notify;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{Condition, PortId, RouterId, UserId};
use crate::error::StoreError;
use crate::state::{AlertCondition, StateStore};

pub use notify::{Channel, LoggingSink, Notification, NotificationSink};

/// Who to notify and over which channels, carried alongside a monitored port's
/// instantaneous condition values. Bundled into one type so `observe`/`evaluate`
/// don't grow a parameter per §3 flag.
#[derive(Debug, Clone, Copy)]
pub struct NotifyTarget {
    pub recipient: UserId,
    pub email_enabled: bool,
    pub popup_enabled: bool,
}

fn condition_name(condition: Condition) -> &'static str {
    match condition {
        Condition::PortDown => "port_down",
        Condition::TrafficLow => "traffic_low",
    }
}

/// Per-condition debounce counters for one monitored port.
#[derive(Debug, Clone, Copy, Default)]
struct ConditionState {
    consecutive_true: u32,
    consecutive_false: u32,
    firing: bool,
}

/// Evaluates threshold conditions for the ports belonging to one router and turns
/// sustained breaches into alert-store writes.
pub struct AlertEngine {
    debounce_window: u32,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn NotificationSink>,
    state: HashMap<(PortId, Condition), ConditionState>,
}

impl AlertEngine {
    pub fn new(debounce_window: u32, store: Arc<dyn StateStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            debounce_window: debounce_window.max(1),
            store,
            sink,
            state: HashMap::new(),
        }
    }

    /// Feeds one poll's worth of observations for a monitored port. `port_down` and
    /// `traffic_low` are the instantaneous (non-debounced) condition values for this
    /// sample; `current_bps`/`threshold_bps` are carried only to annotate an alert
    /// row if one fires. The engine applies debouncing and decides whether a store
    /// write (fire or clear) is warranted.
    #[allow(clippy::too_many_arguments)]
    pub async fn observe(
        &mut self,
        router: RouterId,
        port: PortId,
        port_name: &str,
        target: NotifyTarget,
        port_down: bool,
        traffic_low: bool,
        current_bps: Option<f64>,
        threshold_bps: Option<f64>,
        at: DateTime<Utc>,
    ) {
        self.evaluate(router, port, port_name, target, Condition::PortDown, port_down, None, None, at)
            .await;
        self.evaluate(
            router,
            port,
            port_name,
            target,
            Condition::TrafficLow,
            traffic_low,
            current_bps,
            threshold_bps,
            at,
        )
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate(
        &mut self,
        router: RouterId,
        port: PortId,
        port_name: &str,
        target: NotifyTarget,
        condition: Condition,
        is_true: bool,
        current_bps: Option<f64>,
        threshold_bps: Option<f64>,
        at: DateTime<Utc>,
    ) {
        let key = (port, condition);
        let entry = self.state.entry(key).or_default();

        if is_true {
            entry.consecutive_true += 1;
            entry.consecutive_false = 0;
        } else {
            entry.consecutive_false += 1;
            entry.consecutive_true = 0;
        }

        let should_fire = !entry.firing && entry.consecutive_true >= self.debounce_window;
        let should_clear = entry.firing && entry.consecutive_false >= self.debounce_window;

        if should_fire {
            let message = match condition {
                Condition::PortDown => format!("{port_name} is down"),
                Condition::TrafficLow => format!(
                    "{port_name} traffic {} is below threshold {}",
                    current_bps.map(|v| v.to_string()).unwrap_or_default(),
                    threshold_bps.map(|v| v.to_string()).unwrap_or_default()
                ),
            };
            match self
                .store
                .fire_alert(
                    router,
                    port,
                    port_name,
                    condition.into(),
                    condition.severity(),
                    message.clone(),
                    current_bps,
                    threshold_bps,
                    at,
                )
                .await
            {
                Ok(id) => {
                    entry.firing = true;
                    crate::stats::record_alert_fired(condition_name(condition));
                    let title = match condition {
                        Condition::PortDown => format!("{port_name} is down"),
                        Condition::TrafficLow => format!("{port_name} traffic is low"),
                    };
                    // One delivery per enabled channel, per §4.6 step 2.
                    if target.email_enabled {
                        self.sink
                            .send(Notification {
                                channel: Channel::Email,
                                recipient: target.recipient,
                                title: title.clone(),
                                body: message.clone(),
                                alert_id: id,
                            })
                            .await;
                    }
                    if target.popup_enabled {
                        self.sink
                            .send(Notification {
                                channel: Channel::Popup,
                                recipient: target.recipient,
                                title,
                                body: message,
                                alert_id: id,
                            })
                            .await;
                    }
                }
                Err(StoreError::Conflict) => {
                    // Another instance already fired this alert; converge to the same
                    // "firing" view without writing or notifying twice.
                    entry.firing = true;
                }
                Err(_) => {
                    // Storage is unavailable for this tick; leave `firing` unset so the
                    // next sustained observation retries rather than silently giving up.
                }
            }
        } else if should_clear {
            let alert_condition: AlertCondition = condition.into();
            if self.store.clear_alert(router, port, alert_condition, at).await.is_ok() {
                entry.firing = false;
                crate::stats::record_alert_cleared(condition_name(condition));
                self.sink.alert_cleared(router, port, condition).await;
            }
        }
    }

    /// Drops debounce state for a port that was un-monitored or deleted.
    pub fn forget_port(&mut self, port: PortId) {
        self.state.retain(|(p, _), _| *p != port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::memory::InMemoryStateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct CountingSink {
        fired: AtomicUsize,
        cleared: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl NotificationSink for CountingSink {
        async fn send(&self, _notification: Notification) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }

        async fn alert_cleared(&self, _router: RouterId, _port: PortId, _condition: Condition) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn both_channels() -> NotifyTarget {
        NotifyTarget {
            recipient: UserId(Uuid::nil()),
            email_enabled: true,
            popup_enabled: true,
        }
    }

    #[tokio::test]
    async fn fires_only_after_debounce_window() {
        let store = Arc::new(InMemoryStateStore::new());
        let sink = Arc::new(CountingSink::default());
        let mut engine = AlertEngine::new(2, store.clone(), sink.clone());
        let router = RouterId(Uuid::nil());
        let port = PortId(Uuid::nil());
        let target = both_channels();

        engine.observe(router, port, "ether1", target, true, false, None, None, Utc::now()).await;
        assert_eq!(sink.fired.load(Ordering::SeqCst), 0);

        engine.observe(router, port, "ether1", target, true, false, None, None, Utc::now()).await;
        // Both email and popup are enabled, so the sustained breach emits two deliveries.
        assert_eq!(sink.fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn only_enabled_channels_receive_a_delivery() {
        let store = Arc::new(InMemoryStateStore::new());
        let sink = Arc::new(CountingSink::default());
        let mut engine = AlertEngine::new(2, store.clone(), sink.clone());
        let router = RouterId(Uuid::nil());
        let port = PortId(Uuid::nil());
        let target = NotifyTarget {
            recipient: UserId(Uuid::nil()),
            email_enabled: true,
            popup_enabled: false,
        };

        engine.observe(router, port, "ether1", target, true, false, None, None, Utc::now()).await;
        engine.observe(router, port, "ether1", target, true, false, None, None, Utc::now()).await;
        assert_eq!(sink.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_blip_does_not_fire() {
        let store = Arc::new(InMemoryStateStore::new());
        let sink = Arc::new(CountingSink::default());
        let mut engine = AlertEngine::new(3, store, sink.clone());
        let router = RouterId(Uuid::nil());
        let port = PortId(Uuid::nil());
        let target = both_channels();

        engine.observe(router, port, "ether1", target, true, false, None, None, Utc::now()).await;
        engine.observe(router, port, "ether1", target, false, false, None, None, Utc::now()).await;
        engine.observe(router, port, "ether1", target, true, false, None, None, Utc::now()).await;
        assert_eq!(sink.fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clears_after_debounced_recovery() {
        let store = Arc::new(InMemoryStateStore::new());
        let sink = Arc::new(CountingSink::default());
        let mut engine = AlertEngine::new(2, store, sink.clone());
        let router = RouterId(Uuid::nil());
        let port = PortId(Uuid::nil());
        let target = both_channels();

        engine.observe(router, port, "ether1", target, true, false, None, None, Utc::now()).await;
        engine.observe(router, port, "ether1", target, true, false, None, None, Utc::now()).await;
        assert_eq!(sink.fired.load(Ordering::SeqCst), 2);

        engine.observe(router, port, "ether1", target, false, false, None, None, Utc::now()).await;
        assert_eq!(sink.cleared.load(Ordering::SeqCst), 0);
        engine.observe(router, port, "ether1", target, false, false, None, None, Utc::now()).await;
        assert_eq!(sink.cleared.load(Ordering::SeqCst), 1);
    }
}
