//! Cross-instance alert dedup (spec scenario: two engine processes racing to fire
//! the same transition). Exercises `AlertEngine` against a shared `StateStore`
//! rather than mocking the store, since the dedup guarantee lives in the partial
//! unique index the in-memory store stands in for.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mikromon_core::alert::{AlertEngine, Notification, NotificationSink, NotifyTarget};
use mikromon_core::domain::{Condition, PortId, RouterId, UserId};
use mikromon_core::state::memory::InMemoryStateStore;
use mikromon_core::state::{AlertFilter, StateStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

#[derive(Default)]
struct CountingSink {
    fired: AtomicUsize,
}

#[async_trait]
impl NotificationSink for CountingSink {
    async fn send(&self, _notification: Notification) {
        self.fired.fetch_add(1, Ordering::SeqCst);
    }

    async fn alert_cleared(&self, _router: RouterId, _port: PortId, _condition: Condition) {}
}

fn target() -> NotifyTarget {
    NotifyTarget {
        recipient: UserId(Uuid::new_v4()),
        email_enabled: true,
        popup_enabled: false,
    }
}

#[tokio::test]
async fn two_instances_racing_the_same_transition_produce_one_alert() {
    let store = Arc::new(InMemoryStateStore::new());
    let router = RouterId(Uuid::new_v4());
    let port = PortId(Uuid::new_v4());
    let target = target();

    let sink_a = Arc::new(CountingSink::default());
    let sink_b = Arc::new(CountingSink::default());
    let mut engine_a = AlertEngine::new(2, store.clone(), sink_a.clone());
    let mut engine_b = AlertEngine::new(2, store.clone(), sink_b.clone());

    // Both instances observe the same two consecutive breaches, as if a second
    // scheduler had picked up the same router after a failover.
    let t0 = Utc::now();
    engine_a.observe(router, port, "ether1", target, true, false, None, None, t0).await;
    engine_b.observe(router, port, "ether1", target, true, false, None, None, t0).await;

    let t1 = t0 + chrono::Duration::seconds(60);
    engine_a.observe(router, port, "ether1", target, true, false, None, None, t1).await;
    engine_b.observe(router, port, "ether1", target, true, false, None, None, t1).await;

    // Exactly one alert row exists regardless of how many instances raced to create it.
    let alerts = store.list_alerts(AlertFilter { router: Some(router), unacknowledged_only: true }).await.unwrap();
    assert_eq!(alerts.len(), 1, "at most one unacknowledged alert per (router, port)");

    // Exactly one instance's sink actually fired a notification; the loser suppressed
    // its own emission after losing the insert race.
    let total_fired = sink_a.fired.load(Ordering::SeqCst) + sink_b.fired.load(Ordering::SeqCst);
    assert_eq!(total_fired, 1);
}

#[tokio::test]
async fn acknowledging_then_firing_again_opens_a_new_alert() {
    let store = Arc::new(InMemoryStateStore::new());
    let router = RouterId(Uuid::new_v4());
    let port = PortId(Uuid::new_v4());
    let sink = Arc::new(CountingSink::default());
    let mut engine = AlertEngine::new(1, store.clone(), sink.clone());
    let target = target();

    let t0 = Utc::now();
    engine.observe(router, port, "ether1", target, true, false, None, None, t0).await;
    assert_eq!(sink.fired.load(Ordering::SeqCst), 1);

    let open = store
        .list_alerts(AlertFilter { router: Some(router), unacknowledged_only: true })
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    store.acknowledge_alert(open[0].id, "operator".to_string(), Utc::now()).await.unwrap();

    // Condition clears, then fires again; acknowledging freed the uniqueness slot so
    // a fresh alert can open rather than conflicting forever.
    let t1 = t0 + chrono::Duration::seconds(60);
    engine.observe(router, port, "ether1", target, false, false, None, None, t1).await;
    let t2 = t1 + chrono::Duration::seconds(60);
    engine.observe(router, port, "ether1", target, true, false, None, None, t2).await;

    assert_eq!(sink.fired.load(Ordering::SeqCst), 2);
    let open_again = store
        .list_alerts(AlertFilter { router: Some(router), unacknowledged_only: true })
        .await
        .unwrap();
    assert_eq!(open_again.len(), 1);
}
