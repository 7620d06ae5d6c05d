//! Prometheus metrics for the monitoring engine.
//!
//! Enable the exporter by calling [`register_base_prometheus_registry`] once at
//! startup with your own `Registry` (or `Registry::default()`), then serve
//! [`serve_req`] from a hyper server:
//!
//! ```toml
//! [prometheus]
//!     port = 9898
//! ```
//!
//! ```yaml
//! scrape_configs:
//!     - job_name: mikromond
//!       static_configs:
//!           - targets: ['127.0.0.1:9898']
//! ```

use std::fmt::Write;
use std::sync::{LazyLock, Mutex, OnceLock};

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::CONTENT_TYPE;
use hyper::{Request, Response};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::domain::RouterId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouterLabel {
    router: String,
}

impl From<RouterId> for RouterLabel {
    fn from(id: RouterId) -> Self {
        RouterLabel { router: id.to_string() }
    }
}

impl EncodeLabelSet for RouterLabel {
    fn encode(&self, mut encoder: prometheus_client::encoding::LabelSetEncoder) -> Result<(), std::fmt::Error> {
        let mut label = encoder.encode_label();
        let mut key = label.encode_label_key()?;
        key.write_str("router")?;
        let mut value = key.encode_label_value()?;
        write!(value, "{}", self.router)?;
        value.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConditionLabel {
    condition: &'static str,
}

impl EncodeLabelSet for ConditionLabel {
    fn encode(&self, mut encoder: prometheus_client::encoding::LabelSetEncoder) -> Result<(), std::fmt::Error> {
        let mut label = encoder.encode_label();
        let mut key = label.encode_label_key()?;
        key.write_str("condition")?;
        let mut value = key.encode_label_value()?;
        write!(value, "{}", self.condition)?;
        value.finish()
    }
}

#[derive(Default)]
struct Families {
    poll_success: Family<RouterLabel, Counter>,
    poll_failure: Family<RouterLabel, Counter>,
    samples_appended: Counter,
    alerts_fired: Family<ConditionLabel, Counter>,
    alerts_cleared: Family<ConditionLabel, Counter>,
    fanout_dropped: Counter,
}

static FAMILIES: LazyLock<Families> = LazyLock::new(Families::default);

pub(crate) static BASE_STAT_REGISTRY: OnceLock<Mutex<Option<Registry>>> = OnceLock::new();

/// Adds the engine's metric families to `r` and installs it as the registry served by
/// [`serve_req`]. Call once at startup, before the first scrape.
pub fn register_base_prometheus_registry(r: Registry) {
    if BASE_STAT_REGISTRY.set(Mutex::new(Some(r))).is_err() {
        panic!("base registry already set; call register_base_prometheus_registry only once");
    }
}

pub(crate) static STAT_REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    let mut r = BASE_STAT_REGISTRY
        .get_or_init(|| Mutex::new(Some(Registry::default())))
        .lock()
        .unwrap()
        .take()
        .unwrap();

    r.register(
        "mikromond_poll_success",
        "Number of successful poll ticks per router.",
        FAMILIES.poll_success.clone(),
    );
    r.register(
        "mikromond_poll_failure",
        "Number of poll ticks where every adapter failed, per router.",
        FAMILIES.poll_failure.clone(),
    );
    r.register(
        "mikromond_samples_appended",
        "Number of traffic samples appended to the time-series store.",
        FAMILIES.samples_appended.clone(),
    );
    r.register(
        "mikromond_alerts_fired",
        "Number of alerts fired, by condition.",
        FAMILIES.alerts_fired.clone(),
    );
    r.register(
        "mikromond_alerts_cleared",
        "Number of alerts cleared, by condition.",
        FAMILIES.alerts_cleared.clone(),
    );
    r.register(
        "mikromond_fanout_dropped",
        "Number of real-time snapshots dropped from a session queue that was full.",
        FAMILIES.fanout_dropped.clone(),
    );
    r
});

pub fn record_poll_success(router: RouterId) {
    FAMILIES.poll_success.get_or_create(&router.into()).inc();
}

pub fn record_poll_failure(router: RouterId) {
    FAMILIES.poll_failure.get_or_create(&router.into()).inc();
}

pub fn record_sample_appended() {
    FAMILIES.samples_appended.inc();
}

pub fn record_alert_fired(condition: &'static str) {
    FAMILIES.alerts_fired.get_or_create(&ConditionLabel { condition }).inc();
}

pub fn record_alert_cleared(condition: &'static str) {
    FAMILIES.alerts_cleared.get_or_create(&ConditionLabel { condition }).inc();
}

pub fn record_fanout_drop() {
    FAMILIES.fanout_dropped.inc();
}

pub async fn serve_req(_req: Request<impl Body>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &STAT_REGISTRY).unwrap();

    let response = Response::builder()
        .status(200)
        .header(CONTENT_TYPE, "application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(Full::new(Bytes::from(buffer)))
        .unwrap();

    Ok(response)
}
