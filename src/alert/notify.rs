//! Where a fired alert goes once the debounce window confirms it.
//!
//! The engine ships only a logging sink; actually dialing out to SMTP or a push
//! service is an operator UI concern layered on top of this trait, not something
//! this crate does itself.

use async_trait::async_trait;

use crate::domain::{AlertId, Condition, PortId, RouterId, UserId};

/// The two delivery channels a monitored port can opt into (§3 `e-mail flag`,
/// `popup flag`). Each enabled channel gets its own [`Notification`]; a port with
/// both flags set produces two deliveries for the same alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    Popup,
}

/// One channel's worth of delivery for one fired alert, matching the §6 sink
/// payload shape exactly: `{channel, recipient user id, title, body, alert id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub channel: Channel,
    pub recipient: UserId,
    pub title: String,
    pub body: String,
    pub alert_id: AlertId,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers one notification. Called once per enabled channel when a condition
    /// transitions to firing (§4.6 step 2); never called for an auto-clear.
    async fn send(&self, notification: Notification);

    /// Observability hook for an auto-clear transition. Spec §4.6 is explicit that
    /// auto-clear "does not emit a new notification", so this never reaches `send`;
    /// it exists only so a sink can log the clear if it wants to.
    async fn alert_cleared(&self, router: RouterId, port: PortId, condition: Condition);
}

/// Default sink: writes a structured log line and nothing else.
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn send(&self, notification: Notification) {
        log::warn!(
            "notification channel={:?} recipient={} alert={} title={:?} body={:?}",
            notification.channel,
            notification.recipient.0,
            notification.alert_id,
            notification.title,
            notification.body,
        );
    }

    async fn alert_cleared(&self, router: RouterId, port: PortId, condition: Condition) {
        log::info!("alert cleared router={router} port={port} condition={condition:?}");
    }
}
