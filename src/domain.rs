//! Shared identifiers and small value types used across every component.
//!
//! These are the nouns of the monitoring engine: routers, ports, adapters, and the
//! handful of enums that describe their state. Kept separate from any single component
//! so that the adapter, store, and supervisor modules can agree on one vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a `Router` row, owned by the CRUD surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(transparent))]
pub struct RouterId(pub uuid::Uuid);

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier for a `MonitoredPort` row. Traffic samples for interfaces that
/// are not (yet) monitored carry `None` here and are identified by name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(transparent))]
pub struct PortId(pub uuid::Uuid);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier for an `Alert` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(transparent))]
pub struct AlertId(pub uuid::Uuid);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque principal id for an authenticated operator session. The engine never
/// inspects this beyond passing it to `user_can_see_router`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(transparent))]
pub struct UserId(pub uuid::Uuid);

/// An interface name as reported by the device, e.g. `"ether1"` or `"vlan100"`.
pub type InterfaceName = String;

/// The three protocol tiers a `Router` may expose, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(type_name = "adapter_kind", rename_all = "snake_case"))]
pub enum AdapterKind {
    Native,
    Rest,
    Snmp,
}

impl AdapterKind {
    /// Fallback order starting from the sticky preference, honoring which adapters are
    /// enabled on the router. Native is always enabled; rest/snmp are conditional.
    pub fn fallback_order(sticky: AdapterKind, rest_enabled: bool, snmp_enabled: bool) -> Vec<AdapterKind> {
        use AdapterKind::*;
        let mut all = vec![Native];
        if rest_enabled {
            all.push(Rest);
        }
        if snmp_enabled {
            all.push(Snmp);
        }
        // Move the sticky choice to the front without disturbing relative order otherwise.
        if let Some(pos) = all.iter().position(|k| *k == sticky) {
            let k = all.remove(pos);
            all.insert(0, k);
        }
        all
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterKind::Native => "native",
            AdapterKind::Rest => "rest",
            AdapterKind::Snmp => "snmp",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_order_starts_from_the_sticky_choice() {
        // A router with rest and snmp enabled that last succeeded over rest tries
        // rest first on its next poll, not native, even though native is otherwise
        // first in the default order.
        let order = AdapterKind::fallback_order(AdapterKind::Rest, true, true);
        assert_eq!(order, vec![AdapterKind::Rest, AdapterKind::Native, AdapterKind::Snmp]);
    }

    #[test]
    fn fallback_order_omits_disabled_adapters() {
        let order = AdapterKind::fallback_order(AdapterKind::Native, false, false);
        assert_eq!(order, vec![AdapterKind::Native]);
    }

    #[test]
    fn fallback_order_defaults_to_native_first_when_nothing_is_sticky_yet() {
        let order = AdapterKind::fallback_order(AdapterKind::Native, true, true);
        assert_eq!(order, vec![AdapterKind::Native, AdapterKind::Rest, AdapterKind::Snmp]);
    }
}

/// Filter applied to `list_interfaces`, mirroring the router's `interfaceDisplayMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "interface_display_mode", rename_all = "snake_case")
)]
pub enum InterfaceDisplayMode {
    /// Hide interfaces in the UI. Polling of already-monitored ports is unaffected;
    /// hiding is purely a display concern.
    None,
    #[default]
    Static,
    All,
}

/// Physical/logical interface type as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Ether,
    Vlan,
    Bridge,
    Pppoe,
    L2tp,
    Other(String),
}

/// Alert severity, assigned by policy in the alert engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(type_name = "severity", rename_all = "lowercase"))]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The two threshold conditions the alert engine evaluates per monitored port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    PortDown,
    TrafficLow,
}

impl Condition {
    pub fn severity(self) -> Severity {
        match self {
            Condition::PortDown => Severity::Critical,
            Condition::TrafficLow => Severity::Warning,
        }
    }
}
