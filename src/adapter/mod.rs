//! Device protocol abstraction: native API, REST, and SNMP behind one trait.
//!
//! Each concrete adapter speaks one protocol to one router. The supervisor chooses
//! which adapter to call and in what fallback order; adapters themselves never retry
//! or fall back internally, they just report what happened for this one call.

pub mod native;
pub mod pool;
pub mod rest;
pub mod snmp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{InterfaceName, InterfaceType};
use crate::error::AdapterError;

pub use native::NativeAdapter;
pub use rest::RestAdapter;
pub use snmp::SnmpAdapter;

/// A single interface as reported by a device, independent of which protocol asked.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceInfo {
    pub name: InterfaceName,
    pub kind: InterfaceType,
    pub mac: Option<String>,
    pub comment: Option<String>,
    pub running: bool,
    pub disabled: bool,
}

/// A raw traffic-counter reading for one interface at the moment it was read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterReading {
    pub at: DateTime<Utc>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Everything a poll needs from a device in one round trip: interface list plus
/// counters for each, so the supervisor doesn't need two calls per protocol per tick.
#[derive(Debug, Clone, Default)]
pub struct PollSnapshot {
    pub interfaces: Vec<InterfaceInfo>,
    pub counters: Vec<(InterfaceName, CounterReading)>,
}

/// Protocol-agnostic access to one router. Implementations must not retry internally;
/// the supervisor owns retry, backoff, and fallback policy.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Cheap reachability check used before committing to a full poll.
    async fn probe(&self) -> Result<(), AdapterError>;

    /// Lists interfaces currently known to the device.
    async fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>, AdapterError>;

    /// Reads current byte counters for the named interfaces. An adapter that cannot
    /// provide counters for a name it doesn't recognize simply omits it from the
    /// result rather than erroring the whole call.
    async fn read_counters(
        &self,
        interfaces: &[InterfaceName],
    ) -> Result<Vec<(InterfaceName, CounterReading)>, AdapterError>;

    /// Convenience wrapper combining `list_interfaces` and `read_counters` into the
    /// one round trip a poll tick actually wants.
    async fn poll(&self) -> Result<PollSnapshot, AdapterError> {
        let interfaces = self.list_interfaces().await?;
        let names: Vec<InterfaceName> = interfaces.iter().map(|i| i.name.clone()).collect();
        let counters = self.read_counters(&names).await?;
        Ok(PollSnapshot {
            interfaces,
            counters,
        })
    }
}
