//! SNMP adapter: v1/v2c polling of the standard interfaces MIB (RFC 1213 `ifTable`).
//!
//! `snmp::SyncSession` is blocking, so every call is pushed onto `spawn_blocking`
//! rather than held on the async executor. SNMP has no persistent connection to
//! pool; each call opens and closes its own UDP socket.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use snmp::{SyncSession, Value};

use crate::adapter::{CounterReading, DeviceAdapter, InterfaceInfo};
use crate::domain::{InterfaceName, InterfaceType};
use crate::error::AdapterError;

const IF_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
const IF_OPER_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8];
const IF_IN_OCTETS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 10];
const IF_OUT_OCTETS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 16];
const IF_PHYS_ADDRESS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 6];
const IF_ALIAS: &[u32] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 18];
const SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(type_name = "snmp_version", rename_all = "snake_case"))]
pub enum SnmpVersion {
    V1,
    V2c,
}

#[derive(Debug, Clone)]
pub struct SnmpEndpoint {
    pub host: String,
    pub port: u16,
    pub community: String,
    pub version: SnmpVersion,
}

/// A varbind value detached from the response packet it was decoded from, so it can
/// cross the `spawn_blocking` boundary without borrowing anything.
#[derive(Debug, Clone)]
enum OwnedValue {
    Text(String),
    Int(i64),
    Counter(u64),
    Other,
}

fn to_owned(v: Value) -> OwnedValue {
    match v {
        Value::Counter32(n) => OwnedValue::Counter(n as u64),
        Value::Counter64(n) => OwnedValue::Counter(n),
        Value::Unsigned32(n) => OwnedValue::Counter(n as u64),
        Value::Integer(n) => OwnedValue::Int(n),
        Value::OctetString(bytes) => OwnedValue::Text(String::from_utf8_lossy(bytes).to_string()),
        _ => OwnedValue::Other,
    }
}

pub struct SnmpAdapter {
    endpoint: SnmpEndpoint,
    deadline: std::time::Duration,
}

impl SnmpAdapter {
    pub fn new(endpoint: SnmpEndpoint, deadline: std::time::Duration) -> Self {
        Self { endpoint, deadline }
    }

    fn open_session(endpoint: &SnmpEndpoint, deadline: std::time::Duration) -> Result<SyncSession, AdapterError> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        SyncSession::new(addr, endpoint.community.as_bytes(), Some(deadline), 0)
            .map_err(|e| AdapterError::Protocol(e.to_string()))
    }

    /// Walks a column of `ifTable` by repeated GETNEXT, returning `(ifIndex, value)`.
    fn walk_column(session: &mut SyncSession, base: &[u32]) -> Result<Vec<(u32, OwnedValue)>, AdapterError> {
        let mut out = Vec::new();
        let mut oid = base.to_vec();
        loop {
            let mut response = session.getnext(&oid).map_err(map_snmp_err)?;
            let Some((next_oid, value)) = response.varbinds.next() else {
                break;
            };
            let next_oid_parts: Vec<u32> = next_oid.into();
            if !next_oid_parts.starts_with(base) || next_oid_parts.len() != base.len() + 1 {
                break;
            }
            let index = next_oid_parts[base.len()];
            out.push((index, to_owned(value)));
            oid = next_oid_parts;
        }
        Ok(out)
    }
}

fn map_snmp_err(e: snmp::SnmpError) -> AdapterError {
    use snmp::SnmpError::*;
    match e {
        ReceiveError => AdapterError::Timeout,
        SendError => AdapterError::Unreachable,
        AuthFailure => AdapterError::AuthFailed,
        _ => AdapterError::Protocol(format!("{:?}", e)),
    }
}

async fn run_blocking<F, T>(f: F) -> Result<T, AdapterError>
where
    F: FnOnce() -> Result<T, AdapterError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AdapterError::Protocol(format!("snmp worker panicked: {e}")))?
}

#[async_trait]
impl DeviceAdapter for SnmpAdapter {
    async fn probe(&self) -> Result<(), AdapterError> {
        let endpoint = self.endpoint.clone();
        let deadline = self.deadline;
        run_blocking(move || {
            let mut session = SnmpAdapter::open_session(&endpoint, deadline)?;
            session.get(SYS_DESCR).map_err(map_snmp_err)?;
            Ok(())
        })
        .await
    }

    async fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>, AdapterError> {
        let endpoint = self.endpoint.clone();
        let deadline = self.deadline;
        run_blocking(move || {
            let mut session = SnmpAdapter::open_session(&endpoint, deadline)?;
            let descrs = SnmpAdapter::walk_column(&mut session, IF_DESCR)?;
            let statuses = SnmpAdapter::walk_column(&mut session, IF_OPER_STATUS)?;
            let status_by_index: std::collections::HashMap<u32, i64> = statuses
                .into_iter()
                .filter_map(|(idx, v)| match v {
                    OwnedValue::Int(n) => Some((idx, n)),
                    _ => None,
                })
                .collect();

            // Both columns are best-effort: `ifPhysAddress` is standard `ifTable` but
            // often empty for virtual interfaces, and `ifAlias` lives in the optional
            // `ifXTable` that some older RouterOS SNMP stacks don't implement at all.
            // Either walk failing outright shouldn't fail the whole poll.
            let mac_by_index: std::collections::HashMap<u32, String> =
                SnmpAdapter::walk_column(&mut session, IF_PHYS_ADDRESS)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|(idx, v)| mac_value(&v).map(|mac| (idx, mac)))
                    .collect();
            let alias_by_index: std::collections::HashMap<u32, String> =
                SnmpAdapter::walk_column(&mut session, IF_ALIAS)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|(idx, v)| match v {
                        OwnedValue::Text(s) if !s.is_empty() => Some((idx, s)),
                        _ => None,
                    })
                    .collect();

            Ok(descrs
                .into_iter()
                .filter_map(|(idx, v)| match v {
                    OwnedValue::Text(name) => {
                        let running = status_by_index.get(&idx).copied() == Some(1);
                        Some(InterfaceInfo {
                            name,
                            // SNMP does not expose RouterOS's interface type string; the
                            // fleet's name conventions are the closest available signal.
                            kind: InterfaceType::Other("snmp".to_string()),
                            mac: mac_by_index.get(&idx).cloned(),
                            comment: alias_by_index.get(&idx).cloned(),
                            running,
                            disabled: false,
                        })
                    }
                    _ => None,
                })
                .collect())
        })
        .await
    }

    async fn read_counters(
        &self,
        interfaces: &[InterfaceName],
    ) -> Result<Vec<(InterfaceName, CounterReading)>, AdapterError> {
        let endpoint = self.endpoint.clone();
        let deadline = self.deadline;
        let wanted: std::collections::HashSet<InterfaceName> = interfaces.iter().cloned().collect();
        run_blocking(move || {
            let mut session = SnmpAdapter::open_session(&endpoint, deadline)?;

            let descrs = SnmpAdapter::walk_column(&mut session, IF_DESCR)?;
            let name_by_index: std::collections::HashMap<u32, String> = descrs
                .into_iter()
                .filter_map(|(idx, v)| match v {
                    OwnedValue::Text(name) => Some((idx, name)),
                    _ => None,
                })
                .collect();

            let in_octets = SnmpAdapter::walk_column(&mut session, IF_IN_OCTETS)?;
            let out_octets = SnmpAdapter::walk_column(&mut session, IF_OUT_OCTETS)?;
            let out_by_index: std::collections::HashMap<u32, u64> = out_octets
                .into_iter()
                .filter_map(|(idx, v)| counter_value(&v).map(|n| (idx, n)))
                .collect();

            let now = Utc::now();
            Ok(in_octets
                .into_iter()
                .filter_map(|(idx, v)| {
                    let name = name_by_index.get(&idx)?;
                    if !wanted.contains(name) {
                        return None;
                    }
                    let rx_bytes = counter_value(&v)?;
                    let tx_bytes = *out_by_index.get(&idx)?;
                    Some((
                        name.clone(),
                        CounterReading {
                            at: now,
                            rx_bytes,
                            tx_bytes,
                        },
                    ))
                })
                .collect())
        })
        .await
    }
}

fn counter_value(v: &OwnedValue) -> Option<u64> {
    match v {
        OwnedValue::Counter(n) => Some(*n),
        _ => None,
    }
}

fn mac_value(v: &OwnedValue) -> Option<String> {
    match v {
        OwnedValue::Text(s) => {
            let bytes = s.as_bytes();
            if bytes.len() != 6 {
                return None;
            }
            Some(
                bytes
                    .iter()
                    .map(|b| format!("{b:02X}"))
                    .collect::<Vec<_>>()
                    .join(":"),
            )
        }
        _ => None,
    }
}
