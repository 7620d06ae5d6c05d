//! Native API adapter: binary framed RPC over the MikroTik API port (8728/8729).
//!
//! The wire framing itself (length-prefixed sentence encoding, `!re`/`!done`/`!trap`
//! replies) is not reproduced here; what matters for this adapter is the shape of the
//! capability set it exposes and how failures map onto [`AdapterError`]. A production
//! build would plug a real codec in behind [`NativeTransport`].

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::adapter::pool::AdapterPool;
use crate::adapter::{CounterReading, DeviceAdapter, InterfaceInfo};
use crate::domain::{InterfaceName, InterfaceType};
use crate::error::AdapterError;

/// Host/port/credentials needed to open a native-API session.
#[derive(Debug, Clone)]
pub struct NativeEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Hook for the actual sentence codec. Kept as a trait so tests can substitute a
/// canned transport without opening real sockets.
#[async_trait]
pub trait NativeTransport: Send + Sync {
    async fn connect(endpoint: &NativeEndpoint, deadline: std::time::Duration) -> Result<Self, AdapterError>
    where
        Self: Sized;
    async fn list_interfaces(&mut self) -> Result<Vec<InterfaceInfo>, AdapterError>;
    async fn read_counters(
        &mut self,
        interfaces: &[InterfaceName],
    ) -> Result<Vec<(InterfaceName, CounterReading)>, AdapterError>;
}

/// Minimal real transport: opens the TCP socket and nothing else. Stands in for the
/// full `/login` + sentence exchange a production build would implement.
pub struct TcpNativeTransport {
    _stream: TcpStream,
}

#[async_trait]
impl NativeTransport for TcpNativeTransport {
    async fn connect(endpoint: &NativeEndpoint, deadline: std::time::Duration) -> Result<Self, AdapterError> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        let stream = timeout(deadline, TcpStream::connect(&addr))
            .await
            .map_err(|_| AdapterError::Timeout)?
            .map_err(|_| AdapterError::Unreachable)?;
        Ok(Self { _stream: stream })
    }

    async fn list_interfaces(&mut self) -> Result<Vec<InterfaceInfo>, AdapterError> {
        Err(AdapterError::Protocol(
            "native sentence codec not wired to a transport".into(),
        ))
    }

    async fn read_counters(
        &mut self,
        _interfaces: &[InterfaceName],
    ) -> Result<Vec<(InterfaceName, CounterReading)>, AdapterError> {
        Err(AdapterError::Protocol(
            "native sentence codec not wired to a transport".into(),
        ))
    }
}

pub struct NativeAdapter<T = TcpNativeTransport> {
    endpoint: NativeEndpoint,
    deadline: std::time::Duration,
    pool: AdapterPool,
    _transport: std::marker::PhantomData<T>,
}

impl<T: NativeTransport> NativeAdapter<T> {
    pub fn new(endpoint: NativeEndpoint, deadline: std::time::Duration, pool: AdapterPool) -> Self {
        Self {
            endpoint,
            deadline,
            pool,
            _transport: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<T: NativeTransport + 'static> DeviceAdapter for NativeAdapter<T> {
    async fn probe(&self) -> Result<(), AdapterError> {
        let _permit = self.pool.acquire().await;
        T::connect(&self.endpoint, self.deadline).await?;
        Ok(())
    }

    async fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>, AdapterError> {
        let _permit = self.pool.acquire().await;
        let mut transport = T::connect(&self.endpoint, self.deadline).await?;
        timeout(self.deadline, transport.list_interfaces())
            .await
            .map_err(|_| AdapterError::Timeout)?
    }

    async fn read_counters(
        &self,
        interfaces: &[InterfaceName],
    ) -> Result<Vec<(InterfaceName, CounterReading)>, AdapterError> {
        let _permit = self.pool.acquire().await;
        let mut transport = T::connect(&self.endpoint, self.deadline).await?;
        let now = Utc::now();
        let raw = timeout(self.deadline, transport.read_counters(interfaces))
            .await
            .map_err(|_| AdapterError::Timeout)??;
        Ok(raw
            .into_iter()
            .map(|(name, mut reading)| {
                reading.at = now;
                (name, reading)
            })
            .collect())
    }
}

/// Helper shared by all three adapters: maps a device-reported interface `type=`
/// string onto the common [`InterfaceType`] enum.
pub fn parse_interface_type(raw: &str) -> InterfaceType {
    match raw {
        "ether" => InterfaceType::Ether,
        "vlan" => InterfaceType::Vlan,
        "bridge" => InterfaceType::Bridge,
        "pppoe-out" | "pppoe-in" => InterfaceType::Pppoe,
        "l2tp-out" | "l2tp-in" => InterfaceType::L2tp,
        other => InterfaceType::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_interface_types() {
        assert_eq!(parse_interface_type("ether"), InterfaceType::Ether);
        assert_eq!(parse_interface_type("vlan"), InterfaceType::Vlan);
        assert_eq!(
            parse_interface_type("wifiwave2"),
            InterfaceType::Other("wifiwave2".to_string())
        );
    }
}
