//! REST adapter: HTTPS + JSON against RouterOS's `/rest` API (RouterOS >= 7.1).

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::adapter::native::parse_interface_type;
use crate::adapter::pool::AdapterPool;
use crate::adapter::{CounterReading, DeviceAdapter, InterfaceInfo};
use crate::domain::InterfaceName;
use crate::error::AdapterError;

#[derive(Debug, Clone)]
pub struct RestEndpoint {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct RestInterface {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    running: String,
    disabled: String,
    #[serde(rename = "rx-byte")]
    rx_byte: String,
    #[serde(rename = "tx-byte")]
    tx_byte: String,
    #[serde(rename = "mac-address", default)]
    mac_address: Option<String>,
    #[serde(default)]
    comment: Option<String>,
}

fn parse_ros_bool(s: &str) -> bool {
    s == "true" || s == "yes"
}

pub struct RestAdapter {
    endpoint: RestEndpoint,
    client: reqwest::Client,
    deadline: std::time::Duration,
    pool: AdapterPool,
}

impl RestAdapter {
    pub fn new(endpoint: RestEndpoint, deadline: std::time::Duration, pool: AdapterPool) -> Self {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(false)
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            endpoint,
            client,
            deadline,
            pool,
        }
    }

    async fn get_interfaces(&self) -> Result<Vec<RestInterface>, AdapterError> {
        let url = format!("{}/rest/interface", self.endpoint.base_url);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.endpoint.username, Some(&self.endpoint.password))
            .timeout(self.deadline)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AdapterError::AuthFailed);
        }
        if !resp.status().is_success() {
            return Err(AdapterError::Protocol(format!(
                "unexpected status {}",
                resp.status()
            )));
        }
        resp.json::<Vec<RestInterface>>()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))
    }
}

fn map_reqwest_err(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Timeout
    } else if e.is_connect() {
        AdapterError::Unreachable
    } else {
        AdapterError::Protocol(e.to_string())
    }
}

#[async_trait]
impl DeviceAdapter for RestAdapter {
    async fn probe(&self) -> Result<(), AdapterError> {
        let _permit = self.pool.acquire().await;
        let url = format!("{}/rest/system/identity", self.endpoint.base_url);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.endpoint.username, Some(&self.endpoint.password))
            .timeout(self.deadline)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AdapterError::AuthFailed);
        }
        if !resp.status().is_success() {
            return Err(AdapterError::Protocol(format!(
                "unexpected status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn list_interfaces(&self) -> Result<Vec<InterfaceInfo>, AdapterError> {
        let _permit = self.pool.acquire().await;
        let raw = self.get_interfaces().await?;
        Ok(raw
            .into_iter()
            .map(|i| InterfaceInfo {
                name: i.name,
                kind: parse_interface_type(&i.kind),
                mac: i.mac_address,
                comment: i.comment,
                running: parse_ros_bool(&i.running),
                disabled: parse_ros_bool(&i.disabled),
            })
            .collect())
    }

    async fn read_counters(
        &self,
        interfaces: &[InterfaceName],
    ) -> Result<Vec<(InterfaceName, CounterReading)>, AdapterError> {
        let _permit = self.pool.acquire().await;
        let raw = self.get_interfaces().await?;
        let now = Utc::now();
        let wanted: std::collections::HashSet<&str> = interfaces.iter().map(String::as_str).collect();
        Ok(raw
            .into_iter()
            .filter(|i| wanted.contains(i.name.as_str()))
            .filter_map(|i| {
                let rx_bytes = i.rx_byte.parse().ok()?;
                let tx_bytes = i.tx_byte.parse().ok()?;
                Some((
                    i.name,
                    CounterReading {
                        at: now,
                        rx_bytes,
                        tx_bytes,
                    },
                ))
            })
            .collect())
    }
}
