/**
 * MODELS - Node, metrics and heartbeat payload types
 *
 * ROLE: Domain types shared by the registry, the liveness detector and the
 * alert engine, plus the JSON wire shape a node sends in a heartbeat.
 *
 * WIRE FORMAT: same fields the fleet nodes already emit over UDP
 * (`node`, `system.platform`, `cpu`, `memory.percent`, `disk.percent`,
 * `network.bytes_recv/bytes_sent`, `temperature.cpu[0].current`).
 */

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::IpAddr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Unknown,
    Online,
    Offline,
    Warning,
}

impl NodeStatus {
    /// Online or warning: the node is reporting and subject to the staleness sweep.
    pub fn is_live(self) -> bool {
        matches!(self, NodeStatus::Online | NodeStatus::Warning)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Warning => "warning",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional readings carried by a heartbeat. Absent until a node reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    pub cpu_percent: Option<f32>,
    pub memory_percent: Option<f32>,
    pub disk_percent: Option<f32>,
    pub network_rx_bytes: Option<u64>,
    pub network_tx_bytes: Option<u64>,
    pub temperature_celsius: Option<f32>,
}

impl Readings {
    pub fn is_empty(&self) -> bool {
        self.cpu_percent.is_none()
            && self.memory_percent.is_none()
            && self.disk_percent.is_none()
            && self.network_rx_bytes.is_none()
            && self.network_tx_bytes.is_none()
            && self.temperature_celsius.is_none()
    }
}

/// Point-in-time metrics attached to one heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub readings: Readings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub node_type: String,
    pub address: Option<String>,
    pub status: NodeStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub status_changed_at: OffsetDateTime,
    pub metrics: Option<MetricsSample>,
}

/// A heartbeat after transport decoding, before semantic validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub name: String,
    pub observed_at: Option<OffsetDateTime>,
    pub address: Option<String>,
    pub node_type: Option<String>,
    pub readings: Option<Readings>,
}

// ----- wire payload -----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default, alias = "name")]
    pub node: Option<String>,
    /// RFC 3339 or unix seconds. Anything else reads as absent, so the
    /// heartbeat still counts and falls back to receipt time.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        serialize_with = "time::serde::rfc3339::option::serialize"
    )]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(default)]
    pub address: Option<String>,
    /// Overrides `system.platform` when both are present.
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub system: Option<SystemInfo>,
    #[serde(default)]
    pub cpu: Option<f32>,
    #[serde(default)]
    pub memory: Option<PercentReading>,
    #[serde(default)]
    pub disk: Option<PercentReading>,
    #[serde(default)]
    pub network: Option<NetworkReading>,
    #[serde(default)]
    pub temperature: Option<TemperatureReading>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PercentReading {
    #[serde(default)]
    pub percent: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkReading {
    #[serde(default)]
    pub bytes_recv: Option<u64>,
    #[serde(default)]
    pub bytes_sent: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemperatureReading {
    #[serde(default)]
    pub cpu: Vec<TemperatureProbe>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemperatureProbe {
    #[serde(default)]
    pub current: Option<f32>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value {
        serde_json::Value::String(s) => OffsetDateTime::parse(&s, &Rfc3339).ok(),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(secs) => OffsetDateTime::from_unix_timestamp(secs).ok(),
            None => n
                .as_f64()
                .filter(|f| f.is_finite())
                .and_then(|f| OffsetDateTime::from_unix_timestamp_nanos((f * 1e9) as i128).ok()),
        },
        _ => None,
    }))
}

impl HeartbeatPayload {
    /// Flattens the wire shape. `source` is the transport peer address, used
    /// when the payload does not name its own address.
    pub fn into_heartbeat(self, source: Option<IpAddr>) -> Heartbeat {
        let readings = Readings {
            cpu_percent: self.cpu,
            memory_percent: self.memory.and_then(|m| m.percent),
            disk_percent: self.disk.and_then(|d| d.percent),
            network_rx_bytes: self.network.as_ref().and_then(|n| n.bytes_recv),
            network_tx_bytes: self.network.as_ref().and_then(|n| n.bytes_sent),
            temperature_celsius: self
                .temperature
                .and_then(|t| t.cpu.first().and_then(|p| p.current)),
        };

        Heartbeat {
            name: self.node.unwrap_or_default(),
            observed_at: self.timestamp,
            address: self.address.or_else(|| source.map(|ip| ip.to_string())),
            node_type: self.node_type.or_else(|| self.system.and_then(|s| s.platform)),
            readings: (!readings.is_empty()).then_some(readings),
        }
    }
}
