use serde::Serialize;
use std::time::SystemTime;

/// Heartbeat as the kernel decodes it on UDP and MQTT.
#[derive(Serialize, Debug)]
pub struct Heartbeat {
    pub node: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub system: SystemInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<Percent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<Percent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Temperature>,
}

#[derive(Serialize, Debug)]
pub struct SystemInfo {
    pub platform: String,
}

#[derive(Serialize, Debug)]
pub struct Percent {
    pub percent: f32,
}

#[derive(Serialize, Debug)]
pub struct Network {
    pub bytes_recv: u64,
    pub bytes_sent: u64,
}

#[derive(Serialize, Debug)]
pub struct Temperature {
    pub cpu: Vec<Probe>,
}

#[derive(Serialize, Debug)]
pub struct Probe {
    pub current: f32,
}

/// Raw numbers read from the host in one collection pass.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub cpu_percent: Option<f32>,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_available: u64,
    pub disk_total: u64,
    pub bytes_recv: Option<u64>,
    pub bytes_sent: Option<u64>,
    pub cpu_temperature: Option<f32>,
}

fn percent_of(used: u64, total: u64) -> Option<Percent> {
    (total > 0).then(|| Percent { percent: (used as f64 / total as f64 * 100.0) as f32 })
}

pub fn build_heartbeat(node: &str, address: Option<String>, snap: &Snapshot, now: SystemTime) -> Heartbeat {
    let network = match (snap.bytes_recv, snap.bytes_sent) {
        (Some(bytes_recv), Some(bytes_sent)) => Some(Network { bytes_recv, bytes_sent }),
        _ => None,
    };

    Heartbeat {
        node: node.to_string(),
        timestamp: humantime::format_rfc3339_seconds(now).to_string(),
        address,
        system: SystemInfo { platform: std::env::consts::OS.to_string() },
        cpu: snap.cpu_percent,
        memory: percent_of(snap.memory_used, snap.memory_total),
        disk: percent_of(snap.disk_total.saturating_sub(snap.disk_available), snap.disk_total),
        network,
        temperature: snap.cpu_temperature.map(|current| Temperature { cpu: vec![Probe { current }] }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn heartbeat_matches_the_kernel_wire_shape() {
        let snap = Snapshot {
            cpu_percent: Some(12.5),
            memory_used: 2,
            memory_total: 8,
            disk_available: 30,
            disk_total: 100,
            bytes_recv: Some(1024),
            bytes_sent: Some(2048),
            cpu_temperature: Some(55.0),
        };
        let now = UNIX_EPOCH + Duration::from_secs(1_767_225_600);
        let hb = build_heartbeat("relay-7", Some("10.0.0.7".into()), &snap, now);
        let json = serde_json::to_value(&hb).unwrap();

        assert_eq!(json["node"], "relay-7");
        assert_eq!(json["timestamp"], "2026-01-01T00:00:00Z");
        assert_eq!(json["address"], "10.0.0.7");
        assert_eq!(json["cpu"], 12.5);
        assert_eq!(json["memory"]["percent"], 25.0);
        assert_eq!(json["disk"]["percent"], 70.0);
        assert_eq!(json["network"]["bytes_sent"], 2048);
        assert_eq!(json["temperature"]["cpu"][0]["current"], 55.0);
    }

    #[test]
    fn missing_readings_are_omitted() {
        let hb = build_heartbeat("bare", None, &Snapshot::default(), UNIX_EPOCH);
        let json = serde_json::to_value(&hb).unwrap();
        let obj = json.as_object().unwrap();
        for absent in ["address", "cpu", "memory", "disk", "network", "temperature"] {
            assert!(!obj.contains_key(absent), "{absent} should be omitted");
        }
        assert!(obj.contains_key("system"));
    }
}
