use crate::monitor::FleetMonitor;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub nodes_tracked: usize,
    pub nodes_online: usize,
    pub nodes_offline: usize,
    pub nodes_warning: usize,
    pub open_alerts: usize,
    pub heartbeats_accepted: u64,
    pub heartbeats_malformed: u64,
    pub heartbeats_replayed: u64,
    pub events_dropped: u64,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<parking_lot::Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(parking_lot::Mutex::new("disabled".to_string())),
        }
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    pub fn get_health(&self, monitor: &FleetMonitor) -> KernelHealth {
        let counts = monitor.status_counts();
        let ingest = monitor.ingest_stats();

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            nodes_tracked: monitor.node_count(),
            nodes_online: counts.online,
            nodes_offline: counts.offline,
            nodes_warning: counts.warning,
            open_alerts: monitor.open_alert_count(),
            heartbeats_accepted: ingest.accepted,
            heartbeats_malformed: ingest.malformed,
            heartbeats_replayed: ingest.replayed,
            events_dropped: monitor.events().dropped(),
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Resident set size from /proc; 0 where unavailable.
fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(kb) = kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertSeverity;
    use crate::clock::ManualClock;
    use crate::config::KernelConfig;
    use time::macros::datetime;

    #[test]
    fn health_reflects_monitor_state() {
        let clock = Arc::new(ManualClock::new(datetime!(2026-01-01 0:00 UTC)));
        let monitor = FleetMonitor::new(&KernelConfig::default(), clock);
        monitor.ingest_raw(br#"{"node": "a"}"#, None).unwrap();
        monitor.ingest_raw(br#"{"node": "b", "cpu": 99}"#, None).unwrap();
        let _ = monitor.ingest_raw(b"{", None);
        monitor.manual_alert("disk swap".into(), AlertSeverity::Info);

        let tracker = HealthTracker::new();
        tracker.mark_mqtt_connected();
        let health = tracker.get_health(&monitor);

        assert_eq!(health.nodes_tracked, 2);
        assert_eq!(health.nodes_online, 1);
        assert_eq!(health.nodes_warning, 1);
        assert_eq!(health.nodes_offline, 0);
        assert_eq!(health.open_alerts, 2);
        assert_eq!(health.heartbeats_accepted, 2);
        assert_eq!(health.heartbeats_malformed, 1);
        assert_eq!(health.mqtt_status, "connected");
    }

    #[test]
    fn reconnects_are_counted() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.mqtt_status(), "disabled");
        tracker.mark_mqtt_connecting();
        tracker.mark_mqtt_connected();
        tracker.mark_mqtt_disconnected();
        assert_eq!(tracker.mqtt_status(), "disconnected");
        tracker.increment_reconnects();
        tracker.increment_reconnects();
        assert_eq!(tracker.mqtt_status(), "reconnecting");
        assert_eq!(tracker.mqtt_reconnects.load(Ordering::Relaxed), 2);
    }
}
