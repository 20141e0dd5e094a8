/*!
Test harness for the fleet kernel

Wraps a `FleetMonitor` driven by a `ManualClock` so scenarios can be written
in seconds since start:
- send heartbeats at a given offset
- run the staleness sweep
- assert on node statuses, open alerts and the emitted events
*/

use crate::heartbeat::HeartbeatBuilder;
use anyhow::Result;
use fleet_kernel::alerts::{Alert, AlertFilter};
use fleet_kernel::clock::ManualClock;
use fleet_kernel::config::KernelConfig;
use fleet_kernel::events::KernelEvent;
use fleet_kernel::liveness::NodeChanged;
use fleet_kernel::models::NodeStatus;
use fleet_kernel::monitor::{FleetMonitor, IngestOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::macros::datetime;
use time::OffsetDateTime;

/// Harness start time; every offset is relative to it.
pub const EPOCH: OffsetDateTime = datetime!(2026-01-01 0:00 UTC);

pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub monitor: FleetMonitor,
    seen: Vec<KernelEvent>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        env_logger::try_init().ok();

        let clock = Arc::new(ManualClock::new(EPOCH));
        let monitor = FleetMonitor::new(&config, clock.clone());
        Self { clock, monitor, seen: Vec::new() }
    }

    pub fn at(secs: u64) -> OffsetDateTime {
        EPOCH + Duration::from_secs(secs)
    }

    /// Moves the clock to `secs` after start.
    pub fn set_time(&self, secs: u64) -> OffsetDateTime {
        let at = Self::at(secs);
        self.clock.set(at);
        at
    }

    /// Sends a heartbeat built by `hb` through the JSON decoding path.
    pub fn send(&self, hb: &HeartbeatBuilder) -> Result<IngestOutcome> {
        let outcome = self.monitor.ingest_raw(&hb.to_bytes(), None)?;
        log::info!("sent heartbeat: {}", hb.build());
        Ok(outcome)
    }

    /// Heartbeat from `node` stamped and received at `secs`.
    pub fn heartbeat_at(&self, node: &str, secs: u64) -> Result<IngestOutcome> {
        let at = self.set_time(secs);
        self.send(&HeartbeatBuilder::new(node).at(at))
    }

    /// Heartbeat with a CPU reading, stamped and received at `secs`.
    pub fn cpu_at(&self, node: &str, secs: u64, cpu: f32) -> Result<IngestOutcome> {
        let at = self.set_time(secs);
        self.send(&HeartbeatBuilder::new(node).at(at).cpu(cpu))
    }

    /// Runs one sweep at `secs`.
    pub fn sweep_at(&self, secs: u64) -> Vec<NodeChanged> {
        let at = self.set_time(secs);
        let changes = self.monitor.run_sweep_tick(at);
        log::info!("sweep at t={}s changed {} node(s)", secs, changes.len());
        changes
    }

    /// Events emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<KernelEvent> {
        let events = self.monitor.events().drain();
        self.seen.extend(events.iter().cloned());
        events
    }

    pub fn status_of(&self, node: &str) -> Result<NodeStatus> {
        Ok(self.monitor.query_node(node)?.status)
    }

    pub fn assert_status(&self, node: &str, expected: NodeStatus) -> Result<()> {
        let actual = self.status_of(node)?;
        if actual != expected {
            anyhow::bail!("node '{}': expected {}, got {}", node, expected, actual);
        }
        Ok(())
    }

    pub fn open_alerts(&self) -> Vec<Alert> {
        self.monitor.query_alerts(AlertFilter::Unacknowledged)
    }

    pub fn open_alerts_for(&self, node: &str) -> Vec<Alert> {
        self.open_alerts()
            .into_iter()
            .filter(|a| a.node.as_deref() == Some(node))
            .collect()
    }

    pub fn assert_open_alerts(&self, node: &str, expected: usize) -> Result<()> {
        let actual = self.open_alerts_for(node).len();
        if actual != expected {
            anyhow::bail!("node '{}': expected {} open alert(s), got {}", node, expected, actual);
        }
        Ok(())
    }

    /// Counts of every event drained so far, by kind.
    pub fn get_stats(&mut self) -> TestStats {
        self.drain_events();
        let mut counts = HashMap::new();
        for event in &self.seen {
            let kind = match event {
                KernelEvent::NodeChanged(_) => "node_changed",
                KernelEvent::AlertRaised { .. } => "alert_raised",
                KernelEvent::AlertAcknowledged { .. } => "alert_acknowledged",
            };
            *counts.entry(kind).or_insert(0) += 1;
        }
        TestStats { total_events: self.seen.len(), counts }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub total_events: usize,
    pub counts: HashMap<&'static str, usize>,
}

impl TestStats {
    pub fn count(&self, kind: &str) -> usize {
        self.counts.get(kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_kernel::clock::Clock;

    #[test]
    fn harness_clock_follows_offsets() {
        let h = TestHarness::new();
        h.heartbeat_at("a", 90).unwrap();
        assert_eq!(h.clock.now(), TestHarness::at(90));
        assert_eq!(h.monitor.query_node("a").unwrap().last_seen, TestHarness::at(90));
    }

    #[test]
    fn stats_count_events_by_kind() {
        let mut h = TestHarness::new();
        h.heartbeat_at("a", 0).unwrap();
        h.sweep_at(400);
        let stats = h.get_stats();
        assert_eq!(stats.count("node_changed"), 2);
        assert_eq!(stats.count("alert_raised"), 1);
        assert_eq!(stats.total_events, 3);
        assert!(h.assert_status("a", NodeStatus::Offline).is_ok());
        assert!(h.assert_status("a", NodeStatus::Online).is_err());
    }
}
