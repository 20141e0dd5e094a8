/**
 * LIVENESS DETECTOR - Heartbeats in, node transitions out
 *
 * ROLE: validates heartbeats (name, timestamp clamp) before they reach the
 * registry and keeps the ingest counters.
 *
 * SWEEP: there is no timer per node. A periodic sweep asks the registry for
 * live nodes silent since `now - timeout` and marks them offline, so detection
 * latency is bounded by the sweep interval.
 */

use crate::config::LivenessConfig;
use crate::models::{Heartbeat, MetricsSample, Node, NodeStatus};
use crate::registry::{NodeRegistry, Sighting, UpsertOutcome};
use crate::state::Counter;
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("malformed heartbeat: {0}")]
    Malformed(String),
}

/// A node status transition, the unit that drives alerting and publishing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeChanged {
    pub node: Node,
    pub from: NodeStatus,
    pub to: NodeStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatOutcome {
    Accepted {
        node: Node,
        change: Option<NodeChanged>,
        /// Present when the heartbeat's metrics became the node's current sample.
        sample: Option<MetricsSample>,
    },
    Ignored { node: Node },
}

#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: Counter,
    malformed: Counter,
    replayed: Counter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub accepted: u64,
    pub malformed: u64,
    pub replayed: u64,
}

pub struct LivenessDetector {
    registry: NodeRegistry,
    timeout: Duration,
    future_tolerance: Duration,
    stats: IngestStats,
}

impl LivenessDetector {
    pub fn new(registry: NodeRegistry, config: &LivenessConfig) -> Self {
        Self {
            registry,
            timeout: config.timeout,
            future_tolerance: config.future_tolerance,
            stats: IngestStats::default(),
        }
    }

    pub fn on_heartbeat(
        &self,
        heartbeat: Heartbeat,
        received_at: OffsetDateTime,
    ) -> Result<HeartbeatOutcome, IngestError> {
        let name = heartbeat.name.trim();
        if name.is_empty() {
            return Err(self.malformed("missing node name"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(self.malformed("node name too long"));
        }

        let observed_at = self.clamp(heartbeat.observed_at, received_at);
        let outcome = self.registry.upsert(Sighting {
            name: name.to_string(),
            observed_at,
            address: heartbeat.address,
            node_type: heartbeat.node_type,
            readings: heartbeat.readings,
        });

        match outcome {
            UpsertOutcome::Ignored { node } => {
                self.stats.replayed.incr();
                debug!(node = %node.name, observed_at = %observed_at, "ignoring replayed heartbeat");
                Ok(HeartbeatOutcome::Ignored { node })
            }
            UpsertOutcome::Applied { node, previous, transitioned, metrics_applied } => {
                self.stats.accepted.incr();
                let change = transitioned.then(|| {
                    info!(node = %node.name, from = %previous, "node online");
                    NodeChanged { node: node.clone(), from: previous, to: node.status }
                });
                let sample = if metrics_applied { node.metrics.clone() } else { None };
                Ok(HeartbeatOutcome::Accepted { node, change, sample })
            }
        }
    }

    /// Counts a payload the transport could not decode.
    pub fn record_malformed(&self, reason: &str) -> IngestError {
        self.malformed(reason)
    }

    /// Marks every live node silent since `now - timeout` offline.
    pub fn sweep(&self, now: OffsetDateTime) -> Vec<NodeChanged> {
        let threshold = now - self.timeout;
        let candidates = self.registry.stale_candidates(threshold);
        if candidates.is_empty() {
            return Vec::new();
        }

        let changes: Vec<NodeChanged> = self
            .registry
            .mark_stale(&candidates, threshold, now)
            .into_iter()
            .map(|(node, from)| NodeChanged { to: node.status, node, from })
            .collect();

        if !changes.is_empty() {
            info!(count = changes.len(), "marked nodes offline");
        }
        changes
    }

    pub fn stats(&self) -> IngestSnapshot {
        IngestSnapshot {
            accepted: self.stats.accepted.get(),
            malformed: self.stats.malformed.get(),
            replayed: self.stats.replayed.get(),
        }
    }

    fn clamp(&self, reported: Option<OffsetDateTime>, received_at: OffsetDateTime) -> OffsetDateTime {
        match reported {
            Some(at) if at <= received_at + self.future_tolerance => {
                if at < received_at - self.timeout {
                    warn!(
                        reported = %at,
                        received = %received_at,
                        "heartbeat timestamp older than the liveness timeout, node clock is behind"
                    );
                }
                at
            }
            Some(at) => {
                debug!(reported = %at, received = %received_at, "heartbeat timestamp in the future, using receipt time");
                received_at
            }
            None => received_at,
        }
    }

    fn malformed(&self, reason: &str) -> IngestError {
        let total = self.stats.malformed.incr();
        warn!(reason, total, "dropping malformed heartbeat");
        IngestError::Malformed(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Readings;
    use std::sync::Arc;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2026-01-01 0:00 UTC);

    fn secs(n: u64) -> OffsetDateTime {
        T0 + Duration::from_secs(n)
    }

    fn detector() -> LivenessDetector {
        LivenessDetector::new(NodeRegistry::new(Duration::from_secs(30)), &LivenessConfig::default())
    }

    fn hb(name: &str, at: Option<OffsetDateTime>) -> Heartbeat {
        Heartbeat { name: name.into(), observed_at: at, address: None, node_type: None, readings: None }
    }

    #[test]
    fn first_sighting_reports_unknown_to_online() {
        let det = detector();
        let outcome = det.on_heartbeat(hb("relay-7", Some(T0)), T0).unwrap();
        let HeartbeatOutcome::Accepted { change: Some(change), .. } = outcome else {
            panic!("expected a transition");
        };
        assert_eq!((change.from, change.to), (NodeStatus::Unknown, NodeStatus::Online));

        let again = det.on_heartbeat(hb("relay-7", Some(secs(30))), secs(30)).unwrap();
        assert!(matches!(again, HeartbeatOutcome::Accepted { change: None, .. }));
        assert_eq!(det.stats().accepted, 2);
    }

    #[test]
    fn blank_names_are_malformed_and_counted() {
        let det = detector();
        assert_eq!(
            det.on_heartbeat(hb("   ", None), T0),
            Err(IngestError::Malformed("missing node name".into()))
        );
        assert!(det.on_heartbeat(hb(&"x".repeat(300), None), T0).is_err());
        assert_eq!(det.stats().malformed, 2);

        // the detector keeps working afterwards
        assert!(det.on_heartbeat(hb("ok", None), T0).is_ok());
    }

    #[test]
    fn names_are_trimmed() {
        let det = detector();
        det.on_heartbeat(hb("  edge-1 ", None), T0).unwrap();
        assert!(det.registry.find("edge-1").is_ok());
    }

    #[test]
    fn future_timestamps_fall_back_to_receipt_time() {
        let det = detector();
        det.on_heartbeat(hb("a", Some(secs(3600))), T0).unwrap();
        assert_eq!(det.registry.find("a").unwrap().last_seen, T0);

        // inside the tolerance the reported time is kept
        det.on_heartbeat(hb("b", Some(secs(4))), T0).unwrap();
        assert_eq!(det.registry.find("b").unwrap().last_seen, secs(4));

        det.on_heartbeat(hb("c", None), secs(7)).unwrap();
        assert_eq!(det.registry.find("c").unwrap().last_seen, secs(7));
    }

    #[test]
    fn lagging_node_clock_is_kept_and_swept() {
        let det = detector();
        // node clock runs ten minutes behind the kernel
        det.on_heartbeat(hb("slow", Some(secs(0))), secs(600)).unwrap();
        assert_eq!(det.registry.find("slow").unwrap().status, NodeStatus::Online);
        assert_eq!(det.registry.find("slow").unwrap().last_seen, secs(0));
        assert_eq!(det.stats().accepted, 1);

        assert_eq!(det.sweep(secs(600)).len(), 1);
    }

    #[test]
    fn replays_are_ignored_not_errors() {
        let det = detector();
        det.on_heartbeat(hb("a", Some(secs(600))), secs(600)).unwrap();
        let outcome = det.on_heartbeat(hb("a", Some(secs(100))), secs(601)).unwrap();
        assert!(matches!(outcome, HeartbeatOutcome::Ignored { .. }));
        assert_eq!(det.stats().replayed, 1);
    }

    #[test]
    fn sample_is_returned_only_when_stored() {
        let det = detector();
        let mut with_metrics = hb("a", Some(secs(10)));
        with_metrics.readings = Some(Readings { cpu_percent: Some(42.0), ..Default::default() });
        let HeartbeatOutcome::Accepted { sample, .. } = det.on_heartbeat(with_metrics, secs(10)).unwrap()
        else {
            panic!()
        };
        let sample = sample.unwrap();
        assert_eq!(sample.timestamp, secs(10));
        assert_eq!(sample.readings.cpu_percent, Some(42.0));

        let HeartbeatOutcome::Accepted { sample, .. } = det.on_heartbeat(hb("a", Some(secs(20))), secs(20)).unwrap()
        else {
            panic!()
        };
        assert!(sample.is_none());
    }

    #[test]
    fn sweep_marks_offline_exactly_once() {
        let det = detector();
        det.on_heartbeat(hb("relay-7", Some(T0)), T0).unwrap();
        det.on_heartbeat(hb("relay-7", Some(secs(30))), secs(30)).unwrap();

        assert!(det.sweep(secs(300)).is_empty());

        let changes = det.sweep(secs(360));
        assert_eq!(changes.len(), 1);
        assert_eq!((changes[0].from, changes[0].to), (NodeStatus::Online, NodeStatus::Offline));

        assert!(det.sweep(secs(420)).is_empty());
        assert!(det.sweep(secs(3600)).is_empty());
    }

    #[test]
    fn heartbeat_at_threshold_survives_the_sweep() {
        let det = detector();
        det.on_heartbeat(hb("a", Some(T0)), T0).unwrap();
        // threshold for a sweep at 360s is 60s; a heartbeat stamped 60s is not stale
        det.on_heartbeat(hb("a", Some(secs(60))), secs(60)).unwrap();
        assert!(det.sweep(secs(360)).is_empty());
        assert_eq!(det.sweep(secs(361)).len(), 1);
    }

    #[test]
    fn concurrent_heartbeats_and_sweeps_never_lose_a_fresh_heartbeat() {
        let det = Arc::new(detector());
        let names: Vec<String> = (0..32).map(|i| format!("node-{i}")).collect();
        for name in &names {
            det.on_heartbeat(hb(name, Some(T0)), T0).unwrap();
        }

        // sweep at 400s has threshold 100s; every node heartbeats at 100s concurrently
        let sweeper = {
            let det = Arc::clone(&det);
            std::thread::spawn(move || {
                let mut changes = Vec::new();
                for _ in 0..50 {
                    changes.extend(det.sweep(secs(400)));
                }
                changes
            })
        };
        let beaters: Vec<_> = names
            .iter()
            .cloned()
            .map(|name| {
                let det = Arc::clone(&det);
                std::thread::spawn(move || {
                    det.on_heartbeat(hb(&name, Some(secs(100))), secs(100)).unwrap();
                })
            })
            .collect();
        for b in beaters {
            b.join().unwrap();
        }
        sweeper.join().unwrap();

        // whichever order the two ran in, the final heartbeat leaves the node live
        for name in &names {
            assert_eq!(det.registry.find(name).unwrap().status, NodeStatus::Online);
        }
        assert!(det.sweep(secs(400)).is_empty());
    }
}
