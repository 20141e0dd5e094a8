/**
 * NODE REGISTRY - Authoritative state of every known node
 *
 * ROLE: Single writer for node records. Heartbeats (upsert) and the staleness
 * sweep (mark_stale) both go through the same mutex, so a heartbeat and a sweep
 * touching the same node are applied one after the other, never interleaved.
 *
 * TRANSITIONS:
 *   unknown -> online           first heartbeat
 *   online|warning -> offline   staleness sweep
 *   offline -> online           next heartbeat
 *   online <-> warning          metric breach / recovery (set_warning)
 *
 * Nodes are never removed; `last_seen` never moves backwards.
 */

use crate::models::{MetricsSample, Node, NodeStatus, Readings};
use crate::state::{new_state, Shared};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node not found: {0}")]
    NotFound(String),
}

/// One validated observation of a node.
#[derive(Debug, Clone)]
pub struct Sighting {
    pub name: String,
    pub observed_at: OffsetDateTime,
    pub address: Option<String>,
    pub node_type: Option<String>,
    pub readings: Option<Readings>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Applied {
        node: Node,
        previous: NodeStatus,
        transitioned: bool,
        /// False when the sighting carried no metrics or metrics older than the stored sample.
        metrics_applied: bool,
    },
    /// Replay guard tripped; nothing was written.
    Ignored { node: Node },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub online: usize,
    pub offline: usize,
    pub warning: usize,
}

#[derive(Clone)]
pub struct NodeRegistry {
    nodes: Shared<BTreeMap<String, Node>>,
    skew_tolerance: Duration,
}

impl NodeRegistry {
    pub fn new(skew_tolerance: Duration) -> Self {
        Self { nodes: new_state(BTreeMap::new()), skew_tolerance }
    }

    /// Creates or refreshes a node from a heartbeat.
    pub fn upsert(&self, sighting: Sighting) -> UpsertOutcome {
        let Sighting { name, observed_at, address, node_type, readings } = sighting;
        let sample = readings.map(|readings| MetricsSample { timestamp: observed_at, readings });

        let mut nodes = self.nodes.lock();
        let Some(node) = nodes.get_mut(&name) else {
            let metrics_applied = sample.is_some();
            let node = Node {
                name: name.clone(),
                node_type: node_type.unwrap_or_else(|| "unknown".into()),
                address,
                status: NodeStatus::Online,
                first_seen: observed_at,
                last_seen: observed_at,
                status_changed_at: observed_at,
                metrics: sample,
            };
            nodes.insert(name, node.clone());
            return UpsertOutcome::Applied {
                node,
                previous: NodeStatus::Unknown,
                transitioned: true,
                metrics_applied,
            };
        };

        if observed_at < node.last_seen - self.skew_tolerance {
            return UpsertOutcome::Ignored { node: node.clone() };
        }

        let previous = node.status;
        node.last_seen = node.last_seen.max(observed_at);
        if let Some(address) = address {
            node.address = Some(address);
        }
        if let Some(node_type) = node_type {
            node.node_type = node_type;
        }

        let metrics_applied = match sample {
            Some(sample)
                if node.metrics.as_ref().map_or(true, |m| sample.timestamp >= m.timestamp) =>
            {
                node.metrics = Some(sample);
                true
            }
            _ => false,
        };

        // warning is already live; only a silent node comes back online here
        let transitioned = !previous.is_live();
        if transitioned {
            node.status = NodeStatus::Online;
            node.status_changed_at = observed_at;
        }

        UpsertOutcome::Applied { node: node.clone(), previous, transitioned, metrics_applied }
    }

    /// Live nodes whose last heartbeat is strictly older than `threshold`.
    pub fn stale_candidates(&self, threshold: OffsetDateTime) -> Vec<String> {
        self.nodes
            .lock()
            .values()
            .filter(|n| n.status.is_live() && n.last_seen < threshold)
            .map(|n| n.name.clone())
            .collect()
    }

    /// Marks the named nodes offline. Each node is re-checked under the lock, so
    /// one that heartbeated after `stale_candidates` ran keeps its status.
    /// Nodes already offline are skipped and not reported again.
    pub fn mark_stale(
        &self,
        names: &[String],
        threshold: OffsetDateTime,
        at: OffsetDateTime,
    ) -> Vec<(Node, NodeStatus)> {
        let mut nodes = self.nodes.lock();
        let mut changed = Vec::new();
        for name in names {
            let Some(node) = nodes.get_mut(name) else { continue };
            if !node.status.is_live() || node.last_seen >= threshold {
                continue;
            }
            let previous = node.status;
            node.status = NodeStatus::Offline;
            node.status_changed_at = at;
            changed.push((node.clone(), previous));
        }
        changed
    }

    /// Moves a live node between `online` and `warning` based on the verdict for
    /// `sample`. No-op unless `sample` is still the node's current sample, so a
    /// verdict computed for a sample that a newer heartbeat already replaced
    /// cannot flip the status. Returns the node and its previous status when
    /// the status actually changed.
    pub fn set_warning(
        &self,
        name: &str,
        sample: &MetricsSample,
        breached: bool,
        at: OffsetDateTime,
    ) -> Option<(Node, NodeStatus)> {
        let mut nodes = self.nodes.lock();
        let node = nodes.get_mut(name)?;
        if node.metrics.as_ref() != Some(sample) {
            return None;
        }
        let target = match (node.status, breached) {
            (NodeStatus::Online, true) => NodeStatus::Warning,
            (NodeStatus::Warning, false) => NodeStatus::Online,
            _ => return None,
        };
        let previous = node.status;
        node.status = target;
        node.status_changed_at = at;
        Some((node.clone(), previous))
    }

    pub fn find(&self, name: &str) -> Result<Node, RegistryError> {
        self.nodes
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// All nodes, ordered by name.
    pub fn list(&self) -> Vec<Node> {
        self.nodes.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let nodes = self.nodes.lock();
        let mut counts = StatusCounts::default();
        for node in nodes.values() {
            match node.status {
                NodeStatus::Online => counts.online += 1,
                NodeStatus::Offline => counts.offline += 1,
                NodeStatus::Warning => counts.warning += 1,
                NodeStatus::Unknown => {}
            }
        }
        counts
    }
}
