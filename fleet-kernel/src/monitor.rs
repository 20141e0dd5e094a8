/**
 * FLEET MONITOR - Entry point for the transport, API and timer layers
 *
 * ROLE: owns the registry, the liveness detector, the alert engine and the
 * outbound event queue, and runs every input through them in order:
 * heartbeat -> registry transition -> alert rules -> events.
 */

use crate::alerts::{Alert, AlertEngine, AlertError, AlertFilter, AlertSeverity, Raised};
use crate::clock::{Clock, SystemClock};
use crate::config::{KernelConfig, PublishMode};
use crate::events::{EventQueue, KernelEvent};
use crate::liveness::{HeartbeatOutcome, IngestError, IngestSnapshot, LivenessDetector, NodeChanged};
use crate::models::{HeartbeatPayload, Node};
use crate::registry::{NodeRegistry, RegistryError, StatusCounts};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted {
        node: Node,
        changes: Vec<NodeChanged>,
        raised: Vec<Alert>,
    },
    /// Older than the node's `last_seen` by more than the skew tolerance.
    Ignored { node: Node },
}

pub struct FleetMonitor {
    registry: NodeRegistry,
    liveness: LivenessDetector,
    alerts: AlertEngine,
    events: Arc<EventQueue>,
    clock: Arc<dyn Clock>,
    mode: PublishMode,
}

impl FleetMonitor {
    pub fn new(config: &KernelConfig, clock: Arc<dyn Clock>) -> Self {
        let registry = NodeRegistry::new(config.liveness.skew_tolerance);
        Self {
            liveness: LivenessDetector::new(registry.clone(), &config.liveness),
            registry,
            alerts: AlertEngine::new(config.thresholds.clone()),
            events: Arc::new(EventQueue::new(config.publisher.queue_capacity)),
            clock,
            mode: config.publisher.mode,
        }
    }

    pub fn with_system_clock(config: &KernelConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn events(&self) -> Arc<EventQueue> {
        Arc::clone(&self.events)
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Decodes a JSON heartbeat as sent over UDP or MQTT.
    pub fn ingest_raw(&self, bytes: &[u8], source: Option<IpAddr>) -> Result<IngestOutcome, IngestError> {
        let payload: HeartbeatPayload = serde_json::from_slice(bytes)
            .map_err(|e| self.liveness.record_malformed(&format!("invalid json: {e}")))?;
        self.ingest_heartbeat(payload, source)
    }

    pub fn ingest_heartbeat(
        &self,
        payload: HeartbeatPayload,
        source: Option<IpAddr>,
    ) -> Result<IngestOutcome, IngestError> {
        let received_at = self.clock.now();
        let outcome = self.liveness.on_heartbeat(payload.into_heartbeat(source), received_at)?;

        let (node, change, sample) = match outcome {
            HeartbeatOutcome::Ignored { node } => return Ok(IngestOutcome::Ignored { node }),
            HeartbeatOutcome::Accepted { node, change, sample } => (node, change, sample),
        };

        let mut changes = Vec::new();
        let mut raised = Vec::new();
        if let Some(change) = change {
            raised.extend(self.dispatch(change.clone(), received_at));
            changes.push(change);
        }

        if let Some(sample) = sample {
            let verdict = self.alerts.on_metrics(&node.name, &sample, received_at);
            for alert in verdict.raised {
                self.events.push(KernelEvent::AlertRaised { alert: alert.clone() });
                raised.push(alert);
            }
            // no-op when a concurrent heartbeat already replaced `sample`
            let edge = self.registry.set_warning(&node.name, &sample, verdict.breached, received_at);
            if let Some((node, from)) = edge {
                let change = NodeChanged { to: node.status, node, from };
                info!(node = %change.node.name, from = %change.from, to = %change.to, "node health changed");
                self.events.push(KernelEvent::NodeChanged(change.clone()));
                changes.push(change);
            }
        }

        // re-read so the caller sees the warning edge applied above
        let node = self.registry.find(&node.name).unwrap_or(node);

        if changes.is_empty() && self.mode == PublishMode::EveryHeartbeat {
            self.events.push(KernelEvent::NodeChanged(NodeChanged {
                from: node.status,
                to: node.status,
                node: node.clone(),
            }));
        }

        Ok(IngestOutcome::Accepted { node, changes, raised })
    }

    /// One staleness sweep; called by the sweeper task or an external timer.
    pub fn run_sweep_tick(&self, now: OffsetDateTime) -> Vec<NodeChanged> {
        let changes = self.liveness.sweep(now);
        for change in &changes {
            self.dispatch(change.clone(), now);
        }
        changes
    }

    pub fn query_node(&self, name: &str) -> Result<Node, RegistryError> {
        self.registry.find(name)
    }

    pub fn query_all_nodes(&self) -> Vec<Node> {
        self.registry.list()
    }

    pub fn query_alerts(&self, filter: AlertFilter) -> Vec<Alert> {
        self.alerts.list(filter)
    }

    pub fn query_alert(&self, id: &str) -> Result<Alert, AlertError> {
        self.alerts.find(id)
    }

    pub fn acknowledge_alert(&self, id: &str) -> Result<Alert, AlertError> {
        let ack = self.alerts.acknowledge(id, self.clock.now())?;
        if ack.newly {
            self.events.push(KernelEvent::AlertAcknowledged { alert: ack.alert.clone() });
        }
        Ok(ack.alert)
    }

    pub fn manual_alert(&self, message: String, severity: AlertSeverity) -> Alert {
        let alert = self.alerts.manual_alert(message, severity, self.clock.now());
        self.events.push(KernelEvent::AlertRaised { alert: alert.clone() });
        alert
    }

    pub fn ingest_stats(&self) -> IngestSnapshot {
        self.liveness.stats()
    }

    pub fn status_counts(&self) -> StatusCounts {
        self.registry.status_counts()
    }

    pub fn node_count(&self) -> usize {
        self.registry.len()
    }

    pub fn open_alert_count(&self) -> usize {
        self.alerts.open_count()
    }

    /// Periodic staleness sweep. Stops when `shutdown` flips to true.
    pub fn start_sweeper(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(period = ?period, "starting staleness sweeper");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick fires immediately; nothing can be stale yet
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let changes = self.run_sweep_tick(self.clock.now());
                        debug!(changed = changes.len(), "sweep done");
                    }
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            info!("staleness sweeper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Routes a transition to the alert engine and the event queue.
    fn dispatch(&self, change: NodeChanged, at: OffsetDateTime) -> Option<Alert> {
        let raised = self.alerts.on_node_changed(&change, at);
        self.events.push(KernelEvent::NodeChanged(change));
        let alert = raised.and_then(Raised::into_new)?;
        self.events.push(KernelEvent::AlertRaised { alert: alert.clone() });
        Some(alert)
    }
}
