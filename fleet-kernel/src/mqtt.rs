/**
 * MQTT BRIDGE - Heartbeats in, fleet events out
 *
 * INBOUND: subscribes to `fleet/nodes/heartbeat@v1` and feeds every payload to
 * the monitor, exactly like a UDP datagram.
 *
 * OUTBOUND: the relay task pops the monitor's event queue and publishes each
 * event on its topic. Without a broker configured the relay only logs events.
 */

use crate::config::MqttConf;
use crate::events::{EventQueue, KernelEvent};
use crate::health::HealthTracker;
use crate::models::{MetricsSample, NodeStatus};
use crate::monitor::FleetMonitor;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const TOPIC_HEARTBEAT: &str = "fleet/nodes/heartbeat@v1";
pub const TOPIC_NODE_UPDATE: &str = "fleet/nodes/update@v1";
pub const TOPIC_ALERT_RAISED: &str = "fleet/alerts/raised@v1";
pub const TOPIC_ALERT_ACKNOWLEDGED: &str = "fleet/alerts/acknowledged@v1";

/// Body of a `fleet/nodes/update@v1` message.
#[derive(Debug, Serialize)]
pub struct NodeUpdateMessage<'a> {
    pub node: &'a str,
    pub node_type: &'a str,
    pub address: Option<&'a str>,
    pub previous_status: NodeStatus,
    pub status: NodeStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub status_changed_at: OffsetDateTime,
    pub metrics: Option<&'a MetricsSample>,
}

/// Topic and JSON body for an outbound event.
pub fn encode(event: &KernelEvent) -> Result<(&'static str, Vec<u8>), serde_json::Error> {
    match event {
        KernelEvent::NodeChanged(change) => {
            let node = &change.node;
            let msg = NodeUpdateMessage {
                node: &node.name,
                node_type: &node.node_type,
                address: node.address.as_deref(),
                previous_status: change.from,
                status: change.to,
                last_seen: node.last_seen,
                status_changed_at: node.status_changed_at,
                metrics: node.metrics.as_ref(),
            };
            Ok((TOPIC_NODE_UPDATE, serde_json::to_vec(&msg)?))
        }
        KernelEvent::AlertRaised { alert } => Ok((TOPIC_ALERT_RAISED, serde_json::to_vec(alert)?)),
        KernelEvent::AlertAcknowledged { alert } => {
            Ok((TOPIC_ALERT_ACKNOWLEDGED, serde_json::to_vec(alert)?))
        }
    }
}

/// Where the relay delivers events.
#[derive(Clone)]
pub enum EventSink {
    Mqtt(AsyncClient),
    Log,
}

impl EventSink {
    async fn deliver(&self, event: &KernelEvent) {
        let (topic, payload) = match encode(event) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "failed to encode event");
                return;
            }
        };

        match self {
            EventSink::Mqtt(client) => {
                if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, payload).await {
                    warn!(topic, error = %e, "failed to publish event");
                } else {
                    debug!(topic, "event published");
                }
            }
            EventSink::Log => {
                info!(topic, payload = %String::from_utf8_lossy(&payload), "fleet event");
            }
        }
    }
}

/// Drains the queue into `sink` until the queue is closed and empty.
pub fn run_relay(queue: Arc<EventQueue>, sink: EventSink) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = queue.recv().await {
            sink.deliver(&event).await;
        }
        info!("event relay stopped");
    })
}

/// Connects to the broker, subscribes to heartbeats and keeps the event loop
/// polled. Heartbeat ingestion stops on `shutdown`. Returns the client for the relay's [`EventSink::Mqtt`].
pub fn spawn_mqtt_bridge(
    conf: &MqttConf,
    monitor: Arc<FleetMonitor>,
    health: HealthTracker,
    mut shutdown: watch::Receiver<bool>,
) -> AsyncClient {
    let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    let (client, mut eventloop) = AsyncClient::new(opts, 64);

    info!(host = %conf.host, port = conf.port, "connecting to MQTT broker");
    health.mark_mqtt_connecting();

    let subscriber = client.clone();
    tokio::spawn(async move {
        // after shutdown the loop keeps polling so the relay can flush queued events
        let mut ingesting = true;
        loop {
            let event = tokio::select! {
                event = eventloop.poll() => event,
                res = shutdown.changed(), if ingesting => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("MQTT heartbeat ingestion stopped");
                        ingesting = false;
                    }
                    continue;
                }
            };

            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    info!("MQTT connected");
                    // resubscribe on every (re)connect; try_ keeps the poll loop unblocked
                    if let Err(e) = subscriber.try_subscribe(TOPIC_HEARTBEAT, QoS::AtLeastOnce) {
                        error!(error = %e, "subscribe to heartbeats failed");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if ingesting && p.topic == TOPIC_HEARTBEAT => {
                    // no peer address over MQTT; agents are expected to send `address`
                    if let Err(e) = monitor.ingest_raw(&p.payload, None) {
                        debug!(error = %e, "rejected MQTT heartbeat");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection error");
                    health.mark_mqtt_disconnected();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    health.increment_reconnects();
                }
            }
        }
    });

    client
}
