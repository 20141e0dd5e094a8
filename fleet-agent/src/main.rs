/**
 * FLEET AGENT - Node-side heartbeat emitter
 *
 * Collects CPU, memory, disk, network and temperature with sysinfo and sends a
 * heartbeat to the kernel every FLEET_INTERVAL, over UDP (default) or MQTT.
 *
 * ENV:
 * - FLEET_NODE_NAME    node name, defaults to the hostname
 * - FLEET_TRANSPORT    udp | mqtt
 * - FLEET_KERNEL_ADDR  UDP target, default 127.0.0.1:8765
 * - FLEET_MQTT_HOST / FLEET_MQTT_PORT  broker, default localhost:1883
 * - FLEET_INTERVAL     humantime duration, default 30s
 */

mod payload;

use crate::payload::{build_heartbeat, Snapshot};
use anyhow::Context;
use gethostname::gethostname;
use local_ip_address::local_ip;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::{Duration, SystemTime};
use sysinfo::{Components, Disks, Networks, System};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const HEARTBEAT_TOPIC: &str = "fleet/nodes/heartbeat@v1";

enum Transport {
    Udp { socket: UdpSocket, target: String },
    Mqtt(AsyncClient),
}

impl Transport {
    async fn send(&self, payload: Vec<u8>) -> anyhow::Result<()> {
        match self {
            Transport::Udp { socket, target } => {
                socket.send_to(&payload, target).await?;
            }
            Transport::Mqtt(client) => {
                client.publish(HEARTBEAT_TOPIC, QoS::AtLeastOnce, false, payload).await?;
            }
        }
        Ok(())
    }
}

struct Collector {
    sys: System,
    disks: Disks,
    networks: Networks,
    components: Components,
}

impl Collector {
    fn new() -> Self {
        Self {
            sys: System::new(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
        }
    }

    fn collect(&mut self) -> Snapshot {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh();
        self.networks.refresh();
        self.components.refresh();

        let (disk_total, disk_available) = self
            .disks
            .iter()
            .fold((0, 0), |(t, a), d| (t + d.total_space(), a + d.available_space()));

        let (recv, sent) = self
            .networks
            .iter()
            .fold((0, 0), |(r, s), (_, data)| (r + data.total_received(), s + data.total_transmitted()));
        let has_networks = self.networks.iter().next().is_some();

        // first sensor whose label looks like a CPU package/core
        let cpu_temperature = self
            .components
            .iter()
            .find(|c| {
                let label = c.label().to_lowercase();
                label.contains("cpu") || label.contains("core") || label.contains("package")
            })
            .map(|c| c.temperature());

        Snapshot {
            cpu_percent: Some(self.sys.global_cpu_info().cpu_usage()),
            memory_used: self.sys.used_memory(),
            memory_total: self.sys.total_memory(),
            disk_available,
            disk_total,
            bytes_recv: has_networks.then_some(recv),
            bytes_sent: has_networks.then_some(sent),
            cpu_temperature,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

async fn connect(transport: &str) -> anyhow::Result<Transport> {
    match transport {
        "mqtt" => {
            let host = env_or("FLEET_MQTT_HOST", "localhost");
            let port: u16 = env_or("FLEET_MQTT_PORT", "1883").parse().context("FLEET_MQTT_PORT")?;
            let client_id = format!("fleet-agent-{}", gethostname().to_string_lossy());
            let mut opts = MqttOptions::new(client_id, &host, port);
            opts.set_keep_alive(Duration::from_secs(30));
            let (client, mut eventloop) = AsyncClient::new(opts, 10);

            tokio::spawn(async move {
                loop {
                    if let Err(e) = eventloop.poll().await {
                        warn!(error = %e, "MQTT connection error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            });
            info!(%host, port, "sending heartbeats over MQTT");
            Ok(Transport::Mqtt(client))
        }
        "udp" => {
            let target = env_or("FLEET_KERNEL_ADDR", "127.0.0.1:8765");
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            info!(%target, "sending heartbeats over UDP");
            Ok(Transport::Udp { socket, target })
        }
        other => anyhow::bail!("unknown FLEET_TRANSPORT '{other}' (expected udp or mqtt)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let node = env_or("FLEET_NODE_NAME", &gethostname().to_string_lossy());
    let interval = humantime::parse_duration(&env_or("FLEET_INTERVAL", "30s")).context("FLEET_INTERVAL")?;
    let transport = connect(&env_or("FLEET_TRANSPORT", "udp")).await?;
    let address = local_ip().ok().map(|ip| ip.to_string());

    info!(%node, interval = %humantime::format_duration(interval), "fleet agent started");

    let mut collector = Collector::new();
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let snap = collector.collect();
        let hb = build_heartbeat(&node, address.clone(), &snap, SystemTime::now());
        let payload = serde_json::to_vec(&hb)?;

        match transport.send(payload).await {
            Ok(()) => debug!(cpu = ?snap.cpu_percent, "heartbeat sent"),
            Err(e) => warn!(error = %e, "failed to send heartbeat"),
        }
    }
}
