/**
 * FLEET KERNEL - Server entry point
 *
 * ROLE: loads config, builds the FleetMonitor and wires the adapters around it:
 * UDP heartbeat listener, staleness sweeper, MQTT bridge (or log relay) and
 * the HTTP API. Ctrl-C stops the inputs first, then flushes the event queue.
 */

use anyhow::Context;
use fleet_kernel::config::load_config;
use fleet_kernel::health::HealthTracker;
use fleet_kernel::http::{build_router, AppState};
use fleet_kernel::monitor::FleetMonitor;
use fleet_kernel::mqtt::{run_relay, spawn_mqtt_bridge, EventSink};
use fleet_kernel::udp::run_udp_listener;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;
    if let Err(e) = cfg.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(2);
    }

    let monitor = Arc::new(FleetMonitor::with_system_clock(&cfg));
    let health = HealthTracker::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // UDP heartbeats
    let socket = UdpSocket::bind(&cfg.udp.bind)
        .await
        .with_context(|| format!("binding UDP {}", cfg.udp.bind))?;
    let udp = run_udp_listener(socket, Arc::clone(&monitor), shutdown_rx.clone());

    let sweeper = Arc::clone(&monitor).start_sweeper(cfg.liveness.sweep_interval, shutdown_rx.clone());

    // outbound events
    let sink = match &cfg.mqtt {
        Some(mqtt) => {
            let client = spawn_mqtt_bridge(mqtt, Arc::clone(&monitor), health.clone(), shutdown_rx.clone());
            EventSink::Mqtt(client)
        }
        None => {
            info!("no MQTT broker configured, events go to the log");
            EventSink::Log
        }
    };
    let relay = run_relay(monitor.events(), sink);

    // HTTP
    let api_key = std::env::var("FLEET_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        info!("FLEET_API_KEY not set, HTTP API is open");
    }
    let app = build_router(AppState { monitor: Arc::clone(&monitor), health, api_key });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("binding HTTP {}", cfg.http.bind))?;
    info!(addr = %cfg.http.bind, "listening on http");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    shutdown_tx.send(true).ok();
    udp.await.ok();
    sweeper.await.ok();

    // queued events are still delivered after close
    monitor.events().close();
    relay.await.ok();
    info!("fleet kernel stopped");
    Ok(())
}
