/**
 * FLEET KERNEL - Node liveness tracking and alerting
 *
 * For a fleet of hosts that report in with periodic heartbeats. FleetMonitor
 * (monitor.rs) is the entry point; udp, mqtt and http are the adapters the
 * fleet-kernel binary wires around it.
 */

pub mod alerts;
pub mod clock;
pub mod config;
pub mod events;
pub mod health;
pub mod http;
pub mod liveness;
pub mod models;
pub mod monitor;
pub mod mqtt;
pub mod registry;
pub mod state;
pub mod udp;
