/**
 * UDP LISTENER - One datagram, one JSON heartbeat
 */

use crate::monitor::FleetMonitor;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const MAX_DATAGRAM: usize = 65_536;

pub fn run_udp_listener(
    socket: UdpSocket,
    monitor: Arc<FleetMonitor>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Ok(addr) = socket.local_addr() {
            info!(%addr, "listening for UDP heartbeats");
        }
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                recv = socket.recv_from(&mut buf) => match recv {
                    Ok((len, peer)) => {
                        if let Err(e) = monitor.ingest_raw(&buf[..len], Some(peer.ip())) {
                            debug!(%peer, error = %e, "rejected UDP heartbeat");
                        }
                    }
                    Err(e) => error!(error = %e, "UDP receive failed"),
                },
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("UDP listener stopped");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::models::NodeStatus;
    use std::time::Duration;

    #[tokio::test]
    async fn datagrams_reach_the_registry() {
        let monitor = Arc::new(FleetMonitor::with_system_clock(&KernelConfig::default()));
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = run_udp_listener(socket, Arc::clone(&monitor), rx);

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"garbage", addr).await.unwrap();
        sender
            .send_to(br#"{"node": "relay-7", "system": {"platform": "linux"}}"#, addr)
            .await
            .unwrap();

        let mut node = None;
        for _ in 0..100 {
            if let Ok(found) = monitor.query_node("relay-7") {
                node = Some(found);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let node = node.expect("heartbeat was not ingested");
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.node_type, "linux");
        assert_eq!(node.address.as_deref(), Some("127.0.0.1"));
        assert_eq!(monitor.ingest_stats().malformed, 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
