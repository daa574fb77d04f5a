//! UDP address-discovery listener
//!
//! Each datagram carries only a request id. The sender's public endpoint is
//! taken from the datagram's source address, never from its contents.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ProbeOutcome;
use crate::registry::SharedRegistry;

/// Longest request id accepted in a probe
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Extract the request id from a probe datagram
pub fn parse_probe(datagram: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(datagram).ok()?.trim();
    if text.is_empty() || text.len() > MAX_REQUEST_ID_LEN {
        return None;
    }
    Some(text)
}

/// Handle one datagram; returns the bytes to echo back, if any
pub async fn handle_probe(
    registry: &SharedRegistry,
    datagram: &[u8],
    source: SocketAddr,
) -> Option<Vec<u8>> {
    let request_id = parse_probe(datagram)?;
    let outcome = registry.lock().await.record_address(request_id, source);
    match outcome {
        ProbeOutcome::Recorded | ProbeOutcome::Retransmitted | ProbeOutcome::Completed => {
            Some(request_id.as_bytes().to_vec())
        }
        ProbeOutcome::Ignored => {
            debug!(%source, "Ignoring probe for unknown request id");
            None
        }
    }
}

pub fn spawn_udp_listener(
    socket: Arc<UdpSocket>,
    registry: SharedRegistry,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match socket.local_addr() {
            Ok(addr) => info!("UDP probe listener on {}", addr),
            Err(e) => warn!("UDP probe listener address unavailable: {}", e),
        }

        let mut buf = vec![0u8; MAX_REQUEST_ID_LEN + 64];
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => received,
            };

            let (len, source) = match received {
                Ok(r) => r,
                Err(e) => {
                    // ICMP unreachable on some platforms surfaces here
                    warn!("UDP receive error: {}", e);
                    continue;
                }
            };

            if let Some(echo) = handle_probe(&registry, &buf[..len], source).await {
                if let Err(e) = socket.send_to(&echo, source).await {
                    warn!(%source, "UDP echo failed: {}", e);
                }
            }
        }
        info!("UDP probe listener stopped");
    })
}
