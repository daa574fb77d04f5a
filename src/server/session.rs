//! One framed TCP session per daemon
//!
//! The reader decodes frames and spawns a routed handler for each, in
//! arrival order. Handlers may finish out of order; at most
//! `max_in_flight` run per session and reading pauses while they are all
//! busy. The writer drains the client's outbound queue; it ends when the
//! registry drops the client's sender, which closes the socket.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::router;
use crate::protocol::{Outbound, TrackerCodec};
use crate::registry::{ClientHandle, ClientId};
use crate::server::AppState;

pub async fn handle_session(
    state: Arc<AppState>,
    stream: TcpStream,
    remote: SocketAddr,
    shutdown: CancellationToken,
) {
    let id = ClientId::next();
    let (handle, outbound) = ClientHandle::channel();

    {
        let mut registry = state.registry.lock().await;
        if registry.client_count() >= state.settings.max_clients {
            warn!("Session: at capacity, rejecting {}", remote);
            return;
        }
        registry.add_client(id, handle, Some(remote));
    }
    info!(client = %id, %remote, "Session opened");

    let (read_half, write_half) = stream.into_split();
    let codec = TrackerCodec::new(state.settings.max_frame_bytes);
    let reader = FramedRead::new(read_half, codec.clone());
    let writer = FramedWrite::new(write_half, codec);

    let mut writer_task = tokio::spawn(write_loop(writer, outbound, id));

    let finished = tokio::select! {
        _ = read_loop(state.clone(), reader, id) => None,
        // the registry dropped this client (daemon redeemed or deleted)
        result = &mut writer_task => Some(result),
        _ = shutdown.cancelled() => {
            debug!(client = %id, "Session cancelled by shutdown");
            None
        }
    };

    // dropping the registry entry drops the only sender; the writer flushes and exits
    state.registry.lock().await.remove_client(id);
    let result = match finished {
        Some(result) => result,
        None => writer_task.await,
    };
    if let Err(e) = result {
        warn!(client = %id, "Session writer panicked: {}", e);
    }
    info!(client = %id, %remote, "Session closed");
}

async fn read_loop(
    state: Arc<AppState>,
    mut reader: FramedRead<tokio::net::tcp::OwnedReadHalf, TrackerCodec>,
    id: ClientId,
) {
    let in_flight = Arc::new(Semaphore::new(state.settings.max_in_flight.max(1)));
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Ok(inbound)) => {
                let Ok(permit) = in_flight.clone().acquire_owned().await else {
                    break;
                };
                let state = state.clone();
                tokio::spawn(async move {
                    router::route(&state, id, inbound).await;
                    drop(permit);
                });
            }
            Ok(Err(e)) => {
                warn!(client = %id, "Dropping frame: {}", e);
            }
            Err(e) => {
                debug!(client = %id, "Session read ended: {}", e);
                break;
            }
        }
    }
}

async fn write_loop(
    mut writer: FramedWrite<tokio::net::tcp::OwnedWriteHalf, TrackerCodec>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    id: ClientId,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = writer.send(message).await {
            debug!(client = %id, "Session write failed: {}", e);
            break;
        }
    }
    if let Err(e) = writer.close().await {
        debug!(client = %id, "Session shutdown failed: {}", e);
    }
}
