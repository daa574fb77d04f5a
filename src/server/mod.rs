//! TCP/UDP server
//!
//! [`start_server`] binds the session listener and the UDP probe listener,
//! starts the pair sweep and returns a [`ServerHandle`] that stops them all.

pub mod router;
pub mod session;
mod state;

pub use state::{AppState, Settings};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Args;
use crate::nat::{spawn_sweep_task, udp::spawn_udp_listener};
use crate::types::{Result, TrackerError};

/// Addresses to bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindConfig {
    pub tcp: SocketAddr,
    pub udp: SocketAddr,
}

impl BindConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            tcp: args.listen,
            udp: args.udp_listen,
        }
    }

    /// Ephemeral loopback ports
    pub fn loopback() -> Self {
        let any: SocketAddr = SocketAddr::from(([127, 0, 0, 1], 0));
        Self { tcp: any, udp: any }
    }
}

/// Running server
pub struct ServerHandle {
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Token cancelled when the server stops
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting, close every session and wait for the listeners
    pub async fn stop(self) {
        info!("Stopping tracker");
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Server task ended abnormally: {}", e);
            }
        }
        info!("Tracker stopped");
    }
}

pub async fn start_server(state: Arc<AppState>, bind: BindConfig) -> Result<ServerHandle> {
    let listener = TcpListener::bind(bind.tcp)
        .await
        .map_err(|e| TrackerError::Config(format!("Cannot bind TCP {}: {}", bind.tcp, e)))?;
    let udp = UdpSocket::bind(bind.udp)
        .await
        .map_err(|e| TrackerError::Config(format!("Cannot bind UDP {}: {}", bind.udp, e)))?;

    let tcp_addr = listener.local_addr()?;
    let udp_addr = udp.local_addr()?;
    let shutdown = CancellationToken::new();

    let tasks = vec![
        tokio::spawn(accept_loop(listener, state.clone(), shutdown.clone())),
        spawn_udp_listener(Arc::new(udp), state.registry.clone(), shutdown.clone()),
        spawn_sweep_task(
            state.registry.clone(),
            state.settings.pair_sweep_interval,
            shutdown.clone(),
        ),
    ];

    info!("Tracker listening on tcp://{} udp://{}", tcp_addr, udp_addr);
    Ok(ServerHandle {
        tcp_addr,
        udp_addr,
        shutdown,
        tasks,
    })
}

async fn accept_loop(listener: TcpListener, state: Arc<AppState>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", remote, e);
                }
                tokio::spawn(session::handle_session(
                    state.clone(),
                    stream,
                    remote,
                    shutdown.child_token(),
                ));
            }
            Err(e) => {
                // typically fd exhaustion; back off instead of spinning
                warn!("Accept failed: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
    debug!("Accept loop stopped");
}
