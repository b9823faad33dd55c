//! Core relay server implementation.
//!
//! This module contains the `RelayServer` struct, which binds the WebSocket
//! listener and wires the hub task, the forwarder and the per-connection
//! handlers together.

use crate::{
    config::HubConfig,
    connection::ConnectionIdAllocator,
    error::ServerError,
    messaging::{Dispatcher, HubEvent},
    reaper::Reaper,
    relay::{BackendSink, Forwarder, RelayQueue},
    server::{handlers::handle_connection, hub::run_hub},
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// The telemetry relay server.
///
/// `RelayServer` accepts device WebSocket connections and funnels their
/// frames into one hub task that owns every session. Events worth relaying
/// are fanned out to all peers and queued for the backend, which a separate
/// forwarder drains at a fixed tick.
///
/// # Architecture
///
/// * **Hub task**: dispatcher (session registry + broadcast hub) and reaper
/// * **Forwarder task**: relay queue to backend sink, one envelope per tick
/// * **Connection tasks**: a reader and a writer per WebSocket
pub struct RelayServer {
    /// Server configuration settings
    config: HubConfig,

    /// Backend destination; `None` when forwarding is disabled
    sink: Option<Arc<dyn BackendSink>>,

    /// Bounded queue between the hub task and the forwarder
    relay: Arc<RelayQueue>,

    /// Source of connection identifiers
    ids: Arc<ConnectionIdAllocator>,

    /// Number of currently open connections
    active_connections: Arc<AtomicUsize>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl RelayServer {
    /// Creates a new relay server with the specified configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration parameters for server behavior
    /// * `sink` - Where forwarded envelopes go; pass `None` to keep the hub
    ///   purely local (the queue still fills up to its capacity)
    pub fn new(config: HubConfig, sink: Option<Arc<dyn BackendSink>>) -> Self {
        let relay = Arc::new(RelayQueue::new(config.queue_capacity));
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            config,
            sink,
            relay,
            ids: Arc::new(ConnectionIdAllocator::new()),
            active_connections: Arc::new(AtomicUsize::new(0)),
            shutdown_sender,
        }
    }

    /// Binds the configured address and serves until shutdown is requested.
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Creates the TCP listener with `SO_REUSEADDR` set.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.bind_address;
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set SO_REUSEADDR: {}", e);
        }

        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
        socket
            .listen(1024)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Network(format!("Failed to set non-blocking: {e}")))?;

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))?;
        info!("✅ Listener bound on {}", address);
        Ok(listener)
    }

    /// Runs the hub on an already bound listener until shutdown.
    ///
    /// # Startup Sequence
    ///
    /// 1. Spawn the hub task (dispatcher + reaper)
    /// 2. Spawn the forwarder if a backend sink is configured
    /// 3. Accept connections, enforcing `max_connections`
    /// 4. On shutdown, stop accepting and wait for the hub and forwarder
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        info!("🚀 Relay hub listening on ws://{}{}", local_addr, self.config.ws_path);

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        let hub_task = tokio::spawn(run_hub(
            Dispatcher::new(self.relay.clone()),
            Reaper::new(self.config.grace_period),
            event_receiver,
            self.config.tick_interval,
            self.shutdown_sender.subscribe(),
        ));

        let forwarder_task = match &self.sink {
            Some(sink) => {
                let forwarder = Forwarder::new(self.relay.clone(), sink.clone(), self.config.backend.timeout);
                Some(tokio::spawn(
                    forwarder.run(self.config.tick_interval, self.shutdown_sender.subscribe()),
                ))
            }
            None => {
                info!("📭 Backend forwarding disabled");
                None
            }
        };

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(stream, addr, &event_sender),
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(event_sender);
        if let Err(e) = hub_task.await {
            return Err(ServerError::Internal(format!("Hub task failed: {e}")));
        }
        if let Some(task) = forwarder_task {
            if let Err(e) = task.await {
                return Err(ServerError::Internal(format!("Forwarder task failed: {e}")));
            }
        }

        info!("Server stopped");
        Ok(())
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr, events: &mpsc::UnboundedSender<HubEvent>) {
        let Some(slot) = ConnectionSlot::acquire(&self.active_connections, self.config.max_connections) else {
            warn!(
                "🚫 Connection limit ({}) reached, rejecting {}",
                self.config.max_connections, addr
            );
            return;
        };

        let connection_id = self.ids.allocate();
        let ws_path = self.config.ws_path.clone();
        let handshake_timeout = self.config.handshake_timeout;
        let events = events.clone();
        let shutdown = self.shutdown_sender.subscribe();

        tokio::spawn(async move {
            let _slot = slot;
            if let Err(e) = handle_connection(stream, addr, connection_id, ws_path, handshake_timeout, events, shutdown).await {
                debug!("Connection {} from {} ended with error: {}", connection_id, addr, e);
            }
        });
    }

    /// Initiates server shutdown.
    ///
    /// Stops the accept loop, the hub task, the forwarder and every open
    /// connection's reader.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    /// The queue feeding the backend forwarder.
    pub fn relay_queue(&self) -> Arc<RelayQueue> {
        self.relay.clone()
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }
}

/// Counts one open connection for as long as it is held.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(counter: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < limit).then_some(current + 1)
            })
            .ok()
            .map(|_| Self(counter.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_slots_respect_limit() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = ConnectionSlot::acquire(&counter, 2).unwrap();
        let _second = ConnectionSlot::acquire(&counter, 2).unwrap();
        assert!(ConnectionSlot::acquire(&counter, 2).is_none());

        drop(first);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(ConnectionSlot::acquire(&counter, 2).is_some());
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = HubConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            ..HubConfig::default()
        };
        let server = RelayServer::new(config, None);
        let listener = server.bind().unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
