//! Per-connection WebSocket handling.
//!
//! Each accepted TCP stream gets a reader loop (this module) and a writer task.
//! The reader turns frames into [`HubEvent`]s for the hub task; the writer
//! drains the connection's [`PeerSender`](crate::connection::PeerSender)
//! channel back onto the socket.

use crate::connection::ConnectionId;
use crate::error::ServerError;
use crate::messaging::HubEvent;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Handles a single client connection from handshake to close.
///
/// # Arguments
///
/// * `stream` - The TCP stream for the client connection
/// * `remote_addr` - The client's remote address
/// * `connection_id` - Identifier allocated for this connection
/// * `ws_path` - The only request path accepted for the upgrade
/// * `handshake_timeout` - Upper bound on the upgrade itself
/// * `events` - Channel into the hub task
/// * `shutdown` - Server-wide shutdown signal
///
/// # Returns
///
/// `Ok(())` once the connection has closed, or a `ServerError` if the
/// handshake failed or the hub is no longer running.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    connection_id: ConnectionId,
    ws_path: String,
    handshake_timeout: Duration,
    events: mpsc::UnboundedSender<HubEvent>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let check_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == ws_path {
            Ok(response)
        } else {
            debug!("Rejecting upgrade for path {} from {}", request.uri().path(), remote_addr);
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws_stream = match timeout(handshake_timeout, accept_hdr_async(stream, check_path)).await {
        Ok(Ok(ws_stream)) => ws_stream,
        Ok(Err(e)) => {
            return Err(ServerError::Network(format!(
                "WebSocket handshake failed for {}: {}",
                remote_addr, e
            )))
        }
        Err(_) => {
            return Err(ServerError::Network(format!(
                "WebSocket handshake from {} not completed within {:?}",
                remote_addr, handshake_timeout
            )))
        }
    };

    let (mut ws_sink, mut ws_receiver) = ws_stream.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    events
        .send(HubEvent::Connect {
            connection_id,
            remote_addr,
            outbound,
        })
        .map_err(|_| ServerError::Internal("hub task is not running".to_string()))?;

    // Ends once the hub drops this peer's sender, i.e. after the disconnect
    // has been processed or the hub has stopped.
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(e) = ws_sink.send(Message::text(text)).await {
                debug!("Write to connection {} failed: {}", connection_id, e);
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    forward(&events, connection_id, text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => forward(&events, connection_id, text),
                    Err(_) => debug!("Dropping non-UTF-8 binary frame from {}", connection_id),
                },
                Some(Ok(Message::Close(_))) | None => {
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite itself
                }
                Some(Err(e)) => {
                    warn!("WebSocket error for connection {}: {}", connection_id, e);
                    break;
                }
            },
            _ = shutdown.recv() => {
                break;
            }
        }
    }

    let _ = events.send(HubEvent::Disconnect { connection_id });
    info!("🔌 Connection {} from {} closed", connection_id, remote_addr);

    if let Err(e) = writer.await {
        debug!("Writer task for {} ended abnormally: {}", connection_id, e);
    }
    Ok(())
}

fn forward(events: &mpsc::UnboundedSender<HubEvent>, connection_id: ConnectionId, payload: String) {
    if events
        .send(HubEvent::Inbound {
            connection_id,
            payload,
        })
        .is_err()
    {
        debug!("Hub gone, dropping frame from {}", connection_id);
    }
}
