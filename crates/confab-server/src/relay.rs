//! Relay endpoint for the Confab server.
//!
//! This module owns the shared state and handles the connection
//! lifecycle: accept, hand out the connection id, forward deliveries,
//! dispatch inbound frames, and detach on disconnect.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::store::SqliteStore;
use anyhow::Result;
use bytes::Bytes;
use confab_core::{Event, MemoryStore, MessageStore, RelayConfig, RelayError, RelayRouter};
use confab_protocol::{code, Frame, PROTOCOL_VERSION};
use confab_transport::{Accepted, Transport, WebSocketConfig, WebSocketTransport};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay router.
    pub router: RelayRouter,
    /// Message history store.
    pub store: Arc<dyn MessageStore>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured history database cannot be
    /// opened.
    pub fn new(config: &Config) -> Result<Self> {
        let router_config = RelayConfig {
            max_connections: config.limits.max_connections,
        };

        let store: Arc<dyn MessageStore> = match &config.store.path {
            Some(path) => {
                info!("History store: sqlite at {}", path);
                Arc::new(SqliteStore::open(path)?)
            }
            None => {
                info!("History store: in-memory (lost on restart)");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self {
            router: RelayRouter::with_config(router_config),
            store,
            config: config.clone(),
        })
    }
}

/// Run the relay accept loop.
///
/// # Errors
///
/// Returns an error if the transport fails to bind.
pub async fn run_relay_server(config: Config, state: Arc<AppState>) -> Result<()> {
    let transport = WebSocketTransport::new(WebSocketConfig {
        bind_addr: config.bind_addr()?,
        max_message_size: config.limits.max_message_size,
    })
    .await?;

    if let Some(addr) = transport.local_addr() {
        info!("Relay endpoint: ws://{}", addr);
    }

    loop {
        match transport.accept().await {
            Ok(accepted) => {
                let state = state.clone();
                tokio::spawn(handle_connection(accepted, state));
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                metrics::record_error("accept");
            }
        }
    }
}

/// Handle one relay connection from accept to disconnect.
async fn handle_connection(accepted: Accepted, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = accepted.id.to_string();
    debug!(connection = %connection_id, remote = ?accepted.remote_addr, "Connected");

    // All outbound traffic funnels through one writer task
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let mut writer = accepted.writer;
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if writer.send_frame(&frame).await.is_err() {
                break;
            }
        }
        let _ = writer.close().await;
    });

    let mut events = match state.router.attach(&connection_id) {
        Ok(rx) => rx,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Attach refused");
            metrics::record_error("capacity");
            let _ = out_tx.send(Frame::error(0, code::AT_CAPACITY, e.to_string()));
            drop(out_tx);
            let _ = writer_task.await;
            return;
        }
    };

    let heartbeat = state.config.heartbeat.interval_ms as u32;
    let _ = out_tx.send(Frame::connected(&connection_id, PROTOCOL_VERSION, heartbeat));

    // Forward router events (roster updates, relayed payloads) to the wire
    let forward_tx = out_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = match event {
                Event::Roster(users) => Frame::roster(users),
                Event::Direct(msg) => Frame::deliver(msg.from, msg.body.to_vec()),
            };
            if forward_tx.send(frame).is_err() {
                break;
            }
        }
    });

    // Inbound frame loop
    let mut reader = accepted.reader;
    loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => {
                let start = Instant::now();
                handle_frame(frame, &connection_id, &state, &out_tx);
                metrics::record_latency(start.elapsed().as_secs_f64());
            }
            Ok(None) => {
                debug!(connection = %connection_id, "Connection closed");
                break;
            }
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Transport error");
                metrics::record_error("transport");
                break;
            }
        }
    }

    // Cleanup
    forward_task.abort();
    state.router.detach(&connection_id);
    metrics::set_users_online(state.router.online_count());

    drop(out_tx);
    let _ = writer_task.await;

    debug!(connection = %connection_id, "Disconnected");
}

/// Dispatch a decoded frame.
///
/// Outbound frames go through the writer channel; send failures mean the
/// writer already shut down, and the read loop will notice on its own.
fn handle_frame(
    frame: Frame,
    connection_id: &str,
    state: &Arc<AppState>,
    out: &mpsc::UnboundedSender<Frame>,
) {
    match frame {
        Frame::Identify { id, user } => {
            debug!(connection = %connection_id, user = %user, "Identify request");

            let response = match state.router.identify(connection_id, &user) {
                Ok(()) => {
                    metrics::set_users_online(state.router.online_count());
                    Frame::ack(id)
                }
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Identify failed");
                    // Only user-id problems report INVALID_USER; an
                    // unattached connection is a protocol-level fault
                    let code = match &e {
                        RelayError::InvalidUser(_) => code::INVALID_USER,
                        RelayError::AtCapacity => code::AT_CAPACITY,
                        RelayError::UnknownConnection(_) => code::BAD_FRAME,
                    };
                    Frame::error(id, code, e.to_string())
                }
            };
            let _ = out.send(response);
        }

        Frame::Direct { id, from, to, body } => {
            let size = body.len();
            let delivered = state.router.relay(&from, &to, Bytes::from(body));
            metrics::record_relay(delivered, size);

            // Ack means the relay call completed, never that the payload
            // was delivered; recipient-offline is not an error
            if let Some(req_id) = id {
                let _ = out.send(Frame::ack(req_id));
            }
        }

        Frame::Ping { timestamp } => {
            let _ = out.send(Frame::pong(timestamp));
        }

        Frame::Pong { .. } => {
            // Nothing to update; the registry has no staleness tracking
        }

        Frame::Connect { version } => {
            if confab_protocol::is_supported(version) {
                debug!(connection = %connection_id, version, "Connect frame (already connected)");
            } else {
                let _ = out.send(Frame::error(
                    0,
                    code::UNSUPPORTED_VERSION,
                    format!("Unsupported protocol version {version}"),
                ));
            }
        }

        other => {
            warn!(
                connection = %connection_id,
                frame_type = ?other.frame_type(),
                "Unexpected frame type"
            );
            let _ = out.send(Frame::error(0, code::BAD_FRAME, "Unexpected frame"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            router: RelayRouter::new(),
            store: Arc::new(MemoryStore::new()),
            config: Config::default(),
        })
    }

    fn error_code(frame: Frame) -> u16 {
        match frame {
            Frame::Error { code, .. } => code,
            other => panic!("expected an error frame, got {other:?}"),
        }
    }

    #[test]
    fn test_identify_error_codes() {
        let state = test_state();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Identify on an unattached connection is a protocol fault, not a
        // user-id problem
        handle_frame(Frame::identify(1, "alice"), "conn-1", &state, &tx);
        assert_eq!(error_code(rx.try_recv().unwrap()), code::BAD_FRAME);

        let _events = state.router.attach("conn-1").unwrap();

        // A bad user id on an attached connection reports INVALID_USER
        handle_frame(Frame::identify(2, ""), "conn-1", &state, &tx);
        assert_eq!(error_code(rx.try_recv().unwrap()), code::INVALID_USER);

        // A valid identify is acked
        handle_frame(Frame::identify(3, "alice"), "conn-1", &state, &tx);
        assert!(matches!(rx.try_recv().unwrap(), Frame::Ack { id: 3 }));
    }
}
