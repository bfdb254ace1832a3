//! Transport abstraction traits for Confab.
//!
//! These traits define the interface that all transport implementations
//! must provide, allowing the relay server to be transport-agnostic.

use async_trait::async_trait;
use confab_protocol::Frame;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Unique identifier for a live transport session.
///
/// Distinct from the stable user identifier: a user may pass through many
/// connection ids over their lifetime, and an id is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

/// Sequence counter so ids stay unique even within one nanosecond.
static CONNECTION_SEQ: AtomicU64 = AtomicU64::new(0);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        let seq = CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{timestamp:x}_{seq}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake with the client failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] confab_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The inbound half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` when the connection closed cleanly.
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// The outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a frame.
    async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A freshly accepted connection, split into its two halves.
///
/// The server moves the writer into a dedicated task and keeps the reader
/// in the connection handler; the halves never contend.
pub struct Accepted {
    /// Unique identifier assigned to this connection.
    pub id: ConnectionId,
    /// Remote peer address, if the transport knows it.
    pub remote_addr: Option<String>,
    /// Inbound frames.
    pub reader: Box<dyn FrameStream>,
    /// Outbound frames.
    pub writer: Box<dyn FrameSink>,
}

/// A transport that can accept connections.
///
/// Transports handle the underlying protocol (WebSocket today) and
/// present a uniform framed interface.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// Blocks until a connection is available or an error occurs.
    async fn accept(&self) -> Result<Accepted, TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }
}
