//! Delivery events for Confab.
//!
//! These types are handed to connection handlers by the relay router.

use crate::presence::UserId;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    // Combine timestamp with atomic counter for guaranteed uniqueness
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

/// A message in flight between two users.
///
/// Exists only for the duration of one relay hop; the router never stores
/// it. History persistence happens on a separate path entirely.
#[derive(Debug, Clone)]
pub struct DirectMessage {
    /// Unique message identifier.
    pub id: MessageId,
    /// Sender user identifier.
    pub from: UserId,
    /// Recipient user identifier.
    pub to: UserId,
    /// Opaque payload; the relay never inspects or transforms it.
    pub body: Bytes,
    /// Timestamp when the message entered the relay, in milliseconds.
    pub timestamp: u64,
}

impl DirectMessage {
    /// Create a new direct message.
    #[must_use]
    pub fn new(from: impl Into<UserId>, to: impl Into<UserId>, body: impl Into<Bytes>) -> Self {
        Self {
            id: generate_message_id(),
            from: from.into(),
            to: to.into(),
            body: body.into(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_millis() as u64,
        }
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn body_size(&self) -> usize {
        self.body.len()
    }
}

/// An event delivered to a connection handler.
#[derive(Debug, Clone)]
pub enum Event {
    /// The set of currently online users changed.
    Roster(Vec<UserId>),
    /// A payload relayed to this connection's user.
    Direct(DirectMessage),
}
