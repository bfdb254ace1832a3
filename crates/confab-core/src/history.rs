//! Message history contract for Confab.
//!
//! History is persisted on a request/response path entirely decoupled from
//! the relay: the router never calls the store, and a relayed payload may
//! reach the recipient before, or without, a matching history record.

use crate::presence::UserId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage backend failure.
    #[error("Storage error: {0}")]
    Backend(String),
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Storage-assigned identifier.
    pub id: u64,
    /// User who sent the message.
    pub sender: UserId,
    /// The two conversation participants, in canonical (sorted) order.
    pub participants: [UserId; 2],
    /// Message body.
    pub body: String,
    /// Creation timestamp in milliseconds.
    pub created_at: u64,
    /// Last update timestamp in milliseconds.
    pub updated_at: u64,
}

/// Canonical participant pair for a conversation.
///
/// Sorted so that a conversation is keyed the same way regardless of who
/// queries it.
#[must_use]
pub fn participant_pair(a: &str, b: &str) -> [UserId; 2] {
    if a <= b {
        [a.to_string(), b.to_string()]
    } else {
        [b.to_string(), a.to_string()]
    }
}

/// Current wall-clock time in milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Persistence contract for message history.
///
/// Implementations must return conversations ordered ascending by update
/// time, matched on the full participant set.
pub trait MessageStore: Send + Sync {
    /// Persist a message between two users.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn append(&self, sender: &str, recipient: &str, body: &str)
        -> Result<StoredMessage, StoreError>;

    /// List all messages between two users, ascending by update time.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn list_between(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, StoreError>;
}

/// In-memory message store.
///
/// The default backend when no database path is configured; also the
/// reference implementation for the contract.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<StoredMessage>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Create a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StoredMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageStore for MemoryStore {
    fn append(
        &self,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> Result<StoredMessage, StoreError> {
        let now = now_millis();
        let message = StoredMessage {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            sender: sender.to_string(),
            participants: participant_pair(sender, recipient),
            body: body.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.lock().push(message.clone());
        Ok(message)
    }

    fn list_between(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let pair = participant_pair(a, b);
        let mut messages: Vec<StoredMessage> = self
            .lock()
            .iter()
            .filter(|m| m.participants == pair)
            .cloned()
            .collect();

        messages.sort_by_key(|m| (m.updated_at, m.id));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_pair_is_canonical() {
        assert_eq!(participant_pair("alice", "bob"), participant_pair("bob", "alice"));
        assert_eq!(
            participant_pair("bob", "alice"),
            ["alice".to_string(), "bob".to_string()]
        );
    }

    #[test]
    fn test_append_and_list() {
        let store = MemoryStore::new();

        store.append("alice", "bob", "hi bob").unwrap();
        store.append("bob", "alice", "hi alice").unwrap();
        store.append("alice", "carol", "hi carol").unwrap();

        let conversation = store.list_between("bob", "alice").unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].sender, "alice");
        assert_eq!(conversation[0].body, "hi bob");
        assert_eq!(conversation[1].sender, "bob");

        // Ascending by update time
        assert!(conversation[0].updated_at <= conversation[1].updated_at);
    }

    #[test]
    fn test_list_matches_full_participant_set() {
        let store = MemoryStore::new();

        store.append("alice", "bob", "one").unwrap();

        assert!(store.list_between("alice", "carol").unwrap().is_empty());
        assert_eq!(store.list_between("alice", "bob").unwrap().len(), 1);
    }

    #[test]
    fn test_ids_are_assigned_in_order() {
        let store = MemoryStore::new();

        let m1 = store.append("alice", "bob", "a").unwrap();
        let m2 = store.append("alice", "bob", "b").unwrap();
        assert!(m2.id > m1.id);
    }
}
