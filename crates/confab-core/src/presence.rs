//! Presence tracking for Confab.
//!
//! The registry maps stable user identifiers to live connection
//! identifiers. It is a bidirectional mapping so that a disconnect, which
//! only knows its connection id, resolves in O(1) instead of scanning
//! every entry.

use std::collections::HashMap;
use tracing::debug;

/// A stable user identifier, opaque to the relay.
pub type UserId = String;

/// Maximum user identifier length.
pub const MAX_USER_ID_LENGTH: usize = 128;

/// Validate a user identifier.
///
/// # Errors
///
/// Returns an error message if the identifier is invalid.
pub fn validate_user_id(user: &str) -> Result<(), &'static str> {
    if user.is_empty() {
        return Err("User id cannot be empty");
    }
    if user.len() > MAX_USER_ID_LENGTH {
        return Err("User id too long");
    }
    if !user.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("User id contains invalid characters");
    }
    Ok(())
}

/// Process-wide table of currently connected, identified users.
///
/// Invariant: at most one connection per user (last writer wins), and at
/// most one user per connection. The registry holds plain mutable state;
/// callers serialize access (see [`crate::relay::RelayRouter`], which
/// guards it with a single mutex).
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// user id -> live connection id.
    by_user: HashMap<UserId, String>,
    /// connection id -> user id, for O(1) disconnect.
    by_connection: HashMap<String, UserId>,
}

impl PresenceRegistry {
    /// Create a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of registered users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.by_user.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    /// Check if a user is currently registered.
    #[must_use]
    pub fn is_online(&self, user: &str) -> bool {
        self.by_user.contains_key(user)
    }

    /// Get the live connection id for a user.
    #[must_use]
    pub fn connection_for(&self, user: &str) -> Option<&str> {
        self.by_user.get(user).map(String::as_str)
    }

    /// Get the user registered on a connection.
    #[must_use]
    pub fn user_for(&self, connection_id: &str) -> Option<&str> {
        self.by_connection.get(connection_id).map(String::as_str)
    }

    /// Register a user on a connection, overwriting any existing mapping.
    ///
    /// Last writer wins: if the user was already registered on another
    /// connection, that connection is superseded and its id is returned so
    /// the caller can treat it as orphaned. A connection that re-identifies
    /// as a different user releases the user it held before.
    pub fn register(
        &mut self,
        user: impl Into<UserId>,
        connection_id: impl Into<String>,
    ) -> Option<String> {
        let user = user.into();
        let connection_id = connection_id.into();

        // A connection re-identifying as a different user releases the
        // user it previously carried, keeping both maps in step.
        if let Some(old_user) = self.by_connection.get(&connection_id) {
            if *old_user != user {
                let old_user = old_user.clone();
                self.by_user.remove(&old_user);
                debug!(user = %old_user, connection = %connection_id, "Presence: released on re-identify");
            }
        }

        let previous = self.by_user.insert(user.clone(), connection_id.clone());
        if let Some(prev) = &previous {
            self.by_connection.remove(prev);
        }
        self.by_connection.insert(connection_id.clone(), user.clone());

        debug!(user = %user, connection = %connection_id, "Presence: registered");

        previous.filter(|prev| *prev != connection_id)
    }

    /// Unregister whatever user is registered on a connection.
    ///
    /// Returns the user id if the connection was the live mapping for a
    /// user; `None` otherwise. A disconnect for a connection that has
    /// already been superseded by a re-registration is a no-op, so a late
    /// disconnect from a stale connection never evicts the live one.
    pub fn unregister(&mut self, connection_id: &str) -> Option<UserId> {
        let user = self.by_connection.remove(connection_id)?;
        self.by_user.remove(&user);
        debug!(user = %user, connection = %connection_id, "Presence: unregistered");
        Some(user)
    }

    /// Point-in-time view of all registered user identifiers.
    ///
    /// Order is not meaningful beyond display.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UserId> {
        self.by_user.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn snapshot_set(registry: &PresenceRegistry) -> HashSet<String> {
        registry.snapshot().into_iter().collect()
    }

    #[test]
    fn test_register_unregister() {
        let mut registry = PresenceRegistry::new();

        assert!(registry.register("alice", "conn-1").is_none());
        assert!(registry.is_online("alice"));
        assert_eq!(registry.connection_for("alice"), Some("conn-1"));
        assert_eq!(registry.user_for("conn-1"), Some("alice"));
        assert_eq!(registry.count(), 1);

        assert_eq!(registry.unregister("conn-1"), Some("alice".to_string()));
        assert!(!registry.is_online("alice"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_unknown_connection_is_noop() {
        let mut registry = PresenceRegistry::new();
        registry.register("alice", "conn-1");

        assert_eq!(registry.unregister("conn-99"), None);
        assert!(registry.is_online("alice"));
    }

    #[test]
    fn test_last_writer_wins() {
        let mut registry = PresenceRegistry::new();

        registry.register("alice", "conn-1");
        let orphaned = registry.register("alice", "conn-2");

        assert_eq!(orphaned, Some("conn-1".to_string()));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.connection_for("alice"), Some("conn-2"));
        // The superseded connection no longer resolves to anyone
        assert_eq!(registry.user_for("conn-1"), None);
    }

    #[test]
    fn test_reregister_same_connection() {
        let mut registry = PresenceRegistry::new();

        registry.register("alice", "conn-1");
        // Re-identifying on the same connection orphans nothing
        assert!(registry.register("alice", "conn-1").is_none());
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.user_for("conn-1"), Some("alice"));
    }

    #[test]
    fn test_reidentify_as_different_user() {
        let mut registry = PresenceRegistry::new();

        registry.register("alice", "conn-1");
        registry.register("bob", "conn-1");

        // The connection now carries bob and nobody else
        assert_eq!(registry.count(), 1);
        assert!(!registry.is_online("alice"));
        assert!(registry.is_online("bob"));
        assert_eq!(registry.user_for("conn-1"), Some("bob"));

        assert_eq!(registry.unregister("conn-1"), Some("bob".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_disconnect_after_reconnect() {
        // alice registers on conn-1, reconnects on conn-2, then the delayed
        // disconnect for conn-1 arrives. With the bidirectional mapping the
        // stale disconnect is a no-op and alice stays online on conn-2.
        let mut registry = PresenceRegistry::new();

        registry.register("alice", "conn-1");
        registry.register("alice", "conn-2");

        assert_eq!(registry.unregister("conn-1"), None);
        assert!(registry.is_online("alice"));
        assert_eq!(registry.connection_for("alice"), Some("conn-2"));

        assert_eq!(registry.unregister("conn-2"), Some("alice".to_string()));
        assert!(!registry.is_online("alice"));
    }

    #[test]
    fn test_snapshot_reflects_operation_sequence() {
        let mut registry = PresenceRegistry::new();

        registry.register("alice", "conn-1");
        registry.register("bob", "conn-2");
        registry.register("carol", "conn-3");
        registry.unregister("conn-2");
        registry.register("dave", "conn-4");
        registry.register("alice", "conn-5"); // reconnect
        registry.unregister("conn-1"); // stale, no-op

        let expected: HashSet<String> = ["alice", "carol", "dave"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(snapshot_set(&registry), expected);
    }

    #[test]
    fn test_registry_size_bound() {
        let mut registry = PresenceRegistry::new();

        // Repeated re-registrations never grow the registry past the number
        // of distinct users
        for i in 0..10 {
            registry.register("alice", format!("conn-{i}"));
            registry.register("bob", format!("conn-b{i}"));
        }
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_validate_user_id() {
        assert!(validate_user_id("alice").is_ok());
        assert!(validate_user_id("668be0183ba4bebecda869fa").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("\u{1}bad").is_err());

        let long = "a".repeat(MAX_USER_ID_LENGTH + 1);
        assert!(validate_user_id(&long).is_err());
    }
}
