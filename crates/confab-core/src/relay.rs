//! Relay routing for Confab.
//!
//! The router owns the presence registry and the set of attached
//! connections, and forwards point-to-point payloads between them on a
//! best-effort, at-most-once basis.

use crate::event::{DirectMessage, Event};
use crate::presence::{validate_user_id, PresenceRegistry, UserId};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Router errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Invalid user identifier.
    #[error("Invalid user id: {0}")]
    InvalidUser(&'static str),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    AtCapacity,

    /// Connection is not attached to the router.
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum number of attached connections.
    pub max_connections: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
        }
    }
}

/// The central relay router.
///
/// Connections attach on transport connect, identify with a user id, and
/// detach on disconnect. Register/unregister/snapshot are atomic with
/// respect to each other: the registry sits behind a single mutex, as the
/// bidirectional mapping must never be observed half-updated.
pub struct RelayRouter {
    /// User presence, guarded as one unit.
    registry: Mutex<PresenceRegistry>,
    /// Delivery channels for attached connections (identified or not).
    connections: DashMap<String, mpsc::UnboundedSender<Event>>,
    /// Configuration.
    config: RelayConfig,
}

impl RelayRouter {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RelayConfig) -> Self {
        info!("Creating relay router with config: {:?}", config);
        Self {
            registry: Mutex::new(PresenceRegistry::new()),
            connections: DashMap::new(),
            config,
        }
    }

    fn registry(&self) -> MutexGuard<'_, PresenceRegistry> {
        // Registry ops never panic while holding the lock; recover anyway
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            connection_count: self.connections.len(),
            online_count: self.registry().count(),
        }
    }

    /// Attach a connection to the router.
    ///
    /// Returns the receiver on which the connection handler will get
    /// roster broadcasts and relayed payloads. No roster is sent at this
    /// point: a connection only becomes visible to peers once it
    /// identifies.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection limit is reached.
    pub fn attach(
        &self,
        connection_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<Event>, RelayError> {
        if self.connections.len() >= self.config.max_connections {
            return Err(RelayError::AtCapacity);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(connection_id.to_string(), tx);

        debug!(connection = %connection_id, "Connection attached");
        Ok(rx)
    }

    /// Identify a connection with a stable user id.
    ///
    /// Registers the user (last writer wins) and broadcasts the updated
    /// roster to every attached connection. Re-identifying from a new
    /// connection supersedes the old one, which is left attached but
    /// unreachable until its own disconnect arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the user id is invalid or the connection is
    /// not attached.
    pub fn identify(&self, connection_id: &str, user: &str) -> Result<(), RelayError> {
        validate_user_id(user).map_err(RelayError::InvalidUser)?;

        if !self.connections.contains_key(connection_id) {
            return Err(RelayError::UnknownConnection(connection_id.to_string()));
        }

        let orphaned = self.registry().register(user, connection_id);
        if let Some(stale) = orphaned {
            debug!(user = %user, stale_connection = %stale, "Re-identified; previous connection superseded");
        }

        info!(user = %user, connection = %connection_id, "User identified");
        self.broadcast_roster();
        Ok(())
    }

    /// Detach a connection on disconnect.
    ///
    /// If the connection was the live mapping for a user, that user goes
    /// offline and the roster is re-broadcast. A stale disconnect for a
    /// superseded connection removes only the delivery channel.
    pub fn detach(&self, connection_id: &str) {
        self.connections.remove(connection_id);

        let departed = self.registry().unregister(connection_id);
        debug!(connection = %connection_id, "Connection detached");

        if let Some(user) = departed {
            info!(user = %user, connection = %connection_id, "User went offline");
            self.broadcast_roster();
        }
    }

    /// Relay an opaque payload from one user to another.
    ///
    /// Fire-and-forget: if the recipient is online, exactly one
    /// [`Event::Direct`] is sent to their current connection with the body
    /// unchanged; if not, the payload is dropped without any error
    /// surfaced to the sender. Returns whether a delivery was handed off,
    /// for observability only.
    pub fn relay(&self, from: &str, to: &str, body: impl Into<Bytes>) -> bool {
        let target = self.registry().connection_for(to).map(str::to_string);

        let Some(connection_id) = target else {
            debug!(from = %from, to = %to, "Recipient offline, dropping payload");
            return false;
        };

        match self.connections.get(&connection_id) {
            Some(tx) => {
                let message = DirectMessage::new(from, to, body);
                trace!(from = %from, to = %to, connection = %connection_id, "Relaying payload");
                tx.send(Event::Direct(message)).is_ok()
            }
            None => {
                // Registry and connection set are updated on different
                // locks; a disconnect can race in between.
                warn!(to = %to, connection = %connection_id, "Registry points at detached connection");
                false
            }
        }
    }

    /// Check if a user is currently online.
    #[must_use]
    pub fn is_online(&self, user: &str) -> bool {
        self.registry().is_online(user)
    }

    /// Get the number of online (identified) users.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.registry().count()
    }

    /// Point-in-time view of online user identifiers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UserId> {
        self.registry().snapshot()
    }

    /// Send the current roster to every attached connection.
    ///
    /// Unidentified connections receive it too, matching the broadcast
    /// fan-out of the relay endpoint.
    fn broadcast_roster(&self) {
        let users = self.snapshot();
        trace!(online = users.len(), "Broadcasting roster");

        for entry in self.connections.iter() {
            let _ = entry.value().send(Event::Roster(users.clone()));
        }
    }
}

impl Default for RelayRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RelayStats {
    /// Number of attached connections.
    pub connection_count: usize,
    /// Number of identified (online) users.
    pub online_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv_direct(rx: &mut mpsc::UnboundedReceiver<Event>) -> DirectMessage {
        loop {
            match rx.try_recv() {
                Ok(Event::Direct(msg)) => return msg,
                Ok(Event::Roster(_)) => continue,
                Err(e) => panic!("expected a delivery, got {e:?}"),
            }
        }
    }

    fn last_roster(rx: &mut mpsc::UnboundedReceiver<Event>) -> Option<Vec<String>> {
        let mut roster = None;
        while let Ok(event) = rx.try_recv() {
            if let Event::Roster(users) = event {
                roster = Some(users);
            }
        }
        roster
    }

    #[test]
    fn test_attach_identify_detach() {
        let router = RelayRouter::new();

        let mut rx = router.attach("conn-1").unwrap();
        assert_eq!(router.stats().connection_count, 1);
        assert_eq!(router.online_count(), 0);

        router.identify("conn-1", "alice").unwrap();
        assert!(router.is_online("alice"));
        assert_eq!(last_roster(&mut rx), Some(vec!["alice".to_string()]));

        router.detach("conn-1");
        assert!(!router.is_online("alice"));
        assert_eq!(router.stats().connection_count, 0);
    }

    #[test]
    fn test_relay_between_identified_users() {
        let router = RelayRouter::new();

        let _rx_a = router.attach("conn-1").unwrap();
        let mut rx_b = router.attach("conn-2").unwrap();
        router.identify("conn-1", "alice").unwrap();
        router.identify("conn-2", "bob").unwrap();

        assert!(router.relay("alice", "bob", b"hello".to_vec()));

        let msg = recv_direct(&mut rx_b);
        assert_eq!(msg.from, "alice");
        assert_eq!(msg.to, "bob");
        assert_eq!(&msg.body[..], b"hello");

        // Exactly one delivery
        assert!(matches!(
            rx_b.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn test_relay_to_offline_user_is_silent() {
        let router = RelayRouter::new();

        let mut rx_a = router.attach("conn-1").unwrap();
        router.identify("conn-1", "alice").unwrap();
        let _ = last_roster(&mut rx_a);

        // carol never identified anywhere; nothing is delivered, nothing
        // comes back to the sender
        assert!(!router.relay("alice", "carol", b"hello".to_vec()));
        assert!(matches!(
            rx_a.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn test_relay_follows_reconnect() {
        let router = RelayRouter::new();

        let _rx_sender = router.attach("conn-0").unwrap();
        router.identify("conn-0", "alice").unwrap();

        let mut rx_old = router.attach("conn-1").unwrap();
        router.identify("conn-1", "bob").unwrap();

        // bob reconnects on a new connection before the old one drops
        let mut rx_new = router.attach("conn-2").unwrap();
        router.identify("conn-2", "bob").unwrap();

        // The delayed disconnect of the stale connection must not take
        // bob offline
        router.detach("conn-1");
        assert!(router.is_online("bob"));

        assert!(router.relay("alice", "bob", b"hi".to_vec()));
        let msg = recv_direct(&mut rx_new);
        assert_eq!(&msg.body[..], b"hi");

        // The orphaned connection got roster updates but no delivery
        while let Ok(event) = rx_old.try_recv() {
            assert!(matches!(event, Event::Roster(_)));
        }
    }

    #[test]
    fn test_reidentify_on_same_connection_replaces_user() {
        let router = RelayRouter::new();

        let mut rx = router.attach("conn-1").unwrap();
        router.identify("conn-1", "alice").unwrap();
        router.identify("conn-1", "bob").unwrap();

        // The roster holds only the latest identity for the connection
        assert_eq!(router.online_count(), 1);
        assert!(!router.is_online("alice"));
        assert!(router.is_online("bob"));
        assert_eq!(last_roster(&mut rx), Some(vec!["bob".to_string()]));

        // And the disconnect takes that identity offline, leaving no ghost
        router.detach("conn-1");
        assert_eq!(router.online_count(), 0);
        assert!(!router.is_online("bob"));
    }

    #[test]
    fn test_roster_broadcast_on_join_and_leave() {
        let router = RelayRouter::new();

        let mut rx_a = router.attach("conn-1").unwrap();
        let mut rx_b = router.attach("conn-2").unwrap();

        // Attaching alone broadcasts nothing
        assert!(last_roster(&mut rx_a).is_none());

        router.identify("conn-1", "alice").unwrap();
        router.identify("conn-2", "bob").unwrap();

        let mut roster = last_roster(&mut rx_a).unwrap();
        roster.sort();
        assert_eq!(roster, vec!["alice".to_string(), "bob".to_string()]);

        router.detach("conn-1");
        assert_eq!(last_roster(&mut rx_b), Some(vec!["bob".to_string()]));
    }

    #[test]
    fn test_identify_requires_attachment() {
        let router = RelayRouter::new();
        assert!(matches!(
            router.identify("conn-1", "alice"),
            Err(RelayError::UnknownConnection(_))
        ));
    }

    #[test]
    fn test_identify_rejects_invalid_user() {
        let router = RelayRouter::new();
        let _rx = router.attach("conn-1").unwrap();

        assert!(matches!(
            router.identify("conn-1", ""),
            Err(RelayError::InvalidUser(_))
        ));
        assert_eq!(router.online_count(), 0);
    }

    #[test]
    fn test_connection_limit() {
        let router = RelayRouter::with_config(RelayConfig { max_connections: 1 });

        let _rx = router.attach("conn-1").unwrap();
        assert!(matches!(
            router.attach("conn-2"),
            Err(RelayError::AtCapacity)
        ));
    }

    #[test]
    fn test_stats() {
        let router = RelayRouter::new();

        let _rx1 = router.attach("conn-1").unwrap();
        let _rx2 = router.attach("conn-2").unwrap();
        router.identify("conn-1", "alice").unwrap();

        let stats = router.stats();
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.online_count, 1);
    }
}
