//! SQLite-backed message history store.
//!
//! Conversations are keyed by the canonical (sorted) participant pair so
//! a lookup matches the full participant set regardless of direction.

use confab_core::history::{now_millis, participant_pair};
use confab_core::{MessageStore, StoreError, StoredMessage};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender TEXT NOT NULL,
    user_a TEXT NOT NULL,
    user_b TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages (user_a, user_b, updated_at);
";

/// SQLite message store.
///
/// A single serialized connection is plenty at chat-history volumes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        debug!("History schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl MessageStore for SqliteStore {
    fn append(
        &self,
        sender: &str,
        recipient: &str,
        body: &str,
    ) -> Result<StoredMessage, StoreError> {
        let [user_a, user_b] = participant_pair(sender, recipient);
        let now = now_millis();

        let conn = self.lock();
        conn.execute(
            "INSERT INTO messages (sender, user_a, user_b, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![sender, user_a, user_b, body, now, now],
        )
        .map_err(backend)?;

        Ok(StoredMessage {
            id: conn.last_insert_rowid() as u64,
            sender: sender.to_string(),
            participants: [user_a, user_b],
            body: body.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    fn list_between(&self, a: &str, b: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let [user_a, user_b] = participant_pair(a, b);

        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, sender, user_a, user_b, body, created_at, updated_at
                 FROM messages
                 WHERE user_a = ?1 AND user_b = ?2
                 ORDER BY updated_at ASC, id ASC",
            )
            .map_err(backend)?;

        let rows = stmt
            .query_map(params![user_a, user_b], |row| {
                Ok(StoredMessage {
                    id: row.get::<_, i64>(0)? as u64,
                    sender: row.get(1)?,
                    participants: [row.get(2)?, row.get(3)?],
                    body: row.get(4)?,
                    created_at: row.get::<_, i64>(5)? as u64,
                    updated_at: row.get::<_, i64>(6)? as u64,
                })
            })
            .map_err(backend)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_list() {
        let store = SqliteStore::open_in_memory().unwrap();

        store.append("alice", "bob", "hi bob").unwrap();
        store.append("bob", "alice", "hi alice").unwrap();
        store.append("alice", "carol", "hi carol").unwrap();

        // Direction of the query does not matter
        let conversation = store.list_between("bob", "alice").unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].sender, "alice");
        assert_eq!(conversation[0].body, "hi bob");
        assert_eq!(conversation[1].sender, "bob");
    }

    #[test]
    fn test_list_empty_conversation() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.list_between("alice", "bob").unwrap().is_empty());
    }

    #[test]
    fn test_ascending_order_is_stable() {
        let store = SqliteStore::open_in_memory().unwrap();

        // Appends within the same millisecond keep insertion order
        for i in 0..5 {
            store.append("alice", "bob", &format!("msg-{i}")).unwrap();
        }

        let conversation = store.list_between("alice", "bob").unwrap();
        let bodies: Vec<&str> = conversation.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.append("alice", "bob", "persisted").unwrap();
        }

        // Reopen and read back
        let store = SqliteStore::open(&path).unwrap();
        let conversation = store.list_between("alice", "bob").unwrap();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation[0].body, "persisted");
    }
}
