//! Where per-row keys live.
//!
//! A key store maps record identities to key material. It is only ever read
//! and appended to: entries are never updated or deleted by this crate.
//!
//! `set_if_absent` must be atomic at the store. Two resolvers racing to
//! mint a key for the same new record rely on it to agree on one key; a
//! store that cannot guarantee it will let a row be encrypted under two
//! different keys.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, RowvaultError};
use crate::keys::{KeyMaterial, RecordId};

/// A keyed store of per-row key material.
pub trait KeyStore: Send + Sync {
    /// Look up the key persisted for `record_id`, if any.
    fn get(&self, record_id: &RecordId) -> Result<Option<KeyMaterial>>;

    /// Persist `key` for `record_id` only if no key exists yet.
    ///
    /// Returns `true` if this call stored the key, `false` if another
    /// writer got there first.
    fn set_if_absent(&self, record_id: &RecordId, key: &KeyMaterial) -> Result<bool>;
}

impl<S: KeyStore + ?Sized> KeyStore for Arc<S> {
    fn get(&self, record_id: &RecordId) -> Result<Option<KeyMaterial>> {
        (**self).get(record_id)
    }

    fn set_if_absent(&self, record_id: &RecordId, key: &KeyMaterial) -> Result<bool> {
        (**self).set_if_absent(record_id, key)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A process-local key store. Useful for tests and single-process tools.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<RecordId, KeyMaterial>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, record_id: &RecordId) -> Result<Option<KeyMaterial>> {
        Ok(self.entries.lock().get(record_id).cloned())
    }

    fn set_if_absent(&self, record_id: &RecordId, key: &KeyMaterial) -> Result<bool> {
        let mut entries = self.entries.lock();
        if entries.contains_key(record_id) {
            return Ok(false);
        }
        entries.insert(record_id.clone(), key.clone());
        Ok(true)
    }
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStore")
            .field("entries", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

/// A key store persisted in a SQLite table.
///
/// Several `SqliteKeyStore`s (in one process or many) may open the same
/// file. The conditional insert is a single statement, so SQLite's write
/// lock makes it atomic across all of them.
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteKeyStore {
    /// How long a writer waits on another connection's lock.
    const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    pub const DEFAULT_TABLE: &'static str = "key_store";

    /// Open (creating if needed) a key store file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, Self::DEFAULT_TABLE)
    }

    /// A private in-memory store; mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, Self::DEFAULT_TABLE)
    }

    /// Wrap an existing connection, storing keys in `table`.
    ///
    /// `table` must be a plain identifier; it is interpolated into SQL.
    pub fn with_connection(conn: Connection, table: &str) -> Result<Self> {
        if !crate::config::is_identifier(table) {
            return Err(RowvaultError::Config(format!(
                "invalid key store table name: {}",
                table
            )));
        }
        conn.busy_timeout(Self::BUSY_TIMEOUT)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (id TEXT PRIMARY KEY, key TEXT NOT NULL);"
        ))?;

        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        })
    }
}

impl KeyStore for SqliteKeyStore {
    fn get(&self, record_id: &RecordId) -> Result<Option<KeyMaterial>> {
        let conn = self.conn.lock();
        let stored: Option<String> = conn
            .query_row(
                &format!("SELECT key FROM {} WHERE id = ?1", self.table),
                params![record_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        stored.map(KeyMaterial::parse).transpose()
    }

    fn set_if_absent(&self, record_id: &RecordId, key: &KeyMaterial) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "INSERT INTO {} (id, key) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING",
                self.table
            ),
            params![record_id.as_str(), key.expose()],
        )?;
        Ok(changed == 1)
    }
}

impl std::fmt::Debug for SqliteKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKeyStore")
            .field("table", &self.table)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;

    #[test]
    fn test_memory_store_sets_once() {
        let store = MemoryKeyStore::new();
        let id = RecordId::from("row-1");
        let first = generate_key().unwrap();
        let second = generate_key().unwrap();

        assert_eq!(store.get(&id).unwrap(), None);
        assert!(store.set_if_absent(&id, &first).unwrap());
        assert!(!store.set_if_absent(&id, &second).unwrap());
        assert_eq!(store.get(&id).unwrap(), Some(first));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sqlite_store_sets_once() {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        let id = RecordId::from("row-1");
        let first = generate_key().unwrap();
        let second = generate_key().unwrap();

        assert_eq!(store.get(&id).unwrap(), None);
        assert!(store.set_if_absent(&id, &first).unwrap());
        assert!(!store.set_if_absent(&id, &second).unwrap());
        assert_eq!(store.get(&id).unwrap(), Some(first));
    }

    #[test]
    fn test_sqlite_store_rejects_corrupt_key_text() {
        let conn = Connection::open_in_memory().unwrap();
        let store = SqliteKeyStore::with_connection(conn, "keys").unwrap();
        store
            .conn
            .lock()
            .execute("INSERT INTO keys (id, key) VALUES ('r', 'garbage')", [])
            .unwrap();

        assert!(matches!(
            store.get(&RecordId::from("r")),
            Err(RowvaultError::InvalidKey)
        ));
    }

    #[test]
    fn test_sqlite_store_rejects_bad_table_name() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(SqliteKeyStore::with_connection(conn, "keys; DROP TABLE x").is_err());
    }
}
