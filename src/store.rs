// Cached token persistence
// A small key-value region with per-key storage expiration, holding the
// single token record. The storage TTL is advisory and independent of the
// expiration field inside the record.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Store key under which the single cached token record lives
pub const TOKEN_KEY: &str = "oauth_token";

/// The sole persisted entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Opaque bearer string
    pub access_token: String,
    /// Absolute expiration in milliseconds since epoch, exactly as
    /// communicated by the issuer (the read-time buffer is not applied here)
    pub expires_at: i64,
}

/// Durable key-value store for token records
pub trait TokenStore: Send + Sync {
    /// Returns the record, or `None` if the key is missing or its storage
    /// TTL has elapsed
    fn get(&self, key: &str) -> Result<Option<TokenRecord>>;

    /// Writes the record with a storage-level TTL in seconds, replacing any
    /// previous value
    fn put(&self, key: &str, record: &TokenRecord, ttl_seconds: u64) -> Result<()>;

    /// Removes the record; removing an absent key is not an error
    fn delete(&self, key: &str) -> Result<()>;
}

/// SQLite-backed token store
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
}

impl SqliteTokenStore {
    /// Open (or create) the store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open token store: {}", path.display()))?;
        Self::init(conn)
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("Failed to open in-memory store")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tokens (
                key TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                store_expires_at INTEGER NOT NULL
            )",
            [],
        )
        .context("Failed to initialize token store schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Token store lock poisoned"))
    }
}

impl TokenStore for SqliteTokenStore {
    fn get(&self, key: &str) -> Result<Option<TokenRecord>> {
        let conn = self.lock()?;

        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT record, store_expires_at FROM tokens WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to read token record")?;

        match row {
            Some((_, deadline)) if deadline <= Utc::now().timestamp_millis() => {
                // Reap rows past their storage deadline lazily
                let _ = conn.execute("DELETE FROM tokens WHERE key = ?1", params![key]);
                Ok(None)
            }
            Some((json, _)) => Ok(Some(
                serde_json::from_str(&json).context("Malformed token record")?,
            )),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, record: &TokenRecord, ttl_seconds: u64) -> Result<()> {
        let deadline = Utc::now().timestamp_millis() + ttl_seconds as i64 * 1000;
        let json = serde_json::to_string(record).context("Failed to serialize token record")?;

        self.lock()?
            .execute(
                "INSERT INTO tokens (key, record, store_expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     record = excluded.record,
                     store_expires_at = excluded.store_expires_at",
                params![key, json, deadline],
            )
            .context("Failed to write token record")?;

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock()?
            .execute("DELETE FROM tokens WHERE key = ?1", params![key])
            .context("Failed to delete token record")?;

        Ok(())
    }
}

/// Process-local token store
///
/// Used when no database path is configured, and as the store double in
/// tests.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: DashMap<String, StoredEntry>,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    record: TokenRecord,
    store_expires_at: i64,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage deadline for a key in milliseconds since epoch, if present
    #[allow(dead_code)]
    pub fn storage_deadline(&self, key: &str) -> Option<i64> {
        self.entries.get(key).map(|entry| entry.store_expires_at)
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<TokenRecord>> {
        let now = Utc::now().timestamp_millis();

        match self.entries.get(key) {
            Some(entry) if entry.store_expires_at > now => return Ok(Some(entry.record.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        self.entries.remove(key);
        Ok(None)
    }

    fn put(&self, key: &str, record: &TokenRecord, ttl_seconds: u64) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                record: record.clone(),
                store_expires_at: Utc::now().timestamp_millis() + ttl_seconds as i64 * 1000,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
