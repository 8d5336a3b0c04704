//! Durable key-value blob capability.
//!
//! The conversation store only ever reads or replaces whole documents, so
//! the storage seam is deliberately narrow: read a blob, overwrite a blob,
//! remove a blob. A write either lands completely or not at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::OptionalExtension;
use tracing::debug;

use codescope_core::error::CodeScopeError;

use crate::db::Database;

/// Durable storage for named text blobs.
pub trait BlobStorage: Send + Sync {
    /// Read the blob stored under `key`, if any.
    fn read_blob(&self, key: &str) -> Result<Option<String>, CodeScopeError>;

    /// Replace the blob stored under `key`.
    fn write_blob(&self, key: &str, value: &str) -> Result<(), CodeScopeError>;

    /// Remove the blob stored under `key`. Missing keys are not an error.
    fn remove_blob(&self, key: &str) -> Result<(), CodeScopeError>;
}

// =============================================================================
// SQLite
// =============================================================================

/// Blob storage backed by the `kv_store` table.
pub struct SqliteBlobStorage {
    db: Arc<Database>,
}

impl SqliteBlobStorage {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl BlobStorage for SqliteBlobStorage {
    fn read_blob(&self, key: &str) -> Result<Option<String>, CodeScopeError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| CodeScopeError::Storage(format!("Failed to read '{}': {}", key, e)))
        })
    }

    fn write_blob(&self, key: &str, value: &str) -> Result<(), CodeScopeError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                rusqlite::params![key, value],
            )
            .map_err(|e| CodeScopeError::Storage(format!("Failed to write '{}': {}", key, e)))?;
            debug!(key, bytes = value.len(), "Blob written");
            Ok(())
        })
    }

    fn remove_blob(&self, key: &str) -> Result<(), CodeScopeError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM kv_store WHERE key = ?1", rusqlite::params![key])
                .map_err(|e| {
                    CodeScopeError::Storage(format!("Failed to remove '{}': {}", key, e))
                })?;
            Ok(())
        })
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local blob storage for tests and ephemeral sessions.
///
/// Counts successful writes per key and can be switched into a failing mode
/// to exercise error paths.
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: Mutex<HashMap<String, String>>,
    writes: Mutex<HashMap<String, usize>>,
    fail_writes: AtomicBool,
    fail_removes: AtomicBool,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes to `key` so far.
    pub fn write_count(&self, key: &str) -> usize {
        self.writes
            .lock()
            .map(|w| w.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Keys currently holding a blob, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .blobs
            .lock()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent remove fail (or succeed again).
    pub fn set_fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    fn lock_blobs(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, CodeScopeError> {
        self.blobs
            .lock()
            .map_err(|e| CodeScopeError::Storage(format!("blob lock poisoned: {}", e)))
    }
}

impl BlobStorage for MemoryBlobStorage {
    fn read_blob(&self, key: &str) -> Result<Option<String>, CodeScopeError> {
        Ok(self.lock_blobs()?.get(key).cloned())
    }

    fn write_blob(&self, key: &str, value: &str) -> Result<(), CodeScopeError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CodeScopeError::Storage(format!(
                "write to '{}' rejected",
                key
            )));
        }
        self.lock_blobs()?.insert(key.to_string(), value.to_string());
        if let Ok(mut writes) = self.writes.lock() {
            *writes.entry(key.to_string()).or_default() += 1;
        }
        Ok(())
    }

    fn remove_blob(&self, key: &str) -> Result<(), CodeScopeError> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(CodeScopeError::Storage(format!(
                "remove of '{}' rejected",
                key
            )));
        }
        self.lock_blobs()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_storage() -> SqliteBlobStorage {
        SqliteBlobStorage::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_sqlite_read_missing_is_none() {
        let storage = sqlite_storage();
        assert_eq!(storage.read_blob("nope").unwrap(), None);
    }

    #[test]
    fn test_sqlite_write_then_overwrite() {
        let storage = sqlite_storage();
        storage.write_blob("k", "first").unwrap();
        storage.write_blob("k", "second").unwrap();
        assert_eq!(storage.read_blob("k").unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_sqlite_remove() {
        let storage = sqlite_storage();
        storage.write_blob("k", "v").unwrap();
        storage.remove_blob("k").unwrap();
        storage.remove_blob("k").unwrap();
        assert_eq!(storage.read_blob("k").unwrap(), None);
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codescope.db");
        {
            let storage = SqliteBlobStorage::new(Arc::new(Database::new(&path).unwrap()));
            storage.write_blob("active_conversation_id", "c1").unwrap();
        }
        let storage = SqliteBlobStorage::new(Arc::new(Database::new(&path).unwrap()));
        assert_eq!(
            storage.read_blob("active_conversation_id").unwrap().as_deref(),
            Some("c1")
        );
    }

    #[test]
    fn test_memory_counts_writes_per_key() {
        let storage = MemoryBlobStorage::new();
        storage.write_blob("a", "1").unwrap();
        storage.write_blob("a", "2").unwrap();
        storage.write_blob("b", "1").unwrap();
        assert_eq!(storage.write_count("a"), 2);
        assert_eq!(storage.write_count("b"), 1);
        assert_eq!(storage.write_count("c"), 0);
    }

    #[test]
    fn test_memory_failing_writes_keep_previous_value() {
        let storage = MemoryBlobStorage::new();
        storage.write_blob("a", "kept").unwrap();
        storage.set_fail_writes(true);
        assert!(matches!(
            storage.write_blob("a", "lost"),
            Err(CodeScopeError::Storage(_))
        ));
        assert_eq!(storage.read_blob("a").unwrap().as_deref(), Some("kept"));
        assert_eq!(storage.write_count("a"), 1);

        storage.set_fail_writes(false);
        storage.write_blob("a", "new").unwrap();
        assert_eq!(storage.read_blob("a").unwrap().as_deref(), Some("new"));
    }
}
