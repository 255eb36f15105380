//! Per-seed context persistence
//!
//! Contexts are JSON blobs keyed by the SHA-256 of the seed. The store is an
//! explicitly constructed object handed to whoever needs it; there is no
//! process-wide instance.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::paths::seed_hash;
use crate::types::SeedContext;

/// A key → JSON blob store.
pub trait ContextBackend: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, seed: &str, data: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<bool>;
    /// Seeds of every stored record
    fn seeds(&self) -> Result<Vec<String>>;
}

/// SQLite-backed store (the default on disk).
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("context database lock poisoned".into()))
    }
}

impl ContextBackend for SqliteBackend {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let data = conn
            .query_row("SELECT data FROM contexts WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(data)
    }

    fn save(&self, key: &str, seed: &str, data: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO contexts (key, seed, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![key, seed, data, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM contexts WHERE key = ?1", [key])?;
        Ok(removed > 0)
    }

    fn seeds(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT seed FROM contexts ORDER BY seed")?;
        let seeds = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(seeds)
    }
}

/// Volatile store, used by tests and embedders that do not persist.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, (String, String)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, String)>>> {
        self.records
            .lock()
            .map_err(|_| Error::Other("context map lock poisoned".into()))
    }
}

impl ContextBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records()?.get(key).map(|(_, data)| data.clone()))
    }

    fn save(&self, key: &str, seed: &str, data: &str) -> Result<()> {
        self.records()?
            .insert(key.to_string(), (seed.to_string(), data.to_string()));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.records()?.remove(key).is_some())
    }

    fn seeds(&self) -> Result<Vec<String>> {
        let mut seeds: Vec<String> = self.records()?.values().map(|(s, _)| s.clone()).collect();
        seeds.sort();
        Ok(seeds)
    }
}

/// Loads and saves `SeedContext` records.
pub struct ContextStore {
    backend: Box<dyn ContextBackend>,
}

impl ContextStore {
    pub fn new(backend: impl ContextBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Open the SQLite store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(SqliteBackend::open(path)?))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Load a seed's context, materializing a default one if none is stored.
    ///
    /// An unreadable record is replaced by a fresh default.
    pub fn load(&self, seed: &str) -> Result<SeedContext> {
        let key = seed_hash(seed);
        let Some(data) = self.backend.load(&key)? else {
            debug!("No stored context, starting fresh");
            return Ok(SeedContext::new(seed));
        };

        match serde_json::from_str::<SeedContext>(&data) {
            Ok(ctx) if ctx.seed == seed => Ok(ctx),
            Ok(_) => {
                warn!("Stored context belongs to another seed, starting fresh");
                Ok(SeedContext::new(seed))
            }
            Err(e) => {
                warn!("Discarding unreadable context: {}", e);
                Ok(SeedContext::new(seed))
            }
        }
    }

    pub fn save(&self, ctx: &SeedContext) -> Result<()> {
        let data = serde_json::to_string(ctx)?;
        self.backend.save(&seed_hash(&ctx.seed), &ctx.seed, &data)
    }

    pub fn delete(&self, seed: &str) -> Result<bool> {
        self.backend.delete(&seed_hash(seed))
    }

    pub fn seeds(&self) -> Result<Vec<String>> {
        self.backend.seeds()
    }

    /// Serialized form of a context, as produced for `export`.
    pub fn export(ctx: &SeedContext) -> Result<String> {
        Ok(serde_json::to_string_pretty(ctx)?)
    }

    /// Parse exported data for `seed`.
    ///
    /// # Errors
    /// `Error::SeedMismatch` if the data belongs to another seed; the record is
    /// never merged.
    pub fn import(seed: &str, data: &str) -> Result<SeedContext> {
        let ctx: SeedContext = serde_json::from_str(data)
            .map_err(|e| Error::Validation(format!("Invalid context data: {}", e)))?;
        if ctx.seed != seed {
            return Err(Error::SeedMismatch);
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> Vec<ContextStore> {
        vec![
            ContextStore::in_memory(),
            ContextStore::new(SqliteBackend::open_in_memory().unwrap()),
        ]
    }

    #[test]
    fn test_load_defaults_when_absent() {
        for store in stores() {
            let ctx = store.load("abc").unwrap();
            assert_eq!(ctx.seed, "abc");
            assert!(!ctx.connected);
            assert!(store.seeds().unwrap().is_empty(), "load must not persist");
        }
    }

    #[test]
    fn test_save_then_load() {
        for store in stores() {
            let mut ctx = store.load("abc").unwrap();
            ctx.connected = true;
            ctx.user = Some("alice".to_string());
            ctx.record_command("connect", serde_json::json!({}));
            store.save(&ctx).unwrap();

            let loaded = store.load("abc").unwrap();
            assert_eq!(loaded, ctx);
            assert_eq!(store.seeds().unwrap(), vec!["abc".to_string()]);

            assert!(store.delete("abc").unwrap());
            assert!(!store.delete("abc").unwrap());
        }
    }

    #[test]
    fn test_corrupt_record_is_replaced() {
        let backend = MemoryBackend::new();
        backend.save(&seed_hash("abc"), "abc", "{not json").unwrap();
        let store = ContextStore::new(backend);

        let ctx = store.load("abc").unwrap();
        assert_eq!(ctx.seed, "abc");
        assert!(!ctx.connected);
    }

    #[test]
    fn test_sqlite_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contexts.db");

        let mut ctx = SeedContext::new("abc");
        ctx.serving = true;
        ctx.server_port = Some(9042);
        ContextStore::open(&path).unwrap().save(&ctx).unwrap();

        let loaded = ContextStore::open(&path).unwrap().load("abc").unwrap();
        assert_eq!(loaded, ctx);
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut ctx = SeedContext::new("abc");
        ctx.connected = true;
        ctx.hyperssh_seed = Some("remote".to_string());
        ctx.user = Some("alice".to_string());
        ctx.record_command("send", serde_json::json!({"text": "ls"}));

        let data = ContextStore::export(&ctx).unwrap();
        let imported = ContextStore::import("abc", &data).unwrap();
        assert_eq!(imported, ctx);
    }

    #[test]
    fn test_import_into_other_seed_fails() {
        let data = ContextStore::export(&SeedContext::new("abc")).unwrap();
        let result = ContextStore::import("xyz", &data);
        assert!(matches!(result, Err(Error::SeedMismatch)));
    }

    #[test]
    fn test_import_garbage_is_validation_error() {
        let result = ContextStore::import("abc", "garbage");
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
