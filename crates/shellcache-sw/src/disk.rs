//! On-disk [`CacheStorage`] backed by SQLite.
//!
//! ```text
//! caches          name (PK), created_at
//! cache_entries   (cache_name, method, url) (PK) -> response snapshot
//! ```
//!
//! Every operation is a single statement or a single transaction, so a
//! failed write leaves the database as it was.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use futures::future::BoxFuture;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{now_millis, CacheEntry, CacheError, CacheKey, CacheStorage};

/// File name used by [`DiskCacheStorage::open_dir`].
pub const DATABASE_FILE: &str = "shellcache.db";

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

const ENTRY_COLUMNS: &str =
    "method, url, response_url, status, status_text, headers, body, cached_at";

/// Serde adapter storing raw bytes as base64 strings.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// One header as stored in the `headers` column.
#[derive(Serialize, Deserialize)]
struct StoredHeader(String, #[serde(with = "base64_bytes")] Vec<u8>);

/// Persistent cache storage in a single SQLite database.
pub struct DiskCacheStorage {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl DiskCacheStorage {
    /// Open (creating if needed) `<root>/shellcache.db`.
    pub fn open_dir(root: impl AsRef<Path>) -> Result<Self, CacheError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        Self::open_path(root.join(DATABASE_FILE))
    }

    /// Open (creating if needed) the database at `path`.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        init_schema(&conn)?;
        debug!(path = %path.display(), "Opened cache database");

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    fn create_cache(&self, name: &str) -> Result<bool, CacheError> {
        let conn = self.connection()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
            params![name, now_millis() as i64],
        )?;
        Ok(inserted > 0)
    }

    fn has_cache(&self, name: &str) -> Result<bool, CacheError> {
        let conn = self.connection()?;
        cache_exists(&conn, name)
    }

    fn delete_cache(&self, name: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let entries = tx.execute("DELETE FROM cache_entries WHERE cache_name = ?1", params![name])?;
        let deleted = tx.execute("DELETE FROM caches WHERE name = ?1", params![name])?;
        tx.commit()?;
        if deleted > 0 {
            debug!(cache = %name, entries, "Deleted cache");
        }
        Ok(deleted > 0)
    }

    fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn find_entry(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let conn = self.connection()?;
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM cache_entries
                     WHERE cache_name = ?1 AND method = ?2 AND url = ?3"
                ),
                params![name, key.method, key.url],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn insert_entries(&self, name: &str, entries: &[CacheEntry]) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        if !cache_exists(&tx, name)? {
            return Err(CacheError::NotFound(name.to_string()));
        }
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR REPLACE INTO cache_entries (cache_name, {ENTRY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ))?;
            for entry in entries {
                stmt.execute(params![
                    name,
                    entry.key.method,
                    entry.key.url,
                    entry.url,
                    entry.status,
                    entry.status_text,
                    encode_headers(&entry.headers)?,
                    entry.body,
                    entry.cached_at as i64,
                ])?;
            }
        }
        // Dropping the transaction on an early return rolls the batch back.
        tx.commit()?;
        Ok(())
    }

    fn all_entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError> {
        let conn = self.connection()?;
        if !cache_exists(&conn, name)? {
            return Err(CacheError::NotFound(name.to_string()));
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM cache_entries
             WHERE cache_name = ?1 ORDER BY method, url"
        ))?;
        let entries = stmt
            .query_map(params![name], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Create the schema on a fresh database.
fn init_schema(conn: &Connection) -> Result<(), CacheError> {
    conn.pragma_update(None, "foreign_keys", true)?;
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        create_schema_v1(conn)?;
    }
    Ok(())
}

fn create_schema_v1(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS caches (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cache_entries (
            cache_name TEXT NOT NULL REFERENCES caches(name) ON DELETE CASCADE,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            response_url TEXT,
            status INTEGER NOT NULL CHECK (status BETWEEN 0 AND 999),
            status_text TEXT NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (cache_name, method, url)
        );
        "#,
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn cache_exists(conn: &Connection, name: &str) -> Result<bool, CacheError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM caches WHERE name = ?1)",
        params![name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn encode_headers(headers: &[(String, Vec<u8>)]) -> Result<String, CacheError> {
    let stored: Vec<StoredHeader> = headers
        .iter()
        .map(|(name, value)| StoredHeader(name.clone(), value.clone()))
        .collect();
    Ok(serde_json::to_string(&stored)?)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let headers: String = row.get(5)?;
    let headers: Vec<StoredHeader> = serde_json::from_str(&headers)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    let cached_at: i64 = row.get(7)?;

    Ok(CacheEntry {
        key: CacheKey {
            method: row.get(0)?,
            url: row.get(1)?,
        },
        url: row.get(2)?,
        status: row.get(3)?,
        status_text: row.get(4)?,
        headers: headers
            .into_iter()
            .map(|StoredHeader(name, value)| (name, value))
            .collect(),
        body: row.get(6)?,
        cached_at: cached_at as u64,
    })
}

impl CacheStorage for DiskCacheStorage {
    fn open(&self, name: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let name = name.to_string();
        Box::pin(async move { self.create_cache(&name) })
    }

    fn has(&self, name: &str) -> BoxFuture<'_, bool> {
        let name = name.to_string();
        Box::pin(async move {
            self.has_cache(&name).unwrap_or_else(|e| {
                debug!(cache = %name, error = %e, "Cache lookup failed");
                false
            })
        })
    }

    fn delete(&self, name: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let name = name.to_string();
        Box::pin(async move { self.delete_cache(&name) })
    }

    fn keys(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            self.cache_names().unwrap_or_else(|e| {
                debug!(error = %e, "Listing caches failed");
                Vec::new()
            })
        })
    }

    fn match_request(&self, name: &str, key: &CacheKey) -> BoxFuture<'_, Option<CacheEntry>> {
        let name = name.to_string();
        let key = key.clone();
        Box::pin(async move {
            self.find_entry(&name, &key).unwrap_or_else(|e| {
                debug!(cache = %name, key = %key, error = %e, "Cache match failed");
                None
            })
        })
    }

    fn put(&self, name: &str, entry: CacheEntry) -> BoxFuture<'_, Result<(), CacheError>> {
        let name = name.to_string();
        Box::pin(async move { self.insert_entries(&name, std::slice::from_ref(&entry)) })
    }

    fn put_all(
        &self,
        name: &str,
        entries: Vec<CacheEntry>,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let name = name.to_string();
        Box::pin(async move { self.insert_entries(&name, &entries) })
    }

    fn entries(&self, name: &str) -> BoxFuture<'_, Result<Vec<CacheEntry>, CacheError>> {
        let name = name.to_string();
        Box::pin(async move { self.all_entries(&name) })
    }
}
