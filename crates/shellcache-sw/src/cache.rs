//! Cache storage: named stores of request -> response snapshots.
//!
//! ```text
//! CacheStorage
//!     └── Cache ("<prefix><version>")
//!             └── CacheKey → CacheEntry
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue};
use shellcache_net::{Request, Response, ResponseSource, Url};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::trace;

/// Cache storage errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Cache storage lock poisoned")]
    Poisoned,
}

// ==================== Keys & Entries ====================

/// Identity of a cached request: method plus URL.
///
/// Built from an already normalized request; see [`crate::normalize_request`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self {
            method: http::Method::GET.to_string(),
            url: url.to_string(),
        }
    }
}

impl From<&Request> for CacheKey {
    fn from(request: &Request) -> Self {
        Self {
            method: request.method.to_string(),
            url: request.url.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,

    /// Final response URL, if the response came from the network.
    pub url: Option<String>,

    pub status: u16,

    pub status_text: String,

    /// Response headers in wire order; repeated names are kept and values
    /// are raw bytes, which need not be UTF-8.
    pub headers: Vec<(String, Vec<u8>)>,

    pub body: Vec<u8>,

    /// Capture time, ms since the epoch.
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot `response` under `key`.
    pub fn from_response(key: CacheKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            key,
            url: response.url.as_ref().map(|u| u.to_string()),
            status: response.status,
            status_text: response.status_text.clone(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild the response this entry was captured from.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) {
                headers.append(name, value);
            }
        }

        Response {
            url: self.url.as_deref().and_then(|u| Url::parse(u).ok()),
            status: self.status,
            status_text: self.status_text.clone(),
            headers,
            body: Bytes::from(self.body.clone()),
            source: ResponseSource::Cache,
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Cache ====================

/// A single named store.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    /// Create an empty cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request key.
    pub fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert or replace an entry.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Delete an entry.
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// All entries, sorted by key.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Named-store capability injected into the worker.
///
/// Every call is atomic on its own: concurrent writers to the same key race
/// with last-write-wins, and readers see either the old or the new entry.
/// Writes into a store that does not exist fail with [`CacheError::NotFound`]
/// so a swept generation is never resurrected by a late write.
pub trait CacheStorage: Send + Sync {
    /// Open a store, creating it if absent. Returns `true` if it was created.
    fn open(&self, name: &str) -> BoxFuture<'_, Result<bool, CacheError>>;

    /// Check if a store exists.
    fn has(&self, name: &str) -> BoxFuture<'_, bool>;

    /// Delete a store and all its entries.
    fn delete(&self, name: &str) -> BoxFuture<'_, Result<bool, CacheError>>;

    /// Names of all stores.
    fn keys(&self) -> BoxFuture<'_, Vec<String>>;

    /// Look up an entry in one store.
    fn match_request(&self, name: &str, key: &CacheKey) -> BoxFuture<'_, Option<CacheEntry>>;

    /// Insert or replace one entry.
    fn put(&self, name: &str, entry: CacheEntry) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Insert a batch; either every entry is written or none is.
    fn put_all(&self, name: &str, entries: Vec<CacheEntry>)
        -> BoxFuture<'_, Result<(), CacheError>>;

    /// Snapshot of every entry in one store.
    fn entries(&self, name: &str) -> BoxFuture<'_, Result<Vec<CacheEntry>, CacheError>>;
}

/// In-memory [`CacheStorage`].
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStorage {
    caches: Arc<RwLock<HashMap<String, Cache>>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    async fn open_cache(&self, name: String) -> bool {
        let mut caches = self.caches.write().await;
        if caches.contains_key(&name) {
            return false;
        }
        trace!(cache = %name, "Creating cache");
        caches.insert(name.clone(), Cache::new(&name));
        true
    }

    async fn put_entries(&self, name: String, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        let cache = caches.get_mut(&name).ok_or(CacheError::NotFound(name))?;
        for entry in entries {
            cache.put(entry);
        }
        Ok(())
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn open(&self, name: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let name = name.to_string();
        Box::pin(async move { Ok(self.open_cache(name).await) })
    }

    fn has(&self, name: &str) -> BoxFuture<'_, bool> {
        let name = name.to_string();
        Box::pin(async move { self.caches.read().await.contains_key(&name) })
    }

    fn delete(&self, name: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let name = name.to_string();
        Box::pin(async move { Ok(self.caches.write().await.remove(&name).is_some()) })
    }

    fn keys(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            let mut names: Vec<_> = self.caches.read().await.keys().cloned().collect();
            names.sort();
            names
        })
    }

    fn match_request(&self, name: &str, key: &CacheKey) -> BoxFuture<'_, Option<CacheEntry>> {
        let name = name.to_string();
        let key = key.clone();
        Box::pin(async move {
            self.caches
                .read()
                .await
                .get(&name)
                .and_then(|cache| cache.match_request(&key))
                .cloned()
        })
    }

    fn put(&self, name: &str, entry: CacheEntry) -> BoxFuture<'_, Result<(), CacheError>> {
        let name = name.to_string();
        Box::pin(self.put_entries(name, vec![entry]))
    }

    fn put_all(
        &self,
        name: &str,
        entries: Vec<CacheEntry>,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let name = name.to_string();
        Box::pin(self.put_entries(name, entries))
    }

    fn entries(&self, name: &str) -> BoxFuture<'_, Result<Vec<CacheEntry>, CacheError>> {
        let name = name.to_string();
        Box::pin(async move {
            self.caches
                .read()
                .await
                .get(&name)
                .map(Cache::entries)
                .ok_or(CacheError::NotFound(name))
        })
    }
}
