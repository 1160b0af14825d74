//! # ShellCache Service Worker
//!
//! Offline caching layer for a single-page app, shaped like a service worker.
//!
//! ## Features
//!
//! - **Install**: precache a fixed manifest into the generation's store, all or nothing
//! - **Activate**: delete every other generation's store, claim open clients
//! - **Navigations**: network-first with the cached app shell as offline fallback
//! - **Same-origin assets**: stale-while-revalidate
//! - **Cross-origin requests**: network only, 503 "Offline" on failure
//! - **Control channel**: `SKIP_WAITING` activates a waiting generation
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker (one per generation)
//!     ├── ShellCacheConfig   prefix + version, scope, manifest
//!     ├── Arc<dyn Fetch>         network
//!     ├── Arc<dyn CacheStorage>  named stores
//!     └── SharedRegistration
//!             ├── installing / waiting / active
//!             └── clients
//! ```
//!
//! Cache keys are normalized requests: the query string is stripped so
//! cache-busting parameters do not fragment the store.

use thiserror::Error;

pub mod cache;
pub mod config;
pub mod disk;
pub mod key;
pub mod message;
pub mod registration;
mod strategy;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheError, CacheKey, CacheStorage, MemoryCacheStorage};
pub use config::{ConfigError, ShellCacheConfig, DEFAULT_PRECACHE};
pub use disk::DiskCacheStorage;
pub use key::{normalize_request, try_normalize, NormalizeError};
pub use message::{ControlMessage, SKIP_WAITING};
pub use registration::{Client, Generation, GenerationId, Registration, ServiceWorkerState};
pub use worker::{FetchOutcome, ServiceWorker, ServiceWorkerEvent, SharedRegistration};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed fetching {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    StateError(String),
}
