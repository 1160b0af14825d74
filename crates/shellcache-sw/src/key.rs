//! Cache key normalization.
//!
//! Query strings carry cache busters and analytics parameters, so two requests
//! that differ only in their query address the same cache entry.

use shellcache_net::Request;
use thiserror::Error;
use tracing::debug;

/// Why a request could not be normalized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("URL has no hierarchical path: {0}")]
    Opaque(String),
}

/// Clone `request` with its query string removed.
///
/// Method, headers, mode, credentials, redirect policy, referrer, referrer
/// policy, integrity, cache directive and keep-alive are carried over. The
/// body is not: keys only ever describe GET requests. Fragments never reach
/// the network and are dropped as well.
pub fn try_normalize(request: &Request) -> Result<Request, NormalizeError> {
    if request.url.cannot_be_a_base() {
        return Err(NormalizeError::Opaque(request.url.to_string()));
    }

    let mut normalized = request.clone();
    normalized.url.set_query(None);
    normalized.url.set_fragment(None);
    normalized.body = None;
    Ok(normalized)
}

/// Like [`try_normalize`], falling back to the original request on failure.
pub fn normalize_request(request: &Request) -> Request {
    try_normalize(request).unwrap_or_else(|e| {
        debug!(url = %request.url, error = %e, "Using unnormalized request as cache key");
        request.clone()
    })
}
