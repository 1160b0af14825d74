//! Response strategies used by [`ServiceWorker::handle_fetch`].
//!
//! | request          | strategy                      |
//! |------------------|-------------------------------|
//! | navigation       | network-first, shell fallback |
//! | same-origin GET  | stale-while-revalidate        |
//! | cross-origin GET | network only                  |

use http::Method;
use shellcache_net::{Request, Response};
use tracing::{debug, trace, warn};

use crate::cache::{CacheEntry, CacheKey};
use crate::key::normalize_request;
use crate::worker::{ServiceWorker, ServiceWorkerEvent};

impl ServiceWorker {
    /// Network-first. A live response is cached under its normalized key and
    /// returned as-is; when the network fails the cached app shell is served,
    /// and failing that the 503 placeholder.
    pub(crate) async fn handle_navigation(&self, request: Request) -> Response {
        let key = CacheKey::from(&normalize_request(&request));
        let url = request.url.clone();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                let entry = CacheEntry::from_response(key, &response);
                if let Err(e) = self.caches.put(&self.cache_name, entry).await {
                    warn!(url = %url, error = %e, "Failed to cache navigation response");
                }
                response
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Navigation failed, serving offline shell");
                match self
                    .caches
                    .match_request(&self.cache_name, &self.fallback_key)
                    .await
                {
                    Some(entry) => entry.to_response(),
                    None => {
                        warn!(url = %url, fallback = %self.fallback_key, "Offline shell not cached");
                        Response::offline()
                    }
                }
            }
        }
    }

    /// Stale-while-revalidate. A cached entry is returned without waiting for
    /// the network; the revalidation keeps running detached and refreshes the
    /// entry for next time. Without a cached entry the revalidation result is
    /// awaited.
    pub(crate) async fn handle_static(&self, request: Request) -> Response {
        let key = CacheKey::from(&normalize_request(&request));
        let cached = self.caches.match_request(&self.cache_name, &key).await;

        let worker = self.clone();
        let revalidation = tokio::spawn(async move { worker.revalidate(request, key).await });

        if let Some(entry) = cached {
            trace!(key = %entry.key, "Cache hit");
            return entry.to_response();
        }

        match revalidation.await {
            Ok(Some(response)) => response,
            Ok(None) => Response::offline(),
            Err(e) => {
                warn!(error = %e, "Revalidation task aborted");
                Response::offline()
            }
        }
    }

    /// Fetch `request` and, for a same-origin GET answered with 2xx, store the
    /// response under `key`. Transport failures resolve to `None`.
    async fn revalidate(&self, request: Request, key: CacheKey) -> Option<Response> {
        let cacheable_request = request.method == Method::GET && request.origin() == self.origin;
        let url = request.url.clone();

        let response = match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "Revalidation fetch failed");
                return None;
            }
        };

        if cacheable_request && response.ok() {
            let entry = CacheEntry::from_response(key.clone(), &response);
            match self.caches.put(&self.cache_name, entry).await {
                Ok(()) => self.emit(ServiceWorkerEvent::CacheUpdated {
                    cache_name: self.cache_name.to_string(),
                    key,
                }),
                Err(e) => debug!(key = %key, error = %e, "Dropped revalidated response"),
            }
        }

        Some(response)
    }

    /// Network only; a failed fetch becomes the 503 placeholder.
    pub(crate) async fn handle_cross_origin(&self, request: Request) -> Response {
        let url = request.url.clone();
        self.fetcher.fetch(request).await.unwrap_or_else(|e| {
            debug!(url = %url, error = %e, "Cross-origin fetch failed");
            Response::offline()
        })
    }
}
