//! Scripted network and fixtures shared by the worker tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, Method, StatusCode};
use shellcache_net::{Fetch, NetError, Request, Response, Url};
use shellcache_sw::{
    CacheKey, CacheStorage, MemoryCacheStorage, ServiceWorker, ServiceWorkerEvent,
    ShellCacheConfig, SharedRegistration,
};
use tokio::sync::mpsc::UnboundedReceiver;

pub const SCOPE: &str = "https://app.example/jjs2025/";

/// How the scripted network answers one URL.
#[derive(Clone)]
pub enum Route {
    Respond(u16, &'static str),
    /// Never settles.
    Hang,
}

/// In-memory network keyed by URL without query string.
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Route>>,
    offline: AtomicBool,
    calls: Mutex<Vec<(Method, String)>>,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Network serving `body` for every path in `paths` (scope-relative).
    pub fn serving(paths: &[&str]) -> Arc<Self> {
        let network = Self::new();
        for path in paths {
            network.route(path, Route::Respond(200, "precached"));
        }
        network
    }

    pub fn route(&self, path: &str, route: Route) {
        let url = Url::parse(SCOPE).unwrap().join(path).unwrap();
        self.routes.lock().unwrap().insert(route_key(&url), route);
    }

    pub fn route_url(&self, url: &str, route: Route) {
        let url = Url::parse(url).unwrap();
        self.routes.lock().unwrap().insert(route_key(&url), route);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn route_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

impl Fetch for ScriptedNetwork {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        self.calls
            .lock()
            .unwrap()
            .push((request.method.clone(), request.url.to_string()));

        let route = if self.offline.load(Ordering::SeqCst) {
            None
        } else {
            self.routes.lock().unwrap().get(&route_key(&request.url)).cloned()
        };

        Box::pin(async move {
            match route {
                Some(Route::Respond(status, body)) => Ok(Response::new(
                    request.url,
                    StatusCode::from_u16(status).unwrap(),
                    HeaderMap::new(),
                    Bytes::from_static(body.as_bytes()),
                )),
                Some(Route::Hang) => futures::future::pending().await,
                None => Err(NetError::RequestFailed(format!(
                    "unreachable: {}",
                    request.url
                ))),
            }
        })
    }
}

pub fn config(version: &str, precache: &[&str]) -> ShellCacheConfig {
    ShellCacheConfig::for_scope(Url::parse(SCOPE).unwrap())
        .with_version(version)
        .with_precache(precache.iter().copied())
}

pub fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

pub fn key(path: &str) -> CacheKey {
    CacheKey::get(&url(path))
}

pub struct Harness {
    pub worker: ServiceWorker,
    pub events: UnboundedReceiver<ServiceWorkerEvent>,
    pub network: Arc<ScriptedNetwork>,
    pub storage: Arc<MemoryCacheStorage>,
}

impl Harness {
    pub fn new(config: ShellCacheConfig, network: Arc<ScriptedNetwork>) -> Self {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (worker, events) = ServiceWorker::standalone(
            config,
            storage.clone() as Arc<dyn CacheStorage>,
            network.clone(),
        )
        .unwrap();
        Self {
            worker,
            events,
            network,
            storage,
        }
    }

    /// A worker for the next generation sharing storage, network and registration.
    pub fn next_generation(&self, config: ShellCacheConfig) -> Harness {
        let registration: SharedRegistration = self.worker.registration();
        let (worker, events) = ServiceWorker::new(
            config,
            self.storage.clone() as Arc<dyn CacheStorage>,
            self.network.clone(),
            registration,
        )
        .unwrap();
        Harness {
            worker,
            events,
            network: self.network.clone(),
            storage: self.storage.clone(),
        }
    }

    /// Wait for the next background cache write.
    pub async fn cache_updated(&mut self) -> CacheKey {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.events.recv().await {
                    Some(ServiceWorkerEvent::CacheUpdated { key, .. }) => return key,
                    Some(_) => continue,
                    None => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("no cache update")
    }
}
