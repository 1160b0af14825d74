//! The worker: lifecycle events and fetch routing for one generation.

use std::sync::Arc;

use futures::future::join_all;
use http::Method;
use shellcache_net::{Fetch, Origin, Request, Response, Url};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheKey, CacheStorage};
use crate::config::ShellCacheConfig;
use crate::key::normalize_request;
use crate::message::ControlMessage;
use crate::registration::{Generation, GenerationId, Registration, ServiceWorkerState};
use crate::ServiceWorkerError;

/// Registration shared by every generation of one app.
pub type SharedRegistration = Arc<RwLock<Registration>>;

/// Events emitted by a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceWorkerEvent {
    /// A generation changed state.
    StateChange {
        generation: GenerationId,
        version: String,
        new_state: ServiceWorkerState,
    },
    /// Activation deleted every store but `kept`.
    CachesSwept { kept: String, deleted: Vec<String> },
    /// Activation took control of open clients.
    ClientsClaimed { generation: GenerationId, count: usize },
    /// Background revalidation wrote a fresh response.
    CacheUpdated { cache_name: String, key: CacheKey },
}

/// Result of routing one intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The worker produced the response.
    Respond(Response),
    /// Not intercepted; the request goes to the network untouched.
    Passthrough(Request),
}

/// One worker generation.
///
/// Cheap to clone; clones share the store, the network and the registration.
#[derive(Clone)]
pub struct ServiceWorker {
    pub(crate) id: GenerationId,
    pub(crate) config: Arc<ShellCacheConfig>,
    pub(crate) cache_name: Arc<str>,
    pub(crate) origin: Origin,
    pub(crate) fallback_key: CacheKey,
    precache: Arc<[Url]>,
    pub(crate) caches: Arc<dyn CacheStorage>,
    pub(crate) fetcher: Arc<dyn Fetch>,
    registration: SharedRegistration,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorker {
    /// Create the worker for the generation described by `config`.
    pub fn new(
        config: ShellCacheConfig,
        caches: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetch>,
        registration: SharedRegistration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        config.validate()?;
        let precache = config.precache_urls()?;
        let fallback_key =
            CacheKey::from(&normalize_request(&Request::get(config.fallback_url()?)));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = Self {
            id: GenerationId::new(),
            cache_name: Arc::from(config.cache_name()),
            origin: config.origin(),
            fallback_key,
            precache: precache.into(),
            config: Arc::new(config),
            caches,
            fetcher,
            registration,
            event_tx,
        };

        Ok((worker, event_rx))
    }

    /// Create a worker with its own fresh registration.
    pub fn standalone(
        config: ShellCacheConfig,
        caches: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetch>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        let registration = Arc::new(RwLock::new(Registration::new(config.scope.clone())));
        Self::new(config, caches, fetcher, registration)
    }

    /// Generation id.
    pub fn id(&self) -> GenerationId {
        self.id
    }

    /// Name of this generation's store.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Configuration of this generation.
    pub fn config(&self) -> &ShellCacheConfig {
        &self.config
    }

    /// The shared registration.
    pub fn registration(&self) -> SharedRegistration {
        Arc::clone(&self.registration)
    }

    /// Current lifecycle state, `None` when the registration no longer holds
    /// this generation.
    pub async fn state(&self) -> Option<ServiceWorkerState> {
        let reg = self.registration.read().await;
        let state = [&reg.installing, &reg.waiting, &reg.active]
            .into_iter()
            .flatten()
            .find(|g| g.id == self.id)
            .map(|g| g.state);
        state
    }

    /// Whether this generation is the active one.
    pub async fn is_active(&self) -> bool {
        self.registration
            .read()
            .await
            .active
            .as_ref()
            .is_some_and(|g| g.id == self.id && g.is_active())
    }

    pub(crate) fn emit(&self, event: ServiceWorkerEvent) {
        // Receivers are optional.
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, generation: &Generation) {
        self.emit(ServiceWorkerEvent::StateChange {
            generation: generation.id,
            version: generation.version.clone(),
            new_state: generation.state,
        });
    }

    fn generation(&self) -> Generation {
        Generation::new(self.id, &self.config.version, &self.cache_name)
    }

    // ==================== Install ====================

    /// Run the install step: open the store and precache the manifest.
    ///
    /// All-or-nothing: if any manifest fetch fails or returns a non-2xx
    /// status, nothing is written, a store created here is removed again and
    /// the generation becomes redundant. The active generation is untouched.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        let mut generation = self.generation();
        generation.set_state(ServiceWorkerState::Installing);
        if let Some(replaced) = self.registration.write().await.begin_install(generation.clone()) {
            self.emit_state(&replaced);
        }
        self.emit_state(&generation);
        info!(version = %self.config.version, cache = %self.cache_name, entries = self.precache.len(), "Installing");

        let created = match self.caches.open(&self.cache_name).await {
            Ok(created) => created,
            Err(e) => {
                self.fail_install().await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.precache().await {
            if created {
                if let Err(delete_err) = self.caches.delete(&self.cache_name).await {
                    warn!(cache = %self.cache_name, error = %delete_err, "Failed to remove partial cache");
                }
            }
            self.fail_install().await;
            return Err(e);
        }

        let replaced = self
            .registration
            .write()
            .await
            .install_complete(self.id)
            .ok_or_else(|| {
                ServiceWorkerError::StateError(format!(
                    "generation {} was superseded during install",
                    self.config.version
                ))
            })?;
        if let Some(replaced) = replaced {
            self.emit_state(&replaced);
        }
        generation.set_state(ServiceWorkerState::Installed);
        self.emit_state(&generation);
        info!(version = %self.config.version, "Installed");

        if self.config.skip_waiting_on_install {
            self.skip_waiting().await?;
        } else {
            self.try_activate().await?;
        }
        Ok(())
    }

    async fn precache(&self) -> Result<usize, ServiceWorkerError> {
        let requests: Vec<Request> = self.precache.iter().cloned().map(Request::get).collect();
        let results = join_all(requests.iter().map(|r| self.fetcher.fetch(r.clone()))).await;

        let mut entries = Vec::with_capacity(requests.len());
        for (request, result) in requests.iter().zip(results) {
            let response = result.map_err(|e| ServiceWorkerError::InstallFailed {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;
            if !response.ok() {
                return Err(ServiceWorkerError::InstallFailed {
                    url: request.url.to_string(),
                    reason: format!("HTTP {}", response.status),
                });
            }
            let key = CacheKey::from(&normalize_request(request));
            entries.push(CacheEntry::from_response(key, &response));
        }

        let count = entries.len();
        self.caches.put_all(&self.cache_name, entries).await?;
        debug!(cache = %self.cache_name, count, "Precached manifest");
        Ok(count)
    }

    async fn fail_install(&self) {
        if let Some(failed) = self.registration.write().await.install_failed(self.id) {
            warn!(version = %failed.version, "Install failed, generation is redundant");
            self.emit_state(&failed);
        }
    }

    // ==================== Activate ====================

    /// Signal that this generation should not wait for old clients to close.
    ///
    /// Activates immediately when the generation is waiting. Returns whether
    /// activation happened.
    pub async fn skip_waiting(&self) -> Result<bool, ServiceWorkerError> {
        if !self.registration.write().await.skip_waiting(self.id) {
            debug!(version = %self.config.version, "skip_waiting ignored, generation is not waiting");
            return Ok(false);
        }
        self.try_activate().await
    }

    /// Activate if allowed: skip-waiting was signalled, or no client is still
    /// controlled by the previous generation.
    pub async fn try_activate(&self) -> Result<bool, ServiceWorkerError> {
        let previous = {
            let mut reg = self.registration.write().await;
            if !reg.can_activate(self.id) {
                debug!(version = %self.config.version, "Waiting for clients of the active generation to close");
                return Ok(false);
            }
            reg.begin_activate(self.id)
        };
        match previous {
            Some(previous) => {
                self.run_activation(previous).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run the activate step unconditionally for the waiting generation.
    pub async fn activate(&self) -> Result<(), ServiceWorkerError> {
        let previous = self
            .registration
            .write()
            .await
            .begin_activate(self.id)
            .ok_or_else(|| {
                ServiceWorkerError::StateError(format!(
                    "generation {} is not waiting",
                    self.config.version
                ))
            })?;
        self.run_activation(previous).await;
        Ok(())
    }

    async fn run_activation(&self, previous: Option<Generation>) {
        let mut generation = self.generation();
        generation.set_state(ServiceWorkerState::Activating);
        self.emit_state(&generation);
        if let Some(previous) = previous {
            self.emit_state(&previous);
        }

        self.sweep().await;

        let claimed = {
            let mut reg = self.registration.write().await;
            reg.finish_activate(self.id);
            reg.claim(self.id)
        };
        generation.set_state(ServiceWorkerState::Activated);
        self.emit_state(&generation);
        self.emit(ServiceWorkerEvent::ClientsClaimed {
            generation: self.id,
            count: claimed,
        });
        info!(version = %self.config.version, claimed, "Activated");
    }

    /// Delete every store that does not belong to this generation.
    async fn sweep(&self) {
        let mut deleted = Vec::new();
        for name in self.caches.keys().await {
            if name == *self.cache_name {
                continue;
            }
            match self.caches.delete(&name).await {
                Ok(_) => {
                    debug!(cache = %name, "Deleted old cache");
                    deleted.push(name);
                }
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
            }
        }
        self.emit(ServiceWorkerEvent::CachesSwept {
            kept: self.cache_name.to_string(),
            deleted,
        });
    }

    /// Adopt this generation as active when its store already exists, as
    /// after a restart with persistent storage. Returns whether it did.
    pub async fn resume(&self) -> Result<bool, ServiceWorkerError> {
        if !self.caches.has(&self.cache_name).await {
            debug!(cache = %self.cache_name, "No store to resume from");
            return Ok(false);
        }

        let generation = self.generation();
        let (previous, claimed) = {
            let mut reg = self.registration.write().await;
            let previous = reg.restore_active(generation);
            (previous, reg.claim(self.id))
        };
        if let Some(previous) = previous {
            self.emit_state(&previous);
        }
        let mut generation = self.generation();
        generation.set_state(ServiceWorkerState::Activated);
        self.emit_state(&generation);
        info!(version = %self.config.version, claimed, "Resumed from existing store");
        Ok(true)
    }

    /// Remove a closed client and activate this generation if it was only
    /// waiting for that.
    pub async fn release_client(&self, client_id: &str) -> Result<bool, ServiceWorkerError> {
        self.registration.write().await.remove_client(client_id);
        self.try_activate().await
    }

    // ==================== Message ====================

    /// Handle a message posted by a page. Unknown payloads are ignored.
    pub async fn handle_message(&self, data: &str) -> Result<(), ServiceWorkerError> {
        match data.parse::<ControlMessage>() {
            Ok(ControlMessage::SkipWaiting) => {
                info!(version = %self.config.version, "SKIP_WAITING received");
                self.skip_waiting().await?;
            }
            Err(e) => debug!(error = %e, "Ignoring message"),
        }
        Ok(())
    }

    // ==================== Fetch ====================

    /// Route an intercepted request.
    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        if request.method != Method::GET {
            debug!(url = %request.url, method = %request.method, "Passing through non-GET request");
            return FetchOutcome::Passthrough(request);
        }
        if !self.is_active().await {
            debug!(url = %request.url, "Generation not active, passing through");
            return FetchOutcome::Passthrough(request);
        }

        let response = if request.is_navigation() {
            self.handle_navigation(request).await
        } else if request.origin() == self.origin {
            self.handle_static(request).await
        } else {
            self.handle_cross_origin(request).await
        };
        FetchOutcome::Respond(response)
    }

    /// Route a request and always produce a response, fetching passthrough
    /// requests directly. Transport failures there yield a network error
    /// response (status 0).
    pub async fn respond(&self, request: Request) -> Response {
        match self.handle_fetch(request).await {
            FetchOutcome::Respond(response) => response,
            FetchOutcome::Passthrough(request) => {
                let url = request.url.clone();
                self.fetcher.fetch(request).await.unwrap_or_else(|e| {
                    warn!(url = %url, error = %e, "Passthrough fetch failed");
                    Response::network_error()
                })
            }
        }
    }
}
