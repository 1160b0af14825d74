//! Registration state: which generation is installing, waiting and active,
//! and which clients each one controls.
//!
//! ```text
//! Registration (scope)
//!     ├── installing (Generation)
//!     ├── waiting (Generation)
//!     ├── active (Generation)
//!     └── clients (Client → controller)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// Unique identifier for a worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationId(u64);

impl GenerationId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle state of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Precaching.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Sweeping old stores.
    Activating,
    /// Current generation, serving fetches.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// One versioned worker generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub id: GenerationId,

    /// Version identifier from the config.
    pub version: String,

    /// Name of the store this generation owns.
    pub cache_name: String,

    pub state: ServiceWorkerState,

    /// Set by skip-waiting; activation no longer waits for old clients.
    pub skip_waiting: bool,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl Generation {
    pub(crate) fn new(id: GenerationId, version: &str, cache_name: &str) -> Self {
        Self {
            id,
            version: version.to_string(),
            cache_name: cache_name.to_string(),
            state: ServiceWorkerState::Parsed,
            skip_waiting: false,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

/// A page (or worker) context using the app.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub url: Url,
    /// Generation serving this client's fetches.
    pub controller: Option<GenerationId>,
}

/// A service worker registration.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Installing generation.
    pub installing: Option<Generation>,

    /// Waiting generation (installed but not active).
    pub waiting: Option<Generation>,

    /// Active generation.
    pub active: Option<Generation>,

    clients: HashMap<String, Client>,
}

impl Registration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            clients: HashMap::new(),
        }
    }

    /// Id of the active generation.
    pub fn active_id(&self) -> Option<GenerationId> {
        self.active.as_ref().map(|g| g.id)
    }

    /// Version of the active generation.
    pub fn active_version(&self) -> Option<&str> {
        self.active.as_ref().map(|g| g.version.as_str())
    }

    /// Start installing `generation`. A previous installing generation is
    /// returned so the caller can report it redundant.
    pub(crate) fn begin_install(&mut self, mut generation: Generation) -> Option<Generation> {
        generation.set_state(ServiceWorkerState::Installing);
        let replaced = self.installing.replace(generation);
        replaced.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Move the installing generation to waiting. A previously waiting
    /// generation becomes redundant and is returned. `None` when `id` is not
    /// the installing generation.
    pub(crate) fn install_complete(&mut self, id: GenerationId) -> Option<Option<Generation>> {
        let mut generation = self.installing.take_if_id(id)?;
        generation.set_state(ServiceWorkerState::Installed);
        let replaced = self.waiting.replace(generation);
        Some(replaced.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        }))
    }

    /// Drop the installing generation after a failed install.
    pub(crate) fn install_failed(&mut self, id: GenerationId) -> Option<Generation> {
        let mut generation = self.installing.take_if_id(id)?;
        generation.set_state(ServiceWorkerState::Redundant);
        Some(generation)
    }

    /// Flag the waiting generation to activate without waiting for clients.
    pub(crate) fn skip_waiting(&mut self, id: GenerationId) -> bool {
        match self.waiting.as_mut() {
            Some(generation) if generation.id == id => {
                generation.skip_waiting = true;
                true
            }
            _ => false,
        }
    }

    /// Whether the waiting generation `id` may activate now.
    ///
    /// True when skip-waiting was signalled, or when no client is still
    /// controlled by the current active generation.
    pub fn can_activate(&self, id: GenerationId) -> bool {
        let Some(waiting) = self.waiting.as_ref().filter(|g| g.id == id) else {
            return false;
        };
        if waiting.skip_waiting {
            return true;
        }
        match self.active_id() {
            Some(active) => self.controlled_count(active) == 0,
            None => true,
        }
    }

    /// Move the waiting generation into the activating slot. The previous
    /// active generation becomes redundant and is returned.
    pub(crate) fn begin_activate(&mut self, id: GenerationId) -> Option<Option<Generation>> {
        let mut generation = self.waiting.take_if_id(id)?;
        generation.set_state(ServiceWorkerState::Activating);
        let previous = self.active.replace(generation);
        Some(previous.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        }))
    }

    /// Finish activation of the active generation `id`.
    pub(crate) fn finish_activate(&mut self, id: GenerationId) -> bool {
        match self.active.as_mut() {
            Some(generation) if generation.id == id => {
                generation.set_state(ServiceWorkerState::Activated);
                true
            }
            _ => false,
        }
    }

    /// Adopt an already installed generation as active (process restart).
    pub(crate) fn restore_active(&mut self, mut generation: Generation) -> Option<Generation> {
        generation.set_state(ServiceWorkerState::Activated);
        let previous = self.active.replace(generation);
        previous.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Register a client. It is controlled by the active generation, if any.
    pub fn add_client(&mut self, id: impl Into<String>, url: Url) -> Client {
        let client = Client {
            id: id.into(),
            url,
            controller: self.active_id(),
        };
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Remove a client (its page closed).
    pub fn remove_client(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Get a client by ID.
    pub fn client(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Make `id` the controller of every client. Returns the number claimed.
    pub(crate) fn claim(&mut self, id: GenerationId) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.controller != Some(id) {
                client.controller = Some(id);
                claimed += 1;
            }
        }
        claimed
    }

    /// Number of clients controlled by `id`.
    pub fn controlled_count(&self, id: GenerationId) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller == Some(id))
            .count()
    }
}

trait TakeIfId {
    fn take_if_id(&mut self, id: GenerationId) -> Option<Generation>;
}

impl TakeIfId for Option<Generation> {
    fn take_if_id(&mut self, id: GenerationId) -> Option<Generation> {
        if self.as_ref().is_some_and(|g| g.id == id) {
            self.take()
        } else {
            None
        }
    }
}
