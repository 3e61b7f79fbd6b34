//! Shared config manager.
//!
//! Single source of truth for the [`Config`] record. Reads are served from an
//! in-memory cache that is filled from the [`ConfigStore`] on first access.
//! Every write goes through one FIFO writer task which merges the patch into
//! the cached record, persists the full record, updates the cache and only
//! then notifies listeners, so:
//!
//! - two saves never interleave, and disjoint patches never lose fields;
//! - listeners see changes in commit order, each exactly once;
//! - a listener never sees a value the store has not accepted.
//!
//! A write is queued when [`ConfigManager::save`] is *called*, not when the
//! returned future is first polled. A listener may therefore call `save` from
//! inside its callback and drop the future: the write runs after the current
//! notification pass.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};
use wordway_core::models::{Config, ConfigPatch, User};
use wordway_core::{Result, WordwayError};
use wordway_store::ConfigStore;

// ── Listeners ─────────────────────────────────────────────────────────────────

/// Receives every committed config change.
///
/// Called synchronously on the writer task; keep callbacks short and hand
/// long work to a spawned task.
pub trait ConfigListener: Send + Sync {
    fn on_config_change(&self, config: &Config);
}

impl<F> ConfigListener for F
where
    F: Fn(&Config) + Send + Sync,
{
    fn on_config_change(&self, config: &Config) {
        self(config)
    }
}

/// Registration-ordered listener table.
#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    entries: parking_lot::Mutex<Vec<(u64, Arc<dyn ConfigListener>)>>,
}

impl ListenerRegistry {
    fn insert(&self, listener: Arc<dyn ConfigListener>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));
        id
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Copy of the current listeners so callbacks run without the lock held.
    fn snapshot(&self) -> Vec<Arc<dyn ConfigListener>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Handle for one listener registration.
///
/// Dropping the handle deregisters the listener; it will not be called for
/// any commit that starts notifying after the drop.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Explicitly deregister. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct Shared {
    store: Arc<dyn ConfigStore>,
    /// `None` until the first successful load from the store.
    cache: Mutex<Option<Config>>,
    listeners: Arc<ListenerRegistry>,
}

impl Shared {
    /// Return the cached record, loading it from the store on first use.
    ///
    /// A stored record that is not a valid config is replaced by the defaults
    /// and overwritten by the next commit. Any other failed load leaves the
    /// cache empty so the next call retries.
    async fn load(&self, cache: &mut Option<Config>) -> Result<Config> {
        if let Some(config) = cache.as_ref() {
            return Ok(config.clone());
        }

        let loaded = match self.store.get().await {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!("config store empty; using defaults");
                Config::default()
            }
            Err(WordwayError::InvalidConfig(reason)) => {
                warn!(%reason, "stored config is unreadable; using defaults");
                Config::default()
            }
            Err(e) => return Err(e),
        };
        *cache = Some(loaded.clone());
        Ok(loaded)
    }

    /// Merge, persist, cache, then notify.
    async fn commit(&self, patch: &ConfigPatch) -> Result<Config> {
        let committed = {
            let mut cache = self.cache.lock().await;
            let current = self.load(&mut cache).await?;
            let next = current.merged(patch)?;
            self.store.set(&next).await?;
            *cache = Some(next.clone());
            next
        };

        self.notify(&committed);
        Ok(committed)
    }

    fn notify(&self, config: &Config) {
        for listener in self.listeners.snapshot() {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_config_change(config)));
            if outcome.is_err() {
                error!("config listener panicked; continuing with remaining listeners");
            }
        }
    }
}

struct WriteRequest {
    patch: ConfigPatch,
    done: oneshot::Sender<Result<Config>>,
}

/// Drain queued writes one at a time until every manager handle is gone.
async fn writer_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(WriteRequest { patch, done }) = rx.recv().await {
        let result = shared.commit(&patch).await;
        if let Err(e) = &result {
            warn!(error = %e, "config write failed; cache and listeners left unchanged");
        }
        // The caller may have dropped its future; the write still stands.
        let _ = done.send(result);
    }
    debug!("config writer stopped");
}

// ── ConfigManager ─────────────────────────────────────────────────────────────

/// Owner of the shared config record.
///
/// Constructed once by the process entry point and passed by `Arc` to every
/// component that reads or writes config.
pub struct ConfigManager {
    shared: Arc<Shared>,
    writes: mpsc::UnboundedSender<WriteRequest>,
}

impl ConfigManager {
    /// Create the manager and spawn its writer task on the current runtime.
    pub fn start(store: Arc<dyn ConfigStore>) -> Arc<Self> {
        let shared = Arc::new(Shared {
            store,
            cache: Mutex::new(None),
            listeners: Arc::new(ListenerRegistry::default()),
        });
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(Arc::clone(&shared), rx));

        Arc::new(Self { shared, writes })
    }

    /// Current config, loaded from the store on first call.
    ///
    /// An empty store yields [`Config::default`].
    pub async fn get_config(&self) -> Result<Config> {
        let mut cache = self.shared.cache.lock().await;
        self.shared.load(&mut cache).await
    }

    /// Queue `patch` for merging into the config.
    ///
    /// The returned future resolves with the committed record once it has
    /// been persisted and every listener has been notified, or with the
    /// persistence error.
    pub fn save(&self, patch: ConfigPatch) -> impl Future<Output = Result<Config>> + Send + 'static {
        let (done, rx) = oneshot::channel();
        let queued = self.writes.send(WriteRequest { patch, done }).is_ok();

        async move {
            if !queued {
                return Err(WordwayError::ManagerClosed);
            }
            rx.await.unwrap_or(Err(WordwayError::ManagerClosed))
        }
    }

    /// Replace `loggedInUser`; `None` signs the user out.
    ///
    /// Unlike a background logout this leaves `accessToken` as it is.
    pub fn set_logged_in_user(
        &self,
        user: Option<User>,
    ) -> impl Future<Output = Result<Config>> + Send + 'static {
        let pending = ConfigPatch::logged_in_user(user.as_ref()).map(|patch| self.save(patch));
        async move { pending?.await }
    }

    /// Register `listener` for every future commit.
    pub fn add_listener(&self, listener: Arc<dyn ConfigListener>) -> Subscription {
        let id = self.shared.listeners.insert(listener);
        debug!(listener_id = id, "config listener added");
        Subscription {
            id,
            registry: Arc::downgrade(&self.shared.listeners),
        }
    }

    /// Deregister the listener behind `subscription`.
    pub fn remove_listener(&self, subscription: Subscription) {
        debug!(listener_id = subscription.id, "config listener removed");
        drop(subscription);
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
