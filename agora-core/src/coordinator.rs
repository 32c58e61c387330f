//! Composition root for the coordination core
//!
//! Owns the lock registry, the conversation store, and the watchdog task.
//! Constructed once at process start and passed by reference to every
//! consumer; there are no ambient singletons. `shutdown` stops the watchdog
//! cleanly, which is what lets tests start and stop supervision
//! deterministically.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::CoreConfig;
use crate::conversation::{ConversationStore, SharedConversation};
use crate::key::ConversationKey;
use crate::locks::LockRegistry;
use crate::persistence::ThreadBackend;
use crate::watchdog::{Watchdog, WatchdogHandle};

/// The coordination core: lock registry, state store, and watchdog
pub struct Coordinator {
    config: CoreConfig,
    locks: Arc<LockRegistry>,
    store: Arc<ConversationStore>,
    watchdog: Option<WatchdogHandle>,
}

impl Coordinator {
    /// Start building a coordinator
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// The lock registry shared by this coordinator
    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// The conversation store shared by this coordinator
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// The configuration this coordinator was built with
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Begin a turn: acquire the conversation's lock and fetch its state.
    ///
    /// Returns `None` on contention, which is not an error: another
    /// operation holds the lock, and the caller decides whether to retry,
    /// queue, or reject the turn. On success the conversation's processing
    /// flag is set; the caller must pair this with [`Coordinator::end_turn`].
    pub async fn try_begin_turn(
        &self,
        key: &ConversationKey,
        channel_id: &str,
        user_id: Option<&str>,
        wait: Option<Duration>,
    ) -> Option<SharedConversation> {
        if !self.locks.try_acquire(key, wait).await {
            return None;
        }

        let conversation = self.store.get_or_create(key, channel_id, user_id).await;
        conversation.write().await.is_processing = true;
        Some(conversation)
    }

    /// End a turn: clear the processing flag and release the lock
    pub async fn end_turn(&self, key: &ConversationKey) {
        self.store.set_processing(key, false).await;
        self.locks.release(key);
    }

    /// Stop the watchdog and tear the coordinator down
    pub async fn shutdown(self) {
        if let Some(watchdog) = self.watchdog {
            watchdog.shutdown().await;
        }
        debug!("coordinator shut down");
    }
}

/// Builder for [`Coordinator`]
pub struct CoordinatorBuilder {
    config: CoreConfig,
    backend: Option<Arc<dyn ThreadBackend>>,
    spawn_watchdog: bool,
}

impl CoordinatorBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
            backend: None,
            spawn_watchdog: true,
        }
    }

    /// Set the core configuration
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a persistence collaborator
    pub fn backend(mut self, backend: Arc<dyn ThreadBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Skip spawning the background watchdog; callers drive recovery
    /// themselves
    pub fn without_watchdog(mut self) -> Self {
        self.spawn_watchdog = false;
        self
    }

    /// Build the coordinator, spawning the watchdog unless disabled.
    ///
    /// Must be called from within a Tokio runtime when the watchdog is
    /// enabled.
    pub fn build(self) -> Coordinator {
        let locks = Arc::new(LockRegistry::new());

        let mut store = ConversationStore::new(
            self.config.model.clone(),
            self.config.max_history_tokens,
        );
        if let Some(backend) = self.backend {
            store = store.with_backend(backend);
        }
        let store = Arc::new(store);

        let watchdog = if self.spawn_watchdog {
            Some(Watchdog::new(locks.clone(), store.clone(), self.config.watchdog()).spawn())
        } else {
            None
        };

        Coordinator {
            config: self.config,
            locks,
            store,
            watchdog,
        }
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
