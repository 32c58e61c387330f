//! Conversation state store
//!
//! In-memory registry of per-conversation state with optional write-through
//! and read-through to a persistence collaborator. The store's own lock
//! guards only map structure; per-conversation payloads live behind their
//! own locks, and no persistence call happens while a map lock is held.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AgoraError, Result};
use crate::key::ConversationKey;
use crate::persistence::ThreadBackend;

use super::message::{Message, MessageRole};
use super::state::ConversationState;
use super::tokens::TokenEstimator;
use super::trim::{TrimOutcome, trim_to_budget};

/// Shared handle to one conversation's state
pub type SharedConversation = Arc<RwLock<ConversationState>>;

/// Registry of per-conversation state
pub struct ConversationStore {
    conversations: RwLock<HashMap<ConversationKey, SharedConversation>>,
    backend: Option<Arc<dyn ThreadBackend>>,
    default_model: String,
    max_history_tokens: Option<usize>,
}

impl ConversationStore {
    /// Create a store with no persistence collaborator
    pub fn new(default_model: impl Into<String>, max_history_tokens: Option<usize>) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            backend: None,
            default_model: default_model.into(),
            max_history_tokens,
        }
    }

    /// Attach a persistence collaborator for write-through durability
    pub fn with_backend(mut self, backend: Arc<dyn ThreadBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Fetch or lazily create the state for a conversation.
    ///
    /// New entries are hydrated from the persistence collaborator when one
    /// is configured; persistence is the source of truth and memory is the
    /// working copy. Config overrides are refreshed from persistence on
    /// every call so another process's writes are picked up, and the
    /// activity timestamp is touched. Persistence failures degrade to
    /// in-memory-only behavior.
    pub async fn get_or_create(
        &self,
        key: &ConversationKey,
        channel_id: &str,
        user_id: Option<&str>,
    ) -> SharedConversation {
        let existing = { self.conversations.read().await.get(key).cloned() };
        let conversation = match existing {
            Some(conversation) => conversation,
            None => {
                // Hydration happens outside the map lock. Two tasks may both
                // hydrate a fresh key; the entry() below keeps the first and
                // hydration of a fresh key has no divergent writers.
                let state = self.hydrate(key, channel_id, user_id).await;
                let mut conversations = self.conversations.write().await;
                conversations
                    .entry(key.clone())
                    .or_insert_with(|| {
                        debug!(%key, "created conversation state");
                        Arc::new(RwLock::new(state))
                    })
                    .clone()
            }
        };

        self.refresh(key, &conversation).await;
        conversation
    }

    /// Existing state for a conversation, if any
    pub async fn get(&self, key: &ConversationKey) -> Option<SharedConversation> {
        self.conversations.read().await.get(key).cloned()
    }

    async fn hydrate(
        &self,
        key: &ConversationKey,
        channel_id: &str,
        user_id: Option<&str>,
    ) -> ConversationState {
        let mut state = ConversationState::new(
            key.clone(),
            channel_id,
            user_id.map(|u| u.to_string()),
            self.default_model.clone(),
        );

        let Some(backend) = &self.backend else {
            return state;
        };

        match backend.get_or_create_thread(key, channel_id, user_id).await {
            Ok(record) => {
                if state.user_id.is_none() {
                    state.user_id = record.user_id;
                }
            }
            Err(error) => {
                warn!(%key, %error, "persistence unavailable, starting conversation in memory only");
            }
        }

        match backend.get_cached_messages(key).await {
            Ok(cached) if !cached.is_empty() => {
                debug!(%key, count = cached.len(), "hydrated cached message history");
                state.messages = cached.into_iter().map(Message::from).collect();
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%key, %error, "failed to hydrate cached messages");
            }
        }

        state
    }

    async fn refresh(&self, key: &ConversationKey, conversation: &SharedConversation) {
        let fetched = match &self.backend {
            Some(backend) => match backend.get_thread_config(key).await {
                Ok(config) => config,
                Err(error) => {
                    warn!(%key, %error, "failed to refresh thread config");
                    None
                }
            },
            None => None,
        };

        {
            let mut state = conversation.write().await;
            if let Some(config) = fetched {
                state.merge_overrides(&config);
            }
            state.touch();
        }

        if let Some(backend) = &self.backend {
            if let Err(error) = backend.update_thread_activity(key).await {
                warn!(%key, %error, "failed to update thread activity");
            }
        }
    }

    /// Append a message to a conversation's history.
    ///
    /// When a token budget is configured the history is trimmed immediately
    /// after the append, so the budget check always sees the post-append
    /// list. The message is written through to persistence, and rows evicted
    /// by trimming are deleted from the durable history as well.
    pub async fn append_message(
        &self,
        key: &ConversationKey,
        role: MessageRole,
        content: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<TrimOutcome> {
        let conversation = self
            .get(key)
            .await
            .ok_or_else(|| AgoraError::ConversationNotFound(key.to_string()))?;

        let content = content.into();
        let message_ref = Uuid::new_v4().to_string();

        let outcome = {
            let mut state = conversation.write().await;
            state.messages.push(Message {
                role,
                content: content.clone(),
                metadata: metadata.clone(),
            });
            state.touch();

            let estimator = TokenEstimator::for_model(&state.current_model);
            match self.max_history_tokens {
                Some(budget) => trim_to_budget(&mut state.messages, budget, &estimator, true),
                None => TrimOutcome {
                    removed: 0,
                    estimated_tokens: estimator.conversation_cost(&state.messages),
                },
            }
        };

        if let Some(backend) = &self.backend {
            if let Err(error) = backend
                .cache_message(key, role, &content, Some(&message_ref), metadata.as_ref())
                .await
            {
                warn!(%key, %error, "failed to write message through to persistence");
            }
            if outcome.removed > 0 {
                if let Err(error) = backend.delete_oldest_messages(key, outcome.removed).await {
                    warn!(%key, %error, "failed to delete trimmed messages from persistence");
                }
            }
        }

        Ok(outcome)
    }

    /// Merge option overrides into a conversation, last write wins
    pub async fn update_config(
        &self,
        key: &ConversationKey,
        overrides: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let conversation = self
            .get(key)
            .await
            .ok_or_else(|| AgoraError::ConversationNotFound(key.to_string()))?;

        let merged = {
            let mut state = conversation.write().await;
            state.merge_overrides(&overrides);
            state.touch();
            state.config_overrides.clone()
        };

        if let Some(backend) = &self.backend {
            if let Err(error) = backend.save_thread_config(key, &merged).await {
                warn!(%key, %error, "failed to write thread config through to persistence");
            }
        }

        Ok(())
    }

    /// Set the processing flag for a conversation, touching its activity.
    ///
    /// Returns whether the conversation existed.
    pub async fn set_processing(&self, key: &ConversationKey, processing: bool) -> bool {
        match self.get(key).await {
            Some(conversation) => {
                let mut state = conversation.write().await;
                state.is_processing = processing;
                state.touch();
                true
            }
            None => false,
        }
    }

    /// Reconcile a conversation after a forced lock recovery.
    ///
    /// Clears the processing flag and leaves a timeout notice for the next
    /// operation to surface. This is the watchdog's narrowly-scoped write,
    /// performed without holding the conversation's lock; it only fires
    /// during already-abnormal conditions. Returns false when the
    /// conversation no longer exists, which callers skip silently.
    pub async fn mark_timed_out(&self, key: &ConversationKey) -> bool {
        match self.get(key).await {
            Some(conversation) => {
                let mut state = conversation.write().await;
                state.is_processing = false;
                state.had_timeout = true;
                true
            }
            None => false,
        }
    }

    /// Evict conversations idle longer than `max_age`.
    ///
    /// A conversation is never evicted while its processing flag is set.
    /// Returns the number of conversations removed.
    pub async fn reap_idle(&self, max_age: Duration) -> usize {
        let snapshot: Vec<(ConversationKey, SharedConversation)> = {
            self.conversations
                .read()
                .await
                .iter()
                .map(|(key, conversation)| (key.clone(), conversation.clone()))
                .collect()
        };

        let mut expired = Vec::new();
        for (key, conversation) in snapshot {
            let state = conversation.read().await;
            if !state.is_processing && state.idle_longer_than(max_age) {
                expired.push(key);
            }
        }
        if expired.is_empty() {
            return 0;
        }

        let mut conversations = self.conversations.write().await;
        let mut removed = 0;
        for key in expired {
            // re-check under the map lock; an operation may have started
            // since the snapshot
            let still_idle = conversations
                .get(&key)
                .and_then(|c| c.try_read().ok())
                .map(|state| !state.is_processing && state.idle_longer_than(max_age))
                .unwrap_or(false);
            if still_idle {
                conversations.remove(&key);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "reaped idle conversations");
        }
        removed
    }

    /// Number of conversations currently held in memory
    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    /// Whether the store holds no conversations
    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}
