//! Persistence collaborator for durable conversation storage
//!
//! The core treats persistence as an external, fallible collaborator:
//! the durable store is the source of truth and memory is a working copy.
//! Every method here is fallible I/O, and callers degrade to
//! in-memory-only behavior on failure instead of aborting the operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::conversation::{Message, MessageRole};
use crate::error::Result;
use crate::key::ConversationKey;

/// Durable record for a conversation thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    /// Key of the conversation
    pub key: ConversationKey,
    /// Channel the conversation lives in
    pub channel_id: String,
    /// User who started the conversation, when known
    pub user_id: Option<String>,
    /// When the thread record was first created
    pub created_at: DateTime<Utc>,
}

/// A message row returned from the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMessage {
    /// Sender role
    pub role: MessageRole,
    /// Message text
    pub content: String,
    /// Platform metadata carried alongside the row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<CachedMessage> for Message {
    fn from(cached: CachedMessage) -> Self {
        Self {
            role: cached.role,
            content: cached.content,
            metadata: cached.metadata,
        }
    }
}

/// The persistence collaborator trait
#[async_trait]
pub trait ThreadBackend: Send + Sync {
    /// Fetch or create the durable record for a thread
    async fn get_or_create_thread(
        &self,
        key: &ConversationKey,
        channel_id: &str,
        user_id: Option<&str>,
    ) -> Result<ThreadRecord>;

    /// Stored config overrides for a thread, if any
    async fn get_thread_config(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<HashMap<String, serde_json::Value>>>;

    /// Persist the full set of config overrides for a thread
    async fn save_thread_config(
        &self,
        key: &ConversationKey,
        config: &HashMap<String, serde_json::Value>,
    ) -> Result<()>;

    /// Cached message history for a thread, oldest first
    async fn get_cached_messages(&self, key: &ConversationKey) -> Result<Vec<CachedMessage>>;

    /// Append one message to the thread's durable history
    async fn cache_message(
        &self,
        key: &ConversationKey,
        role: MessageRole,
        content: &str,
        message_ref: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()>;

    /// Drop the `count` oldest rows from the thread's durable history
    async fn delete_oldest_messages(&self, key: &ConversationKey, count: usize) -> Result<()>;

    /// Bump the thread's activity timestamp
    async fn update_thread_activity(&self, key: &ConversationKey) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredMessage {
    role: MessageRole,
    content: String,
    #[allow(dead_code)]
    message_ref: Option<String>,
    metadata: Option<serde_json::Value>,
}

/// In-memory backend for testing and lightweight deployments
#[derive(Default)]
pub struct InMemoryThreadBackend {
    threads: RwLock<HashMap<ConversationKey, ThreadRecord>>,
    configs: RwLock<HashMap<ConversationKey, HashMap<String, serde_json::Value>>>,
    messages: RwLock<HashMap<ConversationKey, Vec<StoredMessage>>>,
}

impl InMemoryThreadBackend {
    /// Create an empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadBackend for InMemoryThreadBackend {
    async fn get_or_create_thread(
        &self,
        key: &ConversationKey,
        channel_id: &str,
        user_id: Option<&str>,
    ) -> Result<ThreadRecord> {
        let mut threads = self.threads.write().unwrap();
        let record = threads.entry(key.clone()).or_insert_with(|| ThreadRecord {
            key: key.clone(),
            channel_id: channel_id.to_string(),
            user_id: user_id.map(|u| u.to_string()),
            created_at: Utc::now(),
        });
        Ok(record.clone())
    }

    async fn get_thread_config(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<HashMap<String, serde_json::Value>>> {
        let configs = self.configs.read().unwrap();
        Ok(configs.get(key).cloned())
    }

    async fn save_thread_config(
        &self,
        key: &ConversationKey,
        config: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let mut configs = self.configs.write().unwrap();
        configs.insert(key.clone(), config.clone());
        Ok(())
    }

    async fn get_cached_messages(&self, key: &ConversationKey) -> Result<Vec<CachedMessage>> {
        let messages = self.messages.read().unwrap();
        Ok(messages
            .get(key)
            .map(|rows| {
                rows.iter()
                    .map(|row| CachedMessage {
                        role: row.role,
                        content: row.content.clone(),
                        metadata: row.metadata.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn cache_message(
        &self,
        key: &ConversationKey,
        role: MessageRole,
        content: &str,
        message_ref: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        messages.entry(key.clone()).or_default().push(StoredMessage {
            role,
            content: content.to_string(),
            message_ref: message_ref.map(|r| r.to_string()),
            metadata: metadata.cloned(),
        });
        Ok(())
    }

    async fn delete_oldest_messages(&self, key: &ConversationKey, count: usize) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        if let Some(rows) = messages.get_mut(key) {
            let count = count.min(rows.len());
            rows.drain(..count);
        }
        Ok(())
    }

    async fn update_thread_activity(&self, key: &ConversationKey) -> Result<()> {
        // activity is derived from the in-memory state in this backend
        let _ = key;
        Ok(())
    }
}
