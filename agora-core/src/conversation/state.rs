//! Per-conversation state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::key::ConversationKey;

use super::message::{Message, MessageRole};

/// In-memory state for one conversation thread.
///
/// Owned exclusively by the conversation store. The lock registry knows
/// nothing about this type; the two are correlated only by sharing
/// [`ConversationKey`] values, which is what lets the watchdog reconcile
/// processing flags without holding the actual lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    /// Key of this conversation
    pub key: ConversationKey,
    /// Channel the conversation lives in
    pub channel_id: String,
    /// User who started the conversation, when known
    pub user_id: Option<String>,
    /// Ordered message history; insertion order is conversational order
    pub messages: Vec<Message>,
    /// Per-conversation option overrides, last write wins
    pub config_overrides: HashMap<String, serde_json::Value>,
    /// Optional system prompt, logically first when present
    pub system_prompt: Option<String>,
    /// Updated on every read/write touch; drives idle eviction
    pub last_activity: DateTime<Utc>,
    /// True exactly while an operation holds this conversation's lock
    pub is_processing: bool,
    /// Set by the watchdog when it force-releases this conversation's lock
    pub had_timeout: bool,
    /// Model identifier in effect for this conversation
    pub current_model: String,
}

impl ConversationState {
    /// Create a fresh conversation state
    pub fn new(
        key: ConversationKey,
        channel_id: impl Into<String>,
        user_id: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            key,
            channel_id: channel_id.into(),
            user_id,
            messages: Vec::new(),
            config_overrides: HashMap::new(),
            system_prompt: None,
            last_activity: Utc::now(),
            is_processing: false,
            had_timeout: false,
            current_model: model.into(),
        }
    }

    /// Record activity on this conversation
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Whether the conversation has been idle longer than `max_age`
    pub fn idle_longer_than(&self, max_age: Duration) -> bool {
        (Utc::now() - self.last_activity)
            .to_std()
            .map(|idle| idle > max_age)
            .unwrap_or(false)
    }

    /// Consume the timeout notice left by the watchdog.
    ///
    /// Returns whether a forced recovery happened since the last call and
    /// clears the flag, so the notice is surfaced to the user exactly once.
    pub fn take_timeout_notice(&mut self) -> bool {
        std::mem::take(&mut self.had_timeout)
    }

    /// Merge option overrides, last write wins
    pub fn merge_overrides(&mut self, overrides: &HashMap<String, serde_json::Value>) {
        for (name, value) in overrides {
            self.config_overrides.insert(name.clone(), value.clone());
        }
    }

    /// Look up a single option override
    pub fn override_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.config_overrides.get(name)
    }

    /// Full message list with the system prompt, when present, logically first
    pub fn composed_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            out.push(Message::new(MessageRole::System, prompt.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}
