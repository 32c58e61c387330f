//! Conversation messages

use serde::{Deserialize, Serialize};

/// Marker that identifies an inline image payload in message content
const IMAGE_PAYLOAD_MARKER: &str = "data:image/";

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    Developer,
    User,
    Assistant,
}

impl MessageRole {
    /// Role name as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::Developer => "developer",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    /// Roles that anchor the conversation and are preserved by trimming
    pub fn is_system_like(&self) -> bool {
        matches!(self, MessageRole::System | MessageRole::Developer)
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message in a conversation.
///
/// Immutable once appended; trimming removes whole messages from the front
/// of the history, it never edits content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Sender role
    pub role: MessageRole,
    /// Message text
    pub content: String,
    /// Platform metadata (message refs, attached image blocks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Create a new message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: None,
        }
    }

    /// Attach platform metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Number of embedded image payloads carried by this message.
    ///
    /// Counts inline data URIs in the content plus image blocks attached
    /// through the `images` metadata array.
    pub fn embedded_image_count(&self) -> usize {
        let inline = self.content.matches(IMAGE_PAYLOAD_MARKER).count();
        let attached = self
            .metadata
            .as_ref()
            .and_then(|m| m.get("images"))
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        inline + attached
    }
}
