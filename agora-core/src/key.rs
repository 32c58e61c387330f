//! Conversation identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable composite identifier for one conversation thread.
///
/// The key pairs the channel a thread lives in with the timestamp that
/// anchors the thread inside that channel. Keys are opaque to every
/// registry that uses them and are never reused across distinct
/// conversations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    /// Channel the conversation belongs to
    pub channel: String,
    /// Timestamp anchoring the conversation within the channel
    pub timestamp: String,
}

impl ConversationKey {
    /// Create a new conversation key
    pub fn new(channel: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            timestamp: timestamp.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.timestamp)
    }
}
