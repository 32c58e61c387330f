//! Conversation State Management
//!
//! Per-conversation message history, config overrides, and processing flags,
//! with token-budget trimming and optional write-through persistence.
//!
//! # Features
//!
//! - Lazy state creation with read-through hydration from a durable store
//! - Ordered message history with FIFO token-budget trimming
//! - Config override refresh on every access (last write wins)
//! - Idle eviction that never removes a conversation mid-operation
//!
//! # Example
//!
//! ```rust,ignore
//! use agora_core::conversation::{ConversationStore, MessageRole};
//!
//! let store = ConversationStore::new("gpt-4o", Some(120_000));
//! store.get_or_create(&key, "C024BE91L", None).await;
//! store.append_message(&key, MessageRole::User, "Hello!", None).await?;
//! ```

mod message;
mod state;
mod store;
mod tokens;
mod trim;

pub use message::{Message, MessageRole};
pub use state::ConversationState;
pub use store::{ConversationStore, SharedConversation};
pub use tokens::TokenEstimator;
pub use trim::{TrimOutcome, trim_to_budget};
