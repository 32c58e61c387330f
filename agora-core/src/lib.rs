//! # Agora - Conversation Coordination Core
//!
//! Agora coordinates concurrent access to long-lived, per-conversation state
//! in a multi-user chat service:
//! - Per-thread mutual-exclusion locks with acquisition bookkeeping
//! - A background watchdog that recovers locks abandoned by hung operations
//! - An in-memory conversation store with optional write-through persistence
//! - Token-budget trimming that keeps history inside a model context limit
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agora_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let coordinator = Coordinator::builder()
//!         .config(CoreConfig::default())
//!         .build();
//!
//!     let key = ConversationKey::new("C024BE91L", "1724968542.000300");
//!     if let Some(conversation) = coordinator
//!         .try_begin_turn(&key, "C024BE91L", Some("U42"), None)
//!         .await
//!     {
//!         let timed_out = conversation.write().await.take_timeout_notice();
//!         if timed_out {
//!             // surface the recovery notice to the user
//!         }
//!         let _ = coordinator
//!             .store()
//!             .append_message(&key, MessageRole::User, "Hello!", None)
//!             .await;
//!         coordinator.end_turn(&key).await;
//!     }
//!
//!     coordinator.shutdown().await;
//! }
//! ```
//!
//! ## Architecture
//!
//! The lock registry and the conversation store are independent registries
//! correlated only by [`key::ConversationKey`] values; the watchdog
//! reconciles the two when it recovers a stuck lock. Per-conversation
//! operations are serialized by the conversation's lock while operations on
//! different keys proceed fully in parallel. Persistence is an injected
//! collaborator: failures degrade to in-memory behavior, they never abort
//! the caller's operation.

pub mod config;
pub mod conversation;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod locks;
pub mod persistence;
pub mod watchdog;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CoreConfig, WatchdogConfig};
    pub use crate::conversation::{
        ConversationState, ConversationStore, Message, MessageRole, SharedConversation,
        TokenEstimator, TrimOutcome, trim_to_budget,
    };
    pub use crate::coordinator::{Coordinator, CoordinatorBuilder};
    pub use crate::error::{AgoraError, Result};
    pub use crate::key::ConversationKey;
    pub use crate::locks::LockRegistry;
    pub use crate::persistence::{
        CachedMessage, InMemoryThreadBackend, ThreadBackend, ThreadRecord,
    };
    pub use crate::watchdog::{Watchdog, WatchdogHandle};
}
