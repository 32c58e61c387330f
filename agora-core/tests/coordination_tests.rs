//! Integration tests for the coordination core
//!
//! These exercise the lock registry, conversation store, trimmer, and
//! watchdog together the way a chat-service caller would drive them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use agora_core::persistence::{CachedMessage, ThreadRecord};
use agora_core::prelude::*;
use async_trait::async_trait;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn key() -> ConversationKey {
    ConversationKey::new("C024BE91L", "1724968542.000300")
}

fn config() -> CoreConfig {
    CoreConfig {
        max_history_tokens: Some(1_000_000),
        ..Default::default()
    }
}

#[tokio::test]
async fn normal_turn_appends_without_trimming() {
    init_tracing();
    let coordinator = Coordinator::builder().config(config()).build();

    let conversation = coordinator
        .try_begin_turn(&key(), "C024BE91L", Some("U42"), None)
        .await
        .expect("fresh conversation should acquire");

    let first = coordinator
        .store()
        .append_message(&key(), MessageRole::User, "Hello", None)
        .await
        .unwrap();
    let second = coordinator
        .store()
        .append_message(&key(), MessageRole::Assistant, "Hi there", None)
        .await
        .unwrap();

    assert_eq!(first.removed, 0);
    assert_eq!(second.removed, 0);

    {
        let state = conversation.read().await;
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].content, "Hello");
        assert_eq!(state.messages[1].content, "Hi there");
    }

    coordinator.end_turn(&key()).await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn contention_then_recovery() {
    init_tracing();
    let coordinator = Coordinator::builder()
        .config(config())
        .without_watchdog()
        .build();

    // first caller wins
    let held = coordinator.try_begin_turn(&key(), "C024BE91L", None, None).await;
    assert!(held.is_some());

    // second caller is rejected without blocking
    assert!(
        coordinator
            .try_begin_turn(&key(), "C024BE91L", None, None)
            .await
            .is_none()
    );

    // after release, the next attempt succeeds
    coordinator.end_turn(&key()).await;
    assert!(
        coordinator
            .try_begin_turn(&key(), "C024BE91L", None, None)
            .await
            .is_some()
    );

    coordinator.end_turn(&key()).await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn conversations_are_isolated() {
    init_tracing();
    let coordinator = Coordinator::builder()
        .config(config())
        .without_watchdog()
        .build();

    let other = ConversationKey::new("C024BE91L", "1724968600.000100");

    // holding one conversation's lock never blocks another conversation
    assert!(
        coordinator
            .try_begin_turn(&key(), "C024BE91L", None, None)
            .await
            .is_some()
    );
    assert!(
        coordinator
            .try_begin_turn(&other, "C024BE91L", None, None)
            .await
            .is_some()
    );

    coordinator.end_turn(&key()).await;
    coordinator.end_turn(&other).await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn overflow_evicts_oldest_but_keeps_system_message() {
    init_tracing();
    let store = ConversationStore::new("gpt-4o", Some(600));
    store.get_or_create(&key(), "C024BE91L", None).await;

    store
        .append_message(
            &key(),
            MessageRole::System,
            "You are a terse, helpful assistant.",
            None,
        )
        .await
        .unwrap();

    let mut total_removed = 0;
    for i in 0..51 {
        let user = store
            .append_message(
                &key(),
                MessageRole::User,
                format!("question {i}: {}", "lorem ipsum ".repeat(10)),
                None,
            )
            .await
            .unwrap();
        let assistant = store
            .append_message(
                &key(),
                MessageRole::Assistant,
                format!("answer {i}: {}", "dolor sit amet ".repeat(10)),
                None,
            )
            .await
            .unwrap();
        total_removed += user.removed + assistant.removed;
    }
    assert!(total_removed > 0);

    let conversation = store.get(&key()).await.unwrap();
    let state = conversation.read().await;

    // the leading system message survives every eviction pass
    assert_eq!(state.messages[0].role, MessageRole::System);
    // the current turn is present
    assert!(state.messages.last().unwrap().content.starts_with("answer 50"));

    let estimator = TokenEstimator::for_model("gpt-4o");
    assert!(estimator.conversation_cost(&state.messages) <= 600);
}

#[tokio::test(start_paused = true)]
async fn watchdog_sweep_recovers_abandoned_turn() {
    init_tracing();
    let coordinator = Coordinator::builder()
        .config(CoreConfig {
            operation_timeout: Duration::from_secs(30),
            recovery_buffer: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(5),
            ..config()
        })
        .build();

    // a turn begins and its operation hangs without ever calling end_turn
    let abandoned = coordinator
        .try_begin_turn(&key(), "C024BE91L", None, None)
        .await;
    assert!(abandoned.is_some());

    // well past max lock duration plus several scan intervals
    tokio::time::sleep(Duration::from_secs(60)).await;

    // a new caller can acquire, and the recovery notice is waiting
    let conversation = coordinator
        .try_begin_turn(&key(), "C024BE91L", None, None)
        .await
        .expect("recovered lock should be acquirable");

    let timed_out = conversation.write().await.take_timeout_notice();
    assert!(timed_out);
    assert!(!conversation.write().await.take_timeout_notice());

    coordinator.end_turn(&key()).await;
    coordinator.shutdown().await;
}

/// Backend where every call fails, standing in for an unreachable store
struct FailingBackend;

#[async_trait]
impl ThreadBackend for FailingBackend {
    async fn get_or_create_thread(
        &self,
        _key: &ConversationKey,
        _channel_id: &str,
        _user_id: Option<&str>,
    ) -> Result<ThreadRecord> {
        Err(AgoraError::Persistence("store unreachable".to_string()))
    }

    async fn get_thread_config(
        &self,
        _key: &ConversationKey,
    ) -> Result<Option<HashMap<String, serde_json::Value>>> {
        Err(AgoraError::Persistence("store unreachable".to_string()))
    }

    async fn save_thread_config(
        &self,
        _key: &ConversationKey,
        _config: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        Err(AgoraError::Persistence("store unreachable".to_string()))
    }

    async fn get_cached_messages(&self, _key: &ConversationKey) -> Result<Vec<CachedMessage>> {
        Err(AgoraError::Persistence("store unreachable".to_string()))
    }

    async fn cache_message(
        &self,
        _key: &ConversationKey,
        _role: MessageRole,
        _content: &str,
        _message_ref: Option<&str>,
        _metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        Err(AgoraError::Persistence("store unreachable".to_string()))
    }

    async fn delete_oldest_messages(&self, _key: &ConversationKey, _count: usize) -> Result<()> {
        Err(AgoraError::Persistence("store unreachable".to_string()))
    }

    async fn update_thread_activity(&self, _key: &ConversationKey) -> Result<()> {
        Err(AgoraError::Persistence("store unreachable".to_string()))
    }
}

#[tokio::test]
async fn persistence_failure_degrades_to_memory_only() {
    init_tracing();
    let coordinator = Coordinator::builder()
        .config(config())
        .backend(Arc::new(FailingBackend))
        .without_watchdog()
        .build();

    // the turn proceeds even though every persistence call fails
    let conversation = coordinator
        .try_begin_turn(&key(), "C024BE91L", None, None)
        .await
        .expect("degraded persistence must not block the turn");

    coordinator
        .store()
        .append_message(&key(), MessageRole::User, "still works", None)
        .await
        .unwrap();

    assert_eq!(conversation.read().await.messages.len(), 1);

    let mut overrides = HashMap::new();
    overrides.insert("tone".to_string(), serde_json::json!("casual"));
    coordinator
        .store()
        .update_config(&key(), overrides)
        .await
        .unwrap();

    assert_eq!(
        conversation.read().await.override_value("tone"),
        Some(&serde_json::json!("casual"))
    );

    coordinator.end_turn(&key()).await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn durable_history_follows_memory_after_trimming() {
    init_tracing();
    let backend = Arc::new(InMemoryThreadBackend::new());
    let store = ConversationStore::new("gpt-4o", Some(300)).with_backend(backend.clone());
    store.get_or_create(&key(), "C024BE91L", None).await;

    for i in 0..40 {
        store
            .append_message(
                &key(),
                MessageRole::User,
                format!("turn {i} {}", "padding ".repeat(12)),
                None,
            )
            .await
            .unwrap();
    }

    let conversation = store.get(&key()).await.unwrap();
    let in_memory: Vec<String> = conversation
        .read()
        .await
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect();
    let durable: Vec<String> = backend
        .get_cached_messages(&key())
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();

    assert_eq!(in_memory, durable);
}

#[tokio::test]
async fn hydration_restores_history_across_restarts() {
    init_tracing();
    let backend = Arc::new(InMemoryThreadBackend::new());

    {
        let store = ConversationStore::new("gpt-4o", None).with_backend(backend.clone());
        store.get_or_create(&key(), "C024BE91L", Some("U42")).await;
        store
            .append_message(&key(), MessageRole::User, "before restart", None)
            .await
            .unwrap();
    }

    // a new store simulates a fresh process sharing the same durable store
    let store = ConversationStore::new("gpt-4o", None).with_backend(backend);
    let conversation = store.get_or_create(&key(), "C024BE91L", None).await;

    let state = conversation.read().await;
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].content, "before restart");
}
