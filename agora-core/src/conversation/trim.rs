//! Token budget trimming
//!
//! FIFO eviction of the oldest non-preserved messages until a conversation's
//! history fits a token budget. Eviction from the front keeps the most recent
//! context, and re-running trim on an already-fitting list is a no-op.

use tracing::debug;

use super::message::Message;
use super::tokens::TokenEstimator;

/// Result of a trim pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimOutcome {
    /// Messages removed from the front of the eligible region
    pub removed: usize,
    /// Token estimate for the surviving list
    pub estimated_tokens: usize,
}

impl TrimOutcome {
    /// Whether the surviving list fits the given budget
    pub fn fits(&self, max_tokens: usize) -> bool {
        self.estimated_tokens <= max_tokens
    }
}

/// Trim `messages` in place until the estimate fits `max_tokens`.
///
/// Leading system/developer messages are never evicted while
/// `preserve_leading_system` is set. The last non-preserved message is never
/// evicted either, even if the budget is still exceeded: the active turn
/// must survive, so partial overflow is reported rather than forced to zero.
pub fn trim_to_budget(
    messages: &mut Vec<Message>,
    max_tokens: usize,
    estimator: &TokenEstimator,
    preserve_leading_system: bool,
) -> TrimOutcome {
    let mut estimate = estimator.conversation_cost(messages);
    if estimate <= max_tokens {
        return TrimOutcome {
            removed: 0,
            estimated_tokens: estimate,
        };
    }

    let start_index = if preserve_leading_system {
        messages
            .iter()
            .take_while(|m| m.role.is_system_like())
            .count()
    } else {
        0
    };

    let mut removed = 0;
    while estimate > max_tokens && messages.len() > start_index + 1 {
        messages.remove(start_index);
        removed += 1;
        estimate = estimator.conversation_cost(messages);
    }

    if removed > 0 {
        debug!(
            removed,
            estimated_tokens = estimate,
            "trimmed conversation history to token budget"
        );
    }
    if estimate > max_tokens {
        debug!(
            estimated_tokens = estimate,
            max_tokens, "history still exceeds budget after trimming"
        );
    }

    TrimOutcome {
        removed,
        estimated_tokens: estimate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::message::MessageRole;

    fn estimator() -> TokenEstimator {
        TokenEstimator::for_model("gpt-4o")
    }

    fn turn(i: usize) -> Message {
        Message::new(
            MessageRole::User,
            format!("message number {i} with some padding text attached"),
        )
    }

    #[test]
    fn test_under_budget_is_untouched() {
        let mut messages = vec![
            Message::new(MessageRole::User, "Hello"),
            Message::new(MessageRole::Assistant, "Hi there"),
        ];
        let outcome = trim_to_budget(&mut messages, 1_000_000, &estimator(), true);

        assert_eq!(outcome.removed, 0);
        assert_eq!(messages.len(), 2);
        assert!(outcome.fits(1_000_000));
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut messages: Vec<Message> = (0..20).map(turn).collect();
        let outcome = trim_to_budget(&mut messages, 100, &estimator(), true);

        assert!(outcome.removed > 0);
        // survivors are the most recent messages, in order
        assert!(messages[0].content.contains(&format!("number {}", outcome.removed)));
        assert!(messages.last().unwrap().content.contains("number 19"));
    }

    #[test]
    fn test_trim_is_idempotent() {
        let mut messages: Vec<Message> = (0..20).map(turn).collect();
        let first = trim_to_budget(&mut messages, 100, &estimator(), true);
        assert!(first.removed > 0);

        let survivors = messages.clone();
        let second = trim_to_budget(&mut messages, 100, &estimator(), true);
        assert_eq!(second.removed, 0);
        assert_eq!(messages.len(), survivors.len());
    }

    #[test]
    fn test_last_message_guard() {
        let mut messages = vec![Message::new(MessageRole::User, "x".repeat(4000))];
        let outcome = trim_to_budget(&mut messages, 10, &estimator(), true);

        assert_eq!(outcome.removed, 0);
        assert_eq!(messages.len(), 1);
        assert!(!outcome.fits(10));
    }

    #[test]
    fn test_leading_system_messages_survive() {
        let mut messages = vec![
            Message::new(MessageRole::System, "You are a helpful assistant"),
            Message::new(MessageRole::Developer, "Prefer short answers"),
        ];
        messages.extend((0..20).map(turn));

        let outcome = trim_to_budget(&mut messages, 120, &estimator(), true);

        assert!(outcome.removed > 0);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[1].role, MessageRole::Developer);
    }

    #[test]
    fn test_all_system_list_is_untouched() {
        let mut messages = vec![
            Message::new(MessageRole::System, "a ".repeat(500)),
            Message::new(MessageRole::System, "b ".repeat(500)),
        ];
        let outcome = trim_to_budget(&mut messages, 10, &estimator(), true);

        assert_eq!(outcome.removed, 0);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_preservation_can_be_disabled() {
        let mut messages = vec![Message::new(MessageRole::System, "prompt ".repeat(100))];
        messages.extend((0..5).map(turn));

        trim_to_budget(&mut messages, 80, &estimator(), false);
        assert_ne!(messages[0].role, MessageRole::System);
    }

    #[test]
    fn test_guard_with_preserved_prefix() {
        // one system message plus one oversized user turn: nothing removable
        let mut messages = vec![
            Message::new(MessageRole::System, "short prompt"),
            Message::new(MessageRole::User, "y".repeat(4000)),
        ];
        let outcome = trim_to_budget(&mut messages, 50, &estimator(), true);

        assert_eq!(outcome.removed, 0);
        assert_eq!(messages.len(), 2);
    }
}
