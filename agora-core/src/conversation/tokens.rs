//! Token cost estimation
//!
//! Heuristic accounting that only has to track a model's real limits closely
//! enough to avoid request-rejection failures. Costs are character-ratio
//! based with fixed structural overheads; image payloads are priced with a
//! flat surcharge because image token accounting is an approximation on
//! every provider.

use once_cell::sync::Lazy;
use tracing::debug;

use super::message::Message;

/// Fixed structural overhead charged per message (role framing, separators)
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Fixed overhead charged once per conversation (reply priming)
const CONVERSATION_OVERHEAD: usize = 3;

/// Flat surcharge per embedded image payload, dominated by a constant tile
/// estimate rather than the exact encoding
const IMAGE_SURCHARGE: usize = 850;

/// Chars-per-token ratio used when the model family is unknown
const DEFAULT_CHARS_PER_TOKEN: usize = 4;

struct ModelFamily {
    prefix: &'static str,
    chars_per_token: usize,
    context_window: usize,
}

/// Known model families, matched by identifier prefix in order
static MODEL_FAMILIES: Lazy<Vec<ModelFamily>> = Lazy::new(|| {
    vec![
        ModelFamily {
            prefix: "gpt-4.1",
            chars_per_token: 4,
            context_window: 1_000_000,
        },
        ModelFamily {
            prefix: "gpt-4o",
            chars_per_token: 4,
            context_window: 128_000,
        },
        ModelFamily {
            prefix: "gpt-4",
            chars_per_token: 4,
            context_window: 128_000,
        },
        ModelFamily {
            prefix: "o1",
            chars_per_token: 4,
            context_window: 200_000,
        },
        ModelFamily {
            prefix: "o3",
            chars_per_token: 4,
            context_window: 200_000,
        },
        ModelFamily {
            prefix: "claude-",
            chars_per_token: 4,
            context_window: 200_000,
        },
        ModelFamily {
            prefix: "llama-3",
            chars_per_token: 4,
            context_window: 128_000,
        },
    ]
});

fn family_for(model: &str) -> Option<&'static ModelFamily> {
    MODEL_FAMILIES.iter().find(|f| model.starts_with(f.prefix))
}

/// Token cost estimator for one model identifier
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    model: String,
    chars_per_token: usize,
}

impl TokenEstimator {
    /// Build an estimator for a model identifier.
    ///
    /// Unknown models fall back to a coarse length-based ratio rather than
    /// failing; the estimate degrades, the append does not.
    pub fn for_model(model: &str) -> Self {
        let chars_per_token = match family_for(model) {
            Some(family) => family.chars_per_token,
            None => {
                debug!(model, "unknown model family, using coarse token ratio");
                DEFAULT_CHARS_PER_TOKEN
            }
        };
        Self {
            model: model.to_string(),
            chars_per_token,
        }
    }

    /// Model identifier this estimator was built for
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Context window for a model identifier, when the family is known
    pub fn context_window(model: &str) -> Option<usize> {
        family_for(model).map(|f| f.context_window)
    }

    fn text_cost(&self, text: &str) -> usize {
        text.len().div_ceil(self.chars_per_token)
    }

    /// Estimated cost of a single message: role name, content, fixed
    /// structural overhead, and the per-image surcharge
    pub fn message_cost(&self, message: &Message) -> usize {
        self.text_cost(message.role.as_str())
            + self.text_cost(&message.content)
            + PER_MESSAGE_OVERHEAD
            + message.embedded_image_count() * IMAGE_SURCHARGE
    }

    /// Estimated cost of a full message list, including the fixed
    /// conversation overhead
    pub fn conversation_cost(&self, messages: &[Message]) -> usize {
        CONVERSATION_OVERHEAD
            + messages
                .iter()
                .map(|m| self.message_cost(m))
                .sum::<usize>()
    }
}
