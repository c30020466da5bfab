//! Token counting
//!
//! Uses tiktoken's cl100k_base encoding, which tracks the published token
//! accounting of the models the gateway routes to closely enough to size the
//! input budget. The provider remains the final arbiter of an oversized
//! request.

use crate::message::Message;
use tiktoken_rs::{cl100k_base, CoreBPE};

lazy_static::lazy_static! {
    /// Global tokenizer instance (initialized once, thread-safe)
    static ref TOKENIZER: CoreBPE = cl100k_base()
        .expect("cl100k_base tokenizer is a compile-time constant and should never fail");
}

/// Per-message structural overhead (role marker + separators)
const MESSAGE_OVERHEAD: usize = 6;

/// Per-conversation structural overhead (start/end tokens)
const CONVERSATION_OVERHEAD: usize = 3;

/// Token counter for estimating message token usage
///
/// Zero-cost wrapper around the global tokenizer instance.
#[derive(Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    /// Create a new token counter
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Count tokens in a string
    #[must_use]
    pub fn count_text(&self, text: &str) -> usize {
        TOKENIZER.encode_with_special_tokens(text).len()
    }

    /// Count tokens in a message, including role overhead
    #[must_use]
    pub fn count_message(&self, message: &Message) -> usize {
        self.count_text(&message.content) + MESSAGE_OVERHEAD
    }

    /// Count total tokens in a conversation
    ///
    /// An empty conversation counts as zero tokens by definition.
    #[must_use]
    pub fn count_conversation(&self, messages: &[Message]) -> usize {
        if messages.is_empty() {
            return 0;
        }
        messages
            .iter()
            .map(|m| self.count_message(m))
            .sum::<usize>()
            + CONVERSATION_OVERHEAD
    }
}
