//! Input-token budget enforcement
//!
//! Trims a conversation until it fits a deployment's input-token limit by
//! repeatedly discarding everything before the second user turn. The cut
//! always removes a leading slice, so ordering is preserved and the sequence
//! only ever shrinks. When fewer than two user turns remain, the oversized
//! conversation is dispatched as-is and the provider reports the final error.

use crate::message::{Message, MessageRole};

/// Upper bound on trim iterations; each cut shortens the sequence, so this is
/// only a guard against a pathological counter
const MAX_TRIM_PASSES: usize = 128;

/// Trim `messages` until `counter` reports a total within `max_input_tokens`
///
/// The counter is supplied by the selected provider adapter so accounting
/// follows the deployment being dispatched to.
pub fn fit<F>(mut messages: Vec<Message>, counter: F, max_input_tokens: usize) -> Vec<Message>
where
    F: Fn(&[Message]) -> usize,
{
    if messages.is_empty() {
        return messages;
    }

    for _ in 0..MAX_TRIM_PASSES {
        if counter(&messages) <= max_input_tokens {
            break;
        }
        let before = messages.len();
        messages = truncate_once(messages);
        if messages.len() == before {
            // Fewer than two user turns left; nothing more can be cut
            break;
        }
    }
    messages
}

/// Apply a single truncation step: drop everything strictly before the second
/// user-role message, if one exists
#[must_use]
pub fn truncate_once(mut messages: Vec<Message>) -> Vec<Message> {
    let mut user_indices = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == MessageRole::User)
        .map(|(i, _)| i);

    let _first = user_indices.next();
    if let Some(second) = user_indices.next() {
        messages.drain(..second);
    }
    messages
}
