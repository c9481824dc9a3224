//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Good enough
//! to bound conversation memory without pulling in a tokenizer.

use backpacker_core::message::{Message, Turn};

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Per-message overhead for role name and delimiters in the wire format.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate tokens for one remembered turn, including message overhead.
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&turn.text)
}

/// Estimate tokens for a slice of provider messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| MESSAGE_OVERHEAD + estimate_tokens(&m.content))
        .sum()
}
