//! Conversation memory: the bounded, append-only history of one session.
//!
//! Two retention bounds apply: a maximum number of turns and a maximum
//! estimated token count. When either is exceeded the oldest turns are
//! evicted first. The most recent turn is always kept, even if it alone
//! is over the token bound.

use std::collections::VecDeque;

use backpacker_core::message::Turn;
use tracing::debug;

use super::token;

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    max_turns: usize,
    max_tokens: usize,
    tokens: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize, max_tokens: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
            max_tokens,
            tokens: 0,
        }
    }

    /// Append a turn, then evict from the front until both bounds hold.
    pub fn append(&mut self, turn: Turn) {
        self.tokens += token::estimate_turn_tokens(&turn);
        self.turns.push_back(turn);

        let mut evicted = 0;
        while self.turns.len() > 1
            && (self.turns.len() > self.max_turns || self.tokens > self.max_tokens)
        {
            if let Some(old) = self.turns.pop_front() {
                self.tokens -= token::estimate_turn_tokens(&old);
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, retained = self.turns.len(), "Conversation memory trimmed");
        }
    }

    /// The retained history, oldest first.
    pub fn window(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Estimated tokens currently held.
    pub fn token_count(&self) -> usize {
        self.tokens
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.tokens = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backpacker_core::message::TurnRole;

    fn texts(memory: &ConversationMemory) -> Vec<String> {
        memory.window().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn window_preserves_append_order() {
        let mut memory = ConversationMemory::new(10, 10_000);
        memory.append(Turn::user("weather in Hobart?"));
        memory.append(Turn::assistant("Sunny, 18°C."));

        let window = memory.window();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].role, TurnRole::User);
        assert_eq!(window[1].role, TurnRole::Assistant);
    }

    #[test]
    fn turn_bound_evicts_oldest_first() {
        let mut memory = ConversationMemory::new(3, 10_000);
        for i in 0..5 {
            memory.append(Turn::user(format!("turn {i}")));
        }
        assert_eq!(texts(&memory), vec!["turn 2", "turn 3", "turn 4"]);
    }

    #[test]
    fn token_bound_evicts_oldest_first() {
        // Each 40-char turn costs 10 + 4 overhead = 14 tokens.
        let mut memory = ConversationMemory::new(100, 30);
        memory.append(Turn::user("a".repeat(40)));
        memory.append(Turn::assistant("b".repeat(40)));
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.token_count(), 28);

        memory.append(Turn::user("c".repeat(40)));
        assert_eq!(memory.len(), 2);
        assert!(texts(&memory)[0].starts_with('b'));
        assert_eq!(memory.token_count(), 28);
    }

    #[test]
    fn oversized_latest_turn_is_kept() {
        let mut memory = ConversationMemory::new(10, 5);
        memory.append(Turn::user("short"));
        memory.append(Turn::assistant("x".repeat(400)));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.window()[0].role, TurnRole::Assistant);
    }

    #[test]
    fn clear_resets_token_count() {
        let mut memory = ConversationMemory::new(10, 1000);
        memory.append(Turn::user("hello there"));
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.token_count(), 0);
    }
}
