//! Per-turn transcript accumulation
//!
//! The realtime endpoint delivers captions in fragments: model speech on the
//! output side, recognized user speech on the input side. Fragments are
//! appended in arrival order and flushed into permanent messages exactly once
//! per turn, when the turn-complete signal arrives.

use crate::messages::{Message, MessageRole};

/// Buffers for the current turn, one per side.
///
/// A flush must never drop a fragment and never run twice for the same turn;
/// both properties hold because the session consumes events in arrival order
/// and `flush()` resets the buffers as part of the same step.
#[derive(Debug, Clone, Default)]
pub struct TurnTranscripts {
    user: String,
    model: String,
}

impl TurnTranscripts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user-side (input transcription) fragment.
    pub fn push_user(&mut self, fragment: &str) -> &str {
        self.user.push_str(fragment);
        &self.user
    }

    /// Append a model-side (output transcription) fragment.
    pub fn push_model(&mut self, fragment: &str) -> &str {
        self.model.push_str(fragment);
        &self.model
    }

    pub fn user_text(&self) -> &str {
        &self.user
    }

    pub fn model_text(&self) -> &str {
        &self.model
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }

    /// Turn boundary: convert both non-empty sides into messages, user first,
    /// and reset the buffers. Returns an empty vec for an empty turn.
    pub fn flush(&mut self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);

        if !self.user.is_empty() {
            messages.push(Message::new(
                MessageRole::User,
                std::mem::take(&mut self.user),
            ));
        }
        if !self.model.is_empty() {
            messages.push(Message::new(
                MessageRole::Assistant,
                std::mem::take(&mut self.model),
            ));
        }

        messages
    }

    /// Discard everything buffered (session teardown).
    pub fn clear(&mut self) {
        self.user.clear();
        self.model.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transcripts_are_empty() {
        let mut t = TurnTranscripts::new();
        assert!(t.is_empty());
        assert!(t.flush().is_empty());
    }

    #[test]
    fn test_fragments_concatenate_in_arrival_order() {
        let mut t = TurnTranscripts::new();
        t.push_model("Hello");
        t.push_model(" world");
        t.push_user("Hi");

        assert_eq!(t.model_text(), "Hello world");
        assert_eq!(t.user_text(), "Hi");
    }

    #[test]
    fn test_flush_emits_user_then_model() {
        let mut t = TurnTranscripts::new();
        t.push_model("Hello");
        t.push_model(" world");
        t.push_user("Hi");

        let messages = t.flush();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "Hi");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Hello world");

        assert!(t.is_empty());
    }

    #[test]
    fn test_flush_skips_empty_side() {
        let mut t = TurnTranscripts::new();
        t.push_model("Only the model spoke");

        let messages = t.flush();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::Assistant);
    }

    #[test]
    fn test_second_flush_emits_nothing() {
        let mut t = TurnTranscripts::new();
        t.push_user("once");
        assert_eq!(t.flush().len(), 1);
        assert!(t.flush().is_empty());
    }

    #[test]
    fn test_turn_boundary_separates_consecutive_turns() {
        let mut t = TurnTranscripts::new();
        t.push_user("first turn");
        let first = t.flush();

        // Fragments for the next turn arrive after the boundary
        t.push_user("second turn");
        let second = t.flush();

        assert_eq!(first[0].content, "first turn");
        assert_eq!(second[0].content, "second turn");
    }

    #[test]
    fn test_clear_discards_buffers() {
        let mut t = TurnTranscripts::new();
        t.push_user("abandoned");
        t.push_model("also abandoned");
        t.clear();
        assert!(t.is_empty());
    }
}
