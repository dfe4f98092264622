//! Conversation messages and the in-memory message log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// Role label the text-generation endpoint understands. The provider
    /// only knows "user" and "model".
    pub fn provider_label(&self) -> &'static str {
        match self {
            MessageRole::Assistant => "model",
            MessageRole::User | MessageRole::System => "user",
        }
    }
}

/// One entry in the conversation. Content is append-only while an answer is
/// streaming in; afterwards only the bookmark flag changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub bookmarked: bool,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            bookmarked: false,
        }
    }
}

/// The permanent message log for one run of the app. Messages are only ever
/// appended; nothing is deleted short of process end.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its id.
    pub fn push(&mut self, message: Message) -> Uuid {
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Append a streamed fragment to an in-flight message's content.
    pub fn append_content(&mut self, id: Uuid, fragment: &str) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.content.push_str(fragment);
        }
    }

    /// The last `n` messages, oldest first (the recent-history window for
    /// text-generation calls).
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Flip the bookmark flag on the message at `index`; returns a copy of
    /// the message after the toggle.
    pub fn toggle_bookmark(&mut self, index: usize) -> Option<Message> {
        let message = self.messages.get_mut(index)?;
        message.bookmarked = !message.bookmarked;
        Some(message.clone())
    }

    pub fn set_bookmarked(&mut self, id: Uuid, bookmarked: bool) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.bookmarked = bookmarked;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
