//! Voice-enabled chat client for a union contract knowledge base.
//!
//! The assistant answers questions about the PCFT collective bargaining
//! agreement by forwarding them, with recent conversation history and a
//! fixed contract context, to a hosted language model. Text questions go
//! over HTTP (one-shot or streamed); voice mode runs a live bidirectional
//! audio session over WebSocket with scheduled playback and per-turn
//! transcripts.

pub mod audio;
pub mod bookmarks;
pub mod chat;
pub mod live;
pub mod messages;
pub mod prompt;
pub mod settings;

pub use bookmarks::BookmarkStore;
pub use chat::ChatClient;
pub use live::{LiveSession, SessionUpdate};
pub use messages::{Message, MessageLog, MessageRole};
pub use settings::AppSettings;
