//! Durable bookmark storage
//!
//! Bookmarked messages persist in one JSON file under the platform config
//! directory so they survive restarts. The file is rewritten atomically on
//! every change: write to a temp file in the same directory, then rename.

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::messages::Message;
use crate::settings;

const BOOKMARKS_FILE_NAME: &str = "bookmarks.json";

/// Bookmarked messages, kept in insertion order and mirrored to disk.
#[derive(Debug)]
pub struct BookmarkStore {
    path: PathBuf,
    bookmarks: Vec<Message>,
}

impl BookmarkStore {
    /// Load the store from the default location. A missing file is an empty
    /// store; an unreadable file is logged and treated as empty rather than
    /// blocking startup.
    pub fn load() -> Result<Self, String> {
        let path = settings::config_dir()?.join(BOOKMARKS_FILE_NAME);
        Ok(Self::load_from(path))
    }

    pub fn load_from(path: PathBuf) -> Self {
        let bookmarks = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<Message>>(&contents) {
                Ok(bookmarks) => bookmarks,
                Err(e) => {
                    warn!("Bookmarks: failed to parse {:?}: {}", path, e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Bookmarks: failed to read {:?}: {}", path, e);
                Vec::new()
            }
        };

        Self { path, bookmarks }
    }

    /// Toggle a message's bookmark. Returns the new state: `true` when the
    /// message was added, `false` when an existing bookmark was removed.
    pub fn toggle(&mut self, message: &Message) -> Result<bool, String> {
        let added = if let Some(pos) = self.bookmarks.iter().position(|m| m.id == message.id) {
            self.bookmarks.remove(pos);
            false
        } else {
            let mut copy = message.clone();
            copy.bookmarked = true;
            self.bookmarks.push(copy);
            true
        };

        self.save()?;
        Ok(added)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.bookmarks.iter().any(|m| m.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.bookmarks.iter()
    }

    pub fn len(&self) -> usize {
        self.bookmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
        }

        let contents = serde_json::to_string_pretty(&self.bookmarks)
            .map_err(|e| format!("Serialize bookmarks: {}", e))?;

        // Write atomically so a crash mid-write never leaves a corrupt file.
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &contents)
            .map_err(|e| format!("Write temp bookmarks {:?}: {}", tmp_path, e))?;

        // On Unix, rename atomically replaces the destination. On Windows,
        // rename fails if the destination exists, so remove it first.
        if cfg!(windows) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!(
                        "Remove existing bookmarks file {:?}: {}",
                        self.path, e
                    ));
                }
            }
        }

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            format!(
                "Rename temp bookmarks {:?} to {:?}: {}",
                tmp_path, self.path, e
            )
        })
    }
}
