//! Conversation history and its durable snapshot.
//!
//! The snapshot stores raw turn text, never rendered HTML, so formatter
//! changes apply to old conversations the next time they are loaded.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageOutputFormat;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::render::markdown::{escape_html, format_response};
use crate::store::StoreError;
use crate::store::kv::KeyValueStore;

pub const HISTORY_KEY: &str = "chat_history";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Inline binary payload sent along with a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Decodes arbitrary image bytes and re-encodes them as PNG.
    pub fn png_from_image_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let image = image::load_from_memory(bytes)?;
        let mut buffer = Vec::new();
        image.write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)?;
        Ok(Self::new("image/png", buffer))
    }

    pub fn base64_data(&self) -> String {
        STANDARD.encode(&self.data)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data())
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// One message of a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            attachment: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Option<Attachment>) -> Self {
        self.attachment = attachment;
        self
    }

    /// HTML shown for this turn: user text escaped verbatim, assistant text formatted.
    pub fn display_html(&self) -> String {
        match self.role {
            Role::User => escape_html(&self.text),
            Role::Assistant => format_response(&self.text),
        }
    }
}

/// Append-only conversation log backed by one durable key.
pub struct HistoryStore<S> {
    storage: S,
    key: String,
    turns: Vec<Turn>,
}

impl<S: KeyValueStore> HistoryStore<S> {
    /// Opens the chat history and loads whatever snapshot is stored.
    pub fn open(storage: S) -> Self {
        Self::open_key(storage, HISTORY_KEY)
    }

    pub fn open_key(storage: S, key: impl Into<String>) -> Self {
        let mut store = Self {
            storage,
            key: key.into(),
            turns: Vec::new(),
        };
        store.load_all();
        store
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Reloads the snapshot from storage.
    ///
    /// A snapshot that cannot be read or parsed is purged and the history
    /// starts empty.
    pub fn load_all(&mut self) -> &[Turn] {
        self.turns = match self.storage.get(&self.key) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Turn>>(&raw) {
                Ok(turns) => turns,
                Err(err) => {
                    warn!(key = %self.key, error = %err, "discarding corrupt history snapshot");
                    if let Err(err) = self.storage.remove(&self.key) {
                        warn!(key = %self.key, error = %err, "failed to purge corrupt history");
                    }
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(key = %self.key, error = %err, "history unreadable, starting empty");
                Vec::new()
            }
        };
        &self.turns
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Writes the in-memory conversation as the durable snapshot.
    pub fn persist(&self) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(&self.turns)?;
        self.storage.set(&self.key, &snapshot)
    }

    /// Forgets every turn and removes the durable snapshot.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.turns.clear();
        info!(key = %self.key, "history cleared");
        self.storage.remove(&self.key)
    }

    /// Every turn paired with the HTML it displays as, formatted afresh.
    pub fn rendered(&self) -> Vec<(Role, String)> {
        self.turns
            .iter()
            .map(|turn| (turn.role, turn.display_html()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::{FileStore, MemoryStore};

    #[test]
    fn persist_is_idempotent() {
        let storage = MemoryStore::new();
        let mut history = HistoryStore::open(storage.clone());
        history.append(Turn::user("hi").with_attachment(Some(Attachment::new(
            "image/png",
            vec![0, 1, 2, 250],
        ))));
        history.append(Turn::assistant("**hello**"));
        history.persist().unwrap();
        let first = storage.get(HISTORY_KEY).unwrap().unwrap();

        history.persist().unwrap();
        assert_eq!(storage.get(HISTORY_KEY).unwrap().unwrap(), first);

        let reloaded = HistoryStore::open(storage.clone());
        reloaded.persist().unwrap();
        assert_eq!(storage.get(HISTORY_KEY).unwrap().unwrap(), first);
        assert_eq!(reloaded.turns(), history.turns());
    }

    #[test]
    fn corrupt_snapshot_loads_empty_and_is_purged() {
        let storage = MemoryStore::new();
        storage.set(HISTORY_KEY, "{not json").unwrap();

        let history = HistoryStore::open(storage.clone());
        assert!(history.is_empty());
        assert_eq!(storage.get(HISTORY_KEY).unwrap(), None);
    }

    #[test]
    fn non_utf8_snapshot_file_is_purged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("{HISTORY_KEY}.json"));
        std::fs::write(&path, [0xff, 0xfe, b'[', b']']).unwrap();

        let history = HistoryStore::open(FileStore::new(dir.path()));
        assert!(history.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn assistant_turns_are_reformatted_on_load() {
        let storage = MemoryStore::new();
        storage
            .set(
                HISTORY_KEY,
                r#"[{"role":"user","text":"<b>?</b>"},{"role":"assistant","text":"**yes**"}]"#,
            )
            .unwrap();

        let history = HistoryStore::open(storage);
        let rendered = history.rendered();
        assert_eq!(rendered[0], (Role::User, "&lt;b&gt;?&lt;/b&gt;".to_string()));
        assert_eq!(rendered[1], (Role::Assistant, "<p><strong>yes</strong></p>".to_string()));
    }

    #[test]
    fn clear_removes_snapshot() {
        let storage = MemoryStore::new();
        let mut history = HistoryStore::open(storage.clone());
        history.append(Turn::user("hi"));
        history.persist().unwrap();

        history.clear().unwrap();
        assert!(history.is_empty());
        assert_eq!(storage.get(HISTORY_KEY).unwrap(), None);
    }

    #[test]
    fn attachment_data_is_stored_as_base64() {
        let turn = Turn::user("look").with_attachment(Some(Attachment::new("image/png", b"png".to_vec())));
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["attachment"]["data"], "cG5n");
        assert_eq!(json["attachment"]["mime_type"], "image/png");
        assert_eq!(turn.attachment.unwrap().data_url(), "data:image/png;base64,cG5n");
    }
}
