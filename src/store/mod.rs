//! Durable key/value storage and the records kept in it.

use std::io;
use std::path::PathBuf;

/// Conversation log and snapshots.
pub mod history;
/// Key/value backends.
pub mod kv;
/// UI preferences.
pub mod prefs;
/// Text-adventure world state.
pub mod world;

pub use history::{Attachment, HistoryStore, Role, Turn};
pub use kv::{FileStore, KeyValueStore, MemoryStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed for '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}
