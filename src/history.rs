//! Durable transcript persistence.
//!
//! The transcript is kept as one JSON blob under a fixed key in a [`KeyValueStore`].  The store
//! handle is passed in explicitly so tests can swap the on-disk [`FileStore`] for a
//! [`MemoryStore`].

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::observability::{HISTORY_LOAD_ERRORS, HISTORY_SAVE_ERRORS, HISTORY_SAVES};
use crate::types::Message;

/// The key the transcript snapshot lives under.
pub const HISTORY_KEY: &str = "chat-history";

const SNAPSHOT_VERSION: u8 = 1;

/// A durable text key-value namespace.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if there is none.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replaces the value stored under `key`.
    ///
    /// Readers observe either the old value or the new one, never a mix.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`.  Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// A [`KeyValueStore`] that keeps one `<key>.json` file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `dir`.  The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory this store writes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(Error::validation(
                format!("invalid store key {key:?}"),
                Some("key".to_string()),
            ));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io(
                format!("failed to read {}", path.display()),
                err,
            )),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|err| {
            Error::io(format!("failed to create {}", self.dir.display()), err)
        })?;
        // Stage then rename; readers never see a partial snapshot.
        let staging = self.dir.join(format!(".{key}.json.tmp"));
        tokio::fs::write(&staging, value).await.map_err(|err| {
            Error::io(format!("failed to write {}", staging.display()), err)
        })?;
        tokio::fs::rename(&staging, &path).await.map_err(|err| {
            Error::io(format!("failed to replace {}", path.display()), err)
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io(
                format!("failed to remove {}", path.display()),
                err,
            )),
        }
    }
}

/// An in-memory [`KeyValueStore`].  Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the raw value under `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u8,
    messages: &'a [Message],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Versioned {
        #[allow(dead_code)]
        version: u8,
        messages: Vec<Message>,
    },
    Bare(Vec<Message>),
}

impl Snapshot {
    fn into_messages(self) -> Vec<Message> {
        match self {
            Snapshot::Versioned { messages, .. } | Snapshot::Bare(messages) => messages,
        }
    }
}

/// Reads and writes the transcript snapshot.
///
/// ```
/// # tokio_test::block_on(async {
/// use std::sync::Arc;
/// use askstream::{HistoryStore, MemoryStore, Message};
///
/// let history = HistoryStore::new(Arc::new(MemoryStore::new()));
/// history.save(&[Message::question("Who wrote the report?")]).await.unwrap();
/// assert_eq!(history.load().await.len(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl HistoryStore {
    /// Creates a history store that uses [`HISTORY_KEY`].
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, HISTORY_KEY)
    }

    /// Creates a history store under a custom key.
    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Returns the key the snapshot is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the transcript.
    ///
    /// A missing snapshot is an empty transcript.  An unreadable or corrupt snapshot is logged
    /// and also treated as empty.
    pub async fn load(&self) -> Vec<Message> {
        let raw = match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %self.key, "no chat history found");
                return Vec::new();
            }
            Err(err) => {
                HISTORY_LOAD_ERRORS.click();
                warn!(key = %self.key, error = %err, "failed to read chat history");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Snapshot>(&raw) {
            Ok(snapshot) => {
                let messages = snapshot.into_messages();
                debug!(key = %self.key, messages = messages.len(), "loaded chat history");
                messages
            }
            Err(err) => {
                HISTORY_LOAD_ERRORS.click();
                warn!(key = %self.key, error = %err, "ignoring corrupt chat history");
                Vec::new()
            }
        }
    }

    /// Overwrites the snapshot with `messages`.
    pub async fn save(&self, messages: &[Message]) -> Result<()> {
        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            messages,
        };
        let result = match serde_json::to_string(&snapshot) {
            Ok(json) => self.store.set(&self.key, &json).await,
            Err(err) => Err(err.into()),
        };
        match &result {
            Ok(()) => HISTORY_SAVES.click(),
            Err(_) => HISTORY_SAVE_ERRORS.click(),
        }
        result
    }

    /// Deletes the snapshot.
    pub async fn clear(&self) -> Result<()> {
        self.store.delete(&self.key).await
    }
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
