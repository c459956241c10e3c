//! Durable storage for message entries

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use quill_model::MessageEntries;

use crate::error::{Error, Result};

/// Backing store for persisted entries
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Load the entries stored for `id`, or `None` if there is no record
    async fn load_entries(&self, id: &str) -> Result<Option<MessageEntries>>;

    /// Replace the entries stored for `id`
    async fn write_entries(&self, id: &str, entries: &MessageEntries) -> Result<()>;
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, MessageEntries>>,
    loads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `load_entries` calls served so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Acquire)
    }

    /// Seed a record without going through the async interface
    pub fn insert(&self, id: impl Into<String>, entries: MessageEntries) {
        self.records.lock().insert(id.into(), entries);
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn load_entries(&self, id: &str) -> Result<Option<MessageEntries>> {
        self.loads.fetch_add(1, Ordering::AcqRel);
        Ok(self.records.lock().get(id).cloned())
    }

    async fn write_entries(&self, id: &str, entries: &MessageEntries) -> Result<()> {
        self.records.lock().insert(id.to_string(), entries.clone());
        Ok(())
    }
}

/// One JSON document per id under a directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Get the store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(Error::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// List stored ids, sorted
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl EntryStore for FileStore {
    async fn load_entries(&self, id: &str) -> Result<Option<MessageEntries>> {
        let path = self.entry_path(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("loaded entries for {} from {}", id, path.display());
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn write_entries(&self, id: &str, entries: &MessageEntries) -> Result<()> {
        let path = self.entry_path(id)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", id));
        let content = serde_json::to_string_pretty(entries)?;

        // Write then rename so readers never see a partial document
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!("wrote entries for {} to {}", id, path.display());
        Ok(())
    }
}
