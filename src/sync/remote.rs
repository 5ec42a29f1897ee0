//! Abstraction over the shared file-storage backend.
//!
//! The engine only needs four operations: list what changed since a cursor,
//! and upload/download/delete individual files. `DirRemote` implements them
//! on top of a plain shared directory (one kept in sync by Dropbox,
//! Syncthing or similar); the cursor encodes the file set last seen so
//! deletions show up as tombstone entries on the next listing.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;

#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub is_deleted: bool,
}

#[derive(Debug, Clone)]
pub struct ChangeList {
    pub entries: Vec<RemoteEntry>,
    pub cursor: String,
}

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Entries changed since `cursor`; a full listing when `cursor` is
    /// absent or unusable.
    async fn list_changes(&self, cursor: Option<&str>) -> Result<ChangeList>;
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<()>;
    async fn download(&self, path: &str) -> Result<Vec<u8>>;
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Shared-directory backend. File name and path coincide.
pub struct DirRemote {
    root: PathBuf,
}

/// Cursor payload: file name to mtime in milliseconds.
type FileStamps = BTreeMap<String, i64>;

impl DirRemote {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    async fn scan(&self) -> Result<FileStamps> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create remote directory {}", self.root.display()))?;

        let mut stamps = FileStamps::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("failed to list remote directory {}", self.root.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if !name.ends_with(".json") {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            stamps.insert(name, mtime);
        }

        Ok(stamps)
    }
}

#[async_trait]
impl RemoteStorage for DirRemote {
    async fn list_changes(&self, cursor: Option<&str>) -> Result<ChangeList> {
        let previous: FileStamps = match cursor {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|err| {
                warn!("Unusable sync cursor, falling back to full listing: {err}");
                FileStamps::new()
            }),
            None => FileStamps::new(),
        };

        let current = self.scan().await?;
        let mut entries = Vec::new();

        for (name, mtime) in &current {
            if previous.get(name) != Some(mtime) {
                entries.push(RemoteEntry {
                    name: name.clone(),
                    path: name.clone(),
                    is_deleted: false,
                });
            }
        }

        for name in previous.keys() {
            if !current.contains_key(name) {
                entries.push(RemoteEntry {
                    name: name.clone(),
                    path: name.clone(),
                    is_deleted: true,
                });
            }
        }

        let cursor = serde_json::to_string(&current).context("failed to encode sync cursor")?;
        Ok(ChangeList { entries, cursor })
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let target = self.root.join(path);
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to upload {}", target.display()))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.root.join(path);
        tokio::fs::read(&target)
            .await
            .with_context(|| format!("failed to download {}", target.display()))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.root.join(path);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            // Already gone is the outcome we wanted.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(anyhow::Error::new(err)
                    .context(format!("failed to delete {}", target.display())))
            }
        }
    }
}
