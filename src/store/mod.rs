//! On-disk cache root.
//!
//! The cache root is a flat directory holding one `<key>.jpg` file per cached
//! resource. The file's existence is the cache entry; there is no index.
//!
//! Writes land in a hidden temporary file first and are renamed into place, so
//! a concurrent reader sees either the old content or the new content, never a
//! truncated file. Concurrent writers to one key race; the last rename wins.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::key::ResourceKey;

/// Extension given to every cache entry.
pub const ENTRY_EXTENSION: &str = "jpg";

/// Outcome of removing an entry.
#[derive(Debug)]
pub enum Removal {
    /// The entry existed and is gone.
    Deleted,
    /// There was no entry for the key.
    Missing,
    /// The filesystem refused for some other reason.
    Failed(io::Error),
}

/// Storage seam for the proxy. [`DiskStore`] is the only production impl.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    /// Reads the entry for `key`; `Ok(None)` if there is none.
    async fn load(&self, key: &ResourceKey) -> io::Result<Option<Bytes>>;

    /// Writes the entry for `key`, replacing any existing one.
    async fn save(&self, key: &ResourceKey, data: Bytes) -> io::Result<()>;

    async fn remove(&self, key: &ResourceKey) -> Removal;
}

/// A [`ResourceStore`] backed by a directory on the local filesystem.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    // Distinguishes temporary files of concurrent writers in this process.
    tmp_seq: AtomicU64,
}

impl DiskStore {
    /// Creates a store rooted at `root`. The directory is not touched; see
    /// [`ensure_root`](Self::ensure_root).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp_seq: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the cache root (and parents) if it does not exist yet.
    ///
    /// Returns `true` if the directory had to be created.
    pub async fn ensure_root(&self) -> io::Result<bool> {
        if tokio::fs::try_exists(&self.root).await? {
            let meta = tokio::fs::metadata(&self.root).await?;
            if !meta.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a directory", self.root.display()),
                ));
            }
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.root).await?;
        info!(path = %self.root.display(), "created cache directory");
        Ok(true)
    }

    /// Path of the entry file for `key`.
    pub fn entry_path(&self, key: &ResourceKey) -> PathBuf {
        self.root.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    fn tmp_path(&self, key: &ResourceKey) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(
            ".{key}.{ENTRY_EXTENSION}.{}-{seq}.tmp",
            std::process::id()
        ))
    }
}

#[async_trait]
impl ResourceStore for DiskStore {
    async fn load(&self, key: &ResourceKey) -> io::Result<Option<Bytes>> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, key: &ResourceKey, data: Bytes) -> io::Result<()> {
        let tmp = self.tmp_path(key);
        let path = self.entry_path(key);

        if let Err(e) = tokio::fs::write(&tmp, &data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        debug!(key = %key, bytes = data.len(), "cache entry written");
        Ok(())
    }

    async fn remove(&self, key: &ResourceKey) -> Removal {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Removal::Deleted,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Removal::Missing,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to remove cache entry");
                Removal::Failed(e)
            }
        }
    }
}
