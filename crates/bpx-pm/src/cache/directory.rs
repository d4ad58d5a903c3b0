use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{validate_key, CacheManager};
use crate::digest::Digester;
use crate::Result;

/// Cache backed by a single local directory
///
/// Writes go through a temp file inside the base directory and are renamed
/// over the entry, so readers only ever see complete files. Concurrent
/// writers of the same key race and the last rename wins.
pub struct DirectoryCache {
    base_dir: PathBuf,
    digester: Arc<dyn Digester>,
}

impl DirectoryCache {
    /// Open a cache rooted at `base_dir`, creating the directory if needed
    pub fn new(base_dir: impl Into<PathBuf>, digester: Arc<dyn Digester>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir, digester })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.base_dir.join(key))
    }
}

#[async_trait]
impl CacheManager for DirectoryCache {
    async fn exists(&self, key: &str, digest: &str) -> Result<bool> {
        let path = self.entry_path(key)?;
        if !path.is_file() {
            return Ok(false);
        }
        self.digester.matches(digest, &path).await
    }

    async fn get(&self, key: &str, digest: &str) -> Result<Option<PathBuf>> {
        if self.exists(key, digest).await? {
            log::debug!("Cache hit for {}", key);
            Ok(Some(self.entry_path(key)?))
        } else {
            log::debug!("Cache miss for {}", key);
            Ok(None)
        }
    }

    async fn put(&self, key: &str, source: &Path, digest: &str) -> Result<PathBuf> {
        let path = self.entry_path(key)?;

        if path.is_file() && !self.digester.matches(digest, &path).await? {
            log::warn!(
                "{} already exists in the cache with a different digest, replacing it",
                key
            );
        }

        let staged = tempfile::Builder::new()
            .prefix(".bpx-")
            .suffix(".tmp")
            .tempfile_in(&self.base_dir)?;
        tokio::fs::copy(source, staged.path()).await?;
        staged.persist(&path).map_err(|e| e.error)?;

        log::debug!("Cached {} at {}", key, path.display());
        Ok(path)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        log::warn!("Deleting {} from the cache, this is not supported on every file system", key);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
