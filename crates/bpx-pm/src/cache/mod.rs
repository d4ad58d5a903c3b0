//! Filename-keyed artifact cache.
//!
//! Entries are flat files named by the artifact filename directly under one
//! base directory. An entry only counts as present when its digest matches
//! the digest the caller expects.

mod directory;

pub use directory::DirectoryCache;

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::{keys, Context};
use crate::digest::digester_from_context;
use crate::{BuildpackError, Result};

#[async_trait]
pub trait CacheManager: Send + Sync {
    /// Whether `key` is cached with the `digest` content
    async fn exists(&self, key: &str, digest: &str) -> Result<bool>;

    /// Path of the cached file for `key`, only when its digest matches
    async fn get(&self, key: &str, digest: &str) -> Result<Option<PathBuf>>;

    /// Store a copy of `source` under `key` and return the path to use from now on
    async fn put(&self, key: &str, source: &Path, digest: &str) -> Result<PathBuf>;

    /// Drop `key` from the cache. A missing entry is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Cache that never holds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl CacheManager for NoCache {
    async fn exists(&self, _key: &str, _digest: &str) -> Result<bool> {
        Ok(false)
    }

    async fn get(&self, _key: &str, _digest: &str) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, source: &Path, _digest: &str) -> Result<PathBuf> {
        Ok(source.to_path_buf())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Reject keys that would not name a single file under the base directory
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let mut components = Path::new(key).components();
    let single_file = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );

    if key.is_empty() || !single_file || key.contains('/') || key.contains('\\') {
        return Err(BuildpackError::InvalidCacheKey(key.to_string()));
    }
    Ok(())
}

/// Base directory from `FILE_CACHE_BASE_DIRECTORY`, then `CACHE_DIR`, then `<TMPDIR>/cache`
pub fn base_directory(ctx: &Context) -> PathBuf {
    ctx.get_path(keys::FILE_CACHE_BASE_DIRECTORY)
        .or_else(|| ctx.get_path(keys::CACHE_DIR))
        .unwrap_or_else(|| ctx.temp_dir().join("cache"))
}

/// Cache selected by `USE_CACHE` (default on)
pub fn cache_from_context(ctx: &Context) -> Result<Arc<dyn CacheManager>> {
    if !ctx.get_bool(keys::USE_CACHE).unwrap_or(true) {
        log::debug!("Artifact cache disabled");
        return Ok(Arc::new(NoCache));
    }

    let digester = digester_from_context(ctx)?;
    Ok(Arc::new(DirectoryCache::new(base_directory(ctx), digester)?))
}
