//! Artifact fetching and extraction.
//!
//! A [`Downloader`] moves bytes from an origin (HTTP(S) URL, `file://` URL or
//! plain local path) to a local file, and fetches small side artifacts such
//! as digest files. Strategies are picked by name through the
//! [`DownloaderRegistry`].

mod archive;
mod curl;
mod native;
mod registry;

pub use archive::{copy_into, ArchiveExtractor, ArchiveType, Extractor};
pub use curl::CurlDownloader;
pub use native::HttpDownloader;
pub use registry::{DownloaderFactory, DownloaderRegistry, DEFAULT_METHOD};

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::digest::first_token;
use crate::error::{BuildpackError, FetchFailure, Result};

/// Fetches artifacts from an origin
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Strategy name as used in `DOWNLOAD_METHOD`
    fn name(&self) -> &str;

    /// Fetch `source` into `dest`. Nothing is left under `dest` on failure.
    async fn download(&self, source: &str, dest: &Path) -> Result<()>;

    /// Fetch a small side artifact (a digest file) and return the digest it holds
    async fn download_direct(&self, source: &str) -> Result<String>;
}

/// Where a fetch reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Remote(String),
    Local(PathBuf),
}

impl Source {
    pub fn parse(source: &str) -> Result<Self> {
        if source.starts_with("file://") {
            let path = url::Url::parse(source)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| {
                    BuildpackError::fetch(source, FetchFailure::Transport("invalid file URL".to_string()))
                })?;
            Ok(Source::Local(path))
        } else if looks_like_url(source) {
            Ok(Source::Remote(source.to_string()))
        } else {
            Ok(Source::Local(PathBuf::from(source)))
        }
    }
}

/// True for `scheme://...` strings
pub fn looks_like_url(value: &str) -> bool {
    match value.find("://") {
        Some(pos) if pos > 0 => value[..pos]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'),
        _ => false,
    }
}

/// Sibling path a download is streamed into before it is renamed into place
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("download"));
    name.push(".part");
    dest.with_file_name(name)
}

/// Move a finished `.part` file into place, or clean it up after a failure
pub(crate) async fn finish_part<T>(part: &Path, dest: &Path, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tokio::fs::rename(part, dest).await?;
            Ok(value)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(part).await;
            Err(e)
        }
    }
}

fn local_error(source: &str, e: std::io::Error) -> BuildpackError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BuildpackError::fetch(source, FetchFailure::NotFound)
    } else {
        BuildpackError::fetch(source, FetchFailure::Transport(e.to_string()))
    }
}

/// Copy a local source into `dest`
pub(crate) async fn fetch_local(source: &str, path: &Path, dest: &Path) -> Result<()> {
    log::debug!("Copying local source {} to {}", path.display(), dest.display());
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let part = part_path(dest);
    let result = tokio::fs::copy(path, &part)
        .await
        .map(|_| ())
        .map_err(|e| local_error(source, e));
    finish_part(&part, dest, result).await
}

/// Read a local source into memory
pub(crate) async fn read_local(source: &str, path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| local_error(source, e))
}

/// Digest held by a digest file body
pub(crate) fn digest_from_body(body: &[u8]) -> String {
    first_token(String::from_utf8_lossy(body).trim()).to_string()
}
