//! In-process HTTP download strategy.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::{digest_from_body, fetch_local, finish_part, part_path, read_local, Downloader, Source};
use crate::http::{HttpClient, HttpClientConfig, HttpError};
use crate::{BuildpackError, FetchFailure, Result};

/// Downloads with the built-in HTTP client
pub struct HttpDownloader {
    http_client: Arc<HttpClient>,
}

impl HttpDownloader {
    pub fn new(http_client: Arc<HttpClient>) -> Self {
        Self { http_client }
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = HttpClient::with_config(config)
            .map_err(|e| BuildpackError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::new(Arc::new(client)))
    }
}

/// Translate a transport error into the fetch taxonomy
fn fetch_error(url: &str, error: HttpError) -> BuildpackError {
    match error {
        HttpError::Io(e) => BuildpackError::Io(e),
        other => match other.status() {
            Some(404) => BuildpackError::fetch(url, FetchFailure::NotFound),
            Some(status) => BuildpackError::fetch(url, FetchFailure::Status(status)),
            None => BuildpackError::fetch(url, FetchFailure::Transport(other.to_string())),
        },
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn name(&self) -> &str {
        "native"
    }

    async fn download(&self, source: &str, dest: &Path) -> Result<()> {
        let url = match Source::parse(source)? {
            Source::Local(path) => return fetch_local(source, &path, dest).await,
            Source::Remote(url) => url,
        };

        log::debug!("HTTP GET {} -> {}", url, dest.display());
        let part = part_path(dest);
        let result = self
            .http_client
            .download(&url, &part)
            .await
            .map_err(|e| fetch_error(&url, e));

        finish_part(&part, dest, result).await
    }

    async fn download_direct(&self, source: &str) -> Result<String> {
        let body = match Source::parse(source)? {
            Source::Local(path) => read_local(source, &path).await?,
            Source::Remote(url) => {
                log::debug!("HTTP GET {}", url);
                self.http_client
                    .download_bytes(&url)
                    .await
                    .map_err(|e| fetch_error(&url, e))?
            }
        };

        Ok(digest_from_body(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_mapping() {
        let not_found = fetch_error(
            "https://x/a",
            HttpError::HttpStatus { status: 404, url: "https://x/a".to_string() },
        );
        assert!(not_found.is_not_found());

        let forbidden = fetch_error(
            "https://x/a",
            HttpError::HttpStatus { status: 403, url: "https://x/a".to_string() },
        );
        assert!(matches!(
            forbidden,
            BuildpackError::Fetch { failure: FetchFailure::Status(403), .. }
        ));

        let disk = fetch_error("https://x/a", HttpError::Io(std::io::Error::other("disk full")));
        assert!(matches!(disk, BuildpackError::Io(_)));
    }

    #[tokio::test]
    async fn test_local_download_direct() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("a.sha256");
        std::fs::write(&path, "ABCDEF  a.tgz\n").unwrap();

        let downloader = HttpDownloader::new(Arc::new(HttpClient::new().unwrap()));
        let digest = downloader
            .download_direct(&format!("file://{}", path.display()))
            .await
            .unwrap();
        assert_eq!(digest, "ABCDEF");
    }
}
