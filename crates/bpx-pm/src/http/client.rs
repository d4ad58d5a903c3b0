//! HTTP client used by the native download strategy.
//!
//! A thin `reqwest` wrapper: one shared connection pool, a `bpx/<version>`
//! user agent, a request timeout from `DOWNLOAD_TIMEOUT` and optional
//! retries (`DOWNLOAD_RETRIES`, off by default) with exponential backoff on
//! server errors and rate limits. Bodies are streamed to disk.

use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::{keys, Context};

const USER_AGENT: &str = concat!("bpx/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::HttpStatus { status, .. } => Some(*status),
            HttpError::Request(e) => e.status().map(|s| s.as_u16()),
            HttpError::Io(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl HttpClientConfig {
    /// Defaults overridden by `DOWNLOAD_TIMEOUT` (seconds) and `DOWNLOAD_RETRIES`
    pub fn from_context(ctx: &Context) -> Self {
        let mut config = Self::default();
        if let Some(secs) = ctx.get_u64(keys::DOWNLOAD_TIMEOUT) {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = ctx.get_u64(keys::DOWNLOAD_RETRIES) {
            config.max_retries = u32::try_from(retries).unwrap_or(u32::MAX);
        }
        config
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

pub struct HttpClient {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .gzip(true)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        })
    }

    /// GET `url`, retrying server errors and 429 up to the configured count
    pub async fn get(&self, url: &str) -> Result<Response, HttpError> {
        let mut attempt = 0;

        loop {
            let error = match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let error = HttpError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    };
                    if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                        return Err(error);
                    }
                    error
                }
                Err(e) => HttpError::Request(e),
            };

            if attempt >= self.max_retries {
                return Err(error);
            }

            // 1x, 2x, 4x ... the base delay
            let delay = self.retry_delay.saturating_mul(2_u32.saturating_pow(attempt));
            log::debug!("Retrying {} in {:?} ({})", url, delay, error);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Stream the body of `url` into `dest`
    pub async fn download(&self, url: &str, dest: &Path) -> Result<(), HttpError> {
        let response = self.get(url).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        Ok(())
    }

    /// Read the whole body of `url` into memory
    pub async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        let response = self.get(url).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
