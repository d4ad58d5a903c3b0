//! Download strategy shelling out to `curl`.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::process::Output;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;

use super::{digest_from_body, fetch_local, finish_part, part_path, read_local, Downloader, Source};
use crate::config::{keys, Context};
use crate::{BuildpackError, FetchFailure, Result};

/// curl's exit code for an HTTP status >= 400 under `--fail`
const CURL_HTTP_ERROR: i32 = 22;

fn status_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"returned error: (\d{3})").unwrap())
}

/// Downloads by running the `curl` command-line tool
#[derive(Debug, Clone)]
pub struct CurlDownloader {
    program: String,
    timeout: Option<Duration>,
}

impl Default for CurlDownloader {
    fn default() -> Self {
        Self {
            program: "curl".to_string(),
            timeout: None,
        }
    }
}

impl CurlDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_context(ctx: &Context) -> Self {
        Self {
            timeout: ctx.get_u64(keys::DOWNLOAD_TIMEOUT).map(Duration::from_secs),
            ..Self::default()
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--silent", "--show-error", "--location", "--fail"]);
        if let Some(timeout) = self.timeout {
            cmd.arg("--max-time").arg(timeout.as_secs().to_string());
        }
        cmd.arg(url);
        cmd
    }

    async fn run(&self, url: &str, mut cmd: Command) -> Result<Output> {
        let output = cmd.output().await.map_err(|e| {
            BuildpackError::fetch(url, FetchFailure::Transport(format!("Failed to run {}: {}", self.program, e)))
        })?;

        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(BuildpackError::fetch(url, curl_failure(output.status.code(), &stderr)))
    }
}

/// Classify a failed curl run
fn curl_failure(code: Option<i32>, stderr: &str) -> FetchFailure {
    if code == Some(CURL_HTTP_ERROR) {
        if let Some(caps) = status_regex().captures(stderr) {
            if let Ok(status) = caps[1].parse::<u16>() {
                return if status == 404 {
                    FetchFailure::NotFound
                } else {
                    FetchFailure::Status(status)
                };
            }
        }
    }

    let reason = stderr.trim();
    match code {
        Some(code) if reason.is_empty() => FetchFailure::Transport(format!("curl exited with {}", code)),
        Some(code) => FetchFailure::Transport(format!("curl exited with {}: {}", code, reason)),
        None => FetchFailure::Transport("curl was terminated by a signal".to_string()),
    }
}

#[async_trait]
impl Downloader for CurlDownloader {
    fn name(&self) -> &str {
        "curl"
    }

    async fn download(&self, source: &str, dest: &Path) -> Result<()> {
        let url = match Source::parse(source)? {
            Source::Local(path) => return fetch_local(source, &path, dest).await,
            Source::Remote(url) => url,
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        log::debug!("curl {} -> {}", url, dest.display());
        let part = part_path(dest);
        let mut cmd = self.command(&url);
        cmd.arg("--output").arg(&part);

        let result = self.run(&url, cmd).await.map(|_| ());
        finish_part(&part, dest, result).await
    }

    async fn download_direct(&self, source: &str) -> Result<String> {
        let body = match Source::parse(source)? {
            Source::Local(path) => read_local(source, &path).await?,
            Source::Remote(url) => {
                log::debug!("curl {}", url);
                let cmd = self.command(&url);
                self.run(&url, cmd).await?.stdout
            }
        };

        Ok(digest_from_body(&body))
    }
}
