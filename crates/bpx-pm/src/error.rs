use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Why a fetch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The origin answered but has nothing under that name (HTTP 404, missing local file)
    NotFound,
    /// The origin answered with a non-success status other than 404
    Status(u16),
    /// The request never completed (DNS, TLS, timeout, broken pipe, tool failure)
    Transport(String),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::NotFound => write!(f, "not found"),
            FetchFailure::Status(status) => write!(f, "HTTP {}", status),
            FetchFailure::Transport(reason) => write!(f, "transport failure: {}", reason),
        }
    }
}

/// Pipeline stage an install failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Resolve,
    Fetch,
    Digest,
    Cache,
    Extract,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallStage::Resolve => "resolve",
            InstallStage::Fetch => "fetch",
            InstallStage::Digest => "digest",
            InstallStage::Cache => "cache",
            InstallStage::Extract => "extract",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BuildpackError {
    // Config errors
    #[error("Missing required configuration key: {key}")]
    Config { key: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Digest errors
    #[error("unsupported hash type {0}")]
    UnsupportedAlgorithm(String),

    // Download errors
    #[error("Download failed for {url}: {failure}")]
    Fetch { url: String, failure: FetchFailure },

    #[error("Digest mismatch for {target}: expected {expected}, got {actual}")]
    Integrity {
        target: String,
        expected: String,
        actual: String,
    },

    // Extraction errors
    #[error("Failed to extract {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    // Cache errors
    #[error("Invalid cache key: {0:?}")]
    InvalidCacheKey(String),

    #[error("Installing {target} failed during {stage}: {source}")]
    Install {
        target: String,
        stage: InstallStage,
        #[source]
        source: Box<BuildpackError>,
    },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildpackError {
    pub(crate) fn fetch(url: impl Into<String>, failure: FetchFailure) -> Self {
        BuildpackError::Fetch {
            url: url.into(),
            failure,
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        BuildpackError::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Tag an error with the install target and the stage it came from.
    /// Already tagged errors are passed through untouched.
    pub(crate) fn at_stage(self, target: &str, stage: InstallStage) -> Self {
        match self {
            tagged @ BuildpackError::Install { .. } => tagged,
            other => BuildpackError::Install {
                target: target.to_string(),
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any stage tagging removed
    pub fn root(&self) -> &BuildpackError {
        match self {
            BuildpackError::Install { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage this error was tagged with, if any
    pub fn stage(&self) -> Option<InstallStage> {
        match self {
            BuildpackError::Install { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            BuildpackError::Fetch {
                failure: FetchFailure::NotFound,
                ..
            }
        )
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self.root(), BuildpackError::Integrity { .. })
    }
}

pub type Result<T> = std::result::Result<T, BuildpackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tagging_is_applied_once() {
        let err = BuildpackError::fetch("https://example.com/a.tgz", FetchFailure::NotFound)
            .at_stage("TOMCAT", InstallStage::Fetch)
            .at_stage("TOMCAT", InstallStage::Extract);

        assert_eq!(err.stage(), Some(InstallStage::Fetch));
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Installing TOMCAT failed during fetch: Download failed for https://example.com/a.tgz: not found"
        );
    }

    #[test]
    fn test_unsupported_algorithm_message_embeds_value() {
        let err = BuildpackError::UnsupportedAlgorithm("???".to_string());
        assert_eq!(err.to_string(), "unsupported hash type ???");
    }

    #[test]
    fn test_root_of_untagged_error_is_itself() {
        let err = BuildpackError::Integrity {
            target: "a.zip".to_string(),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(err.is_integrity());
        assert!(err.stage().is_none());
    }
}
