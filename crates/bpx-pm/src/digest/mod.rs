//! Content digests for cache validation and download verification.
//!
//! Two interchangeable [`Digester`] implementations exist: [`NativeDigester`]
//! hashes in-process, [`ExternalDigester`] shells out to the coreutils
//! checksum tools. Both produce lowercase hex for the same input.

mod external;
mod native;

pub use external::ExternalDigester;
pub use native::{digest_bytes, NativeDigester};

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{keys, Context};
use crate::error::{BuildpackError, Result};

const DEFAULT_ALGORITHM: &str = "sha256";

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoding
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 40,
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    /// Name of the coreutils tool computing this digest
    pub fn tool_name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1sum",
            DigestAlgorithm::Sha256 => "sha256sum",
            DigestAlgorithm::Sha512 => "sha512sum",
        }
    }

    /// Algorithm selected by `CACHE_HASH_ALGORITHM`, `sha256` when unset
    pub fn from_context(ctx: &Context) -> Result<Self> {
        let name = ctx
            .get_str(keys::CACHE_HASH_ALGORITHM)
            .unwrap_or_else(|| DEFAULT_ALGORITHM.to_string());
        name.parse()
    }
}

impl FromStr for DigestAlgorithm {
    type Err = BuildpackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(BuildpackError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First whitespace-delimited token of a digest string.
///
/// Digest files usually look like `<hex>  <file name>`; only the hex part
/// takes part in comparisons.
pub fn first_token(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

/// A digest value tagged with its algorithm
#[derive(Debug, Clone, Eq)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    value: String,
}

impl Digest {
    /// Parse `text`, dropping any trailing metadata. Returns `None` for
    /// blank input.
    pub fn parse(algorithm: DigestAlgorithm, text: &str) -> Option<Self> {
        let value = first_token(text);
        if value.is_empty() {
            return None;
        }
        Some(Self {
            algorithm,
            value: value.to_string(),
        })
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl PartialEq for Digest {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.value.eq_ignore_ascii_case(&other.value)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Computes and checks file digests
#[async_trait]
pub trait Digester: Send + Sync {
    fn algorithm(&self) -> DigestAlgorithm;

    /// Hex digest of the file at `path`.
    ///
    /// An empty path or a path with no file behind it yields `""`
    /// ("no digest available") instead of an error.
    async fn calculate(&self, path: &Path) -> Result<String>;

    /// Whether the file at `path` has the `expected` digest. Trailing
    /// metadata in `expected` is ignored and case does not matter.
    async fn matches(&self, expected: &str, path: &Path) -> Result<bool> {
        let Some(expected) = Digest::parse(self.algorithm(), expected) else {
            return Ok(false);
        };
        let actual = self.calculate(path).await?;
        Ok(Digest::parse(self.algorithm(), &actual).is_some_and(|actual| actual == expected))
    }
}

/// Nothing to hash at `path`
pub(crate) fn is_absent(path: &Path) -> bool {
    path.as_os_str().is_empty() || !path.is_file()
}

/// Digester chosen by `CACHE_HASH_ALGORITHM` and `USE_EXTERNAL_HASH`
pub fn digester_from_context(ctx: &Context) -> Result<Arc<dyn Digester>> {
    let algorithm = DigestAlgorithm::from_context(ctx)?;

    if ctx.get_bool(keys::USE_EXTERNAL_HASH).unwrap_or(false) {
        log::debug!("Using external {} digester", algorithm.tool_name());
        Ok(Arc::new(ExternalDigester::new(algorithm)))
    } else {
        Ok(Arc::new(NativeDigester::new(algorithm)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("sha1".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha1);
        assert_eq!("SHA256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!("sha512".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha512);
    }

    #[test]
    fn test_unsupported_algorithms() {
        for bad in ["", "???", "2", "sha2", "md5"] {
            match bad.parse::<DigestAlgorithm>() {
                Err(BuildpackError::UnsupportedAlgorithm(value)) => assert_eq!(value, bad),
                other => panic!("expected unsupported algorithm for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_algorithm_from_context_defaults_to_sha256() {
        let ctx = Context::new();
        assert_eq!(DigestAlgorithm::from_context(&ctx).unwrap(), DigestAlgorithm::Sha256);

        let ctx = Context::from_pairs([("CACHE_HASH_ALGORITHM", "sha512")]);
        assert_eq!(DigestAlgorithm::from_context(&ctx).unwrap(), DigestAlgorithm::Sha512);

        let ctx = Context::from_pairs([("CACHE_HASH_ALGORITHM", "")]);
        assert!(DigestAlgorithm::from_context(&ctx).is_err());
    }

    #[test]
    fn test_digest_equality() {
        let a = Digest::parse(DigestAlgorithm::Sha1, "ABCDEF  file.tar.gz").unwrap();
        let b = Digest::parse(DigestAlgorithm::Sha1, "abcdef").unwrap();
        let c = Digest::parse(DigestAlgorithm::Sha256, "abcdef").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.value(), "ABCDEF");
        assert!(Digest::parse(DigestAlgorithm::Sha1, "   ").is_none());
    }

    #[test]
    fn test_first_token() {
        assert_eq!(first_token("abc ./test/data/HASH"), "abc");
        assert_eq!(first_token("  abc\n"), "abc");
        assert_eq!(first_token(""), "");
    }

    #[test]
    fn test_digester_from_context() {
        let ctx = Context::from_pairs([("USE_EXTERNAL_HASH", "true"), ("CACHE_HASH_ALGORITHM", "sha1")]);
        let digester = digester_from_context(&ctx).unwrap();
        assert_eq!(digester.algorithm(), DigestAlgorithm::Sha1);

        let ctx = Context::from_pairs([("CACHE_HASH_ALGORITHM", "nope")]);
        assert!(digester_from_context(&ctx).is_err());
    }
}
