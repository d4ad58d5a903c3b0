//! Resolution of install targets from the context.

use serde_json::Value;
use std::path::PathBuf;

use crate::config::{keys, Context};
use crate::template;
use crate::{BuildpackError, Result};

/// A package fully resolved from `<KEY>_*` context entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// The key the entries were read from (after indirection)
    pub key: String,
    /// Artifact filename, also the cache key
    pub filename: String,
    /// Expected digest, empty when none is configured
    pub digest: String,
    /// Where the payload is fetched from
    pub url: String,
    /// Directory the artifact is unpacked into
    pub install_dir: PathBuf,
    pub strip: bool,
}

impl PackageSpec {
    /// Resolve the package named by `key`.
    ///
    /// When the context maps `key` itself to a string, that string is the
    /// package key to use (`"WEB_SERVER": "HTTPD"` installs `HTTPD`).
    pub fn resolve(ctx: &Context, key: &str) -> Result<Self> {
        let key = match ctx.get(key) {
            Some(Value::String(real)) if !real.is_empty() => {
                log::debug!("{} refers to package {}", key, real);
                real.clone()
            }
            _ => key.to_string(),
        };

        let package_key = format!("{}_PACKAGE", key);
        let filename = template::expand(&ctx.require(&package_key)?, ctx)?;
        if filename.is_empty() {
            return Err(BuildpackError::Config { key: package_key });
        }

        let digest = ctx.require(&format!("{}_PACKAGE_HASH", key))?;

        let url = match ctx.get_str(&format!("{}_DOWNLOAD_URL", key)) {
            Some(pattern) => template::expand(&pattern, &ctx.with(package_key.as_str(), filename.as_str()))?,
            None => {
                let prefix = template::expand(&ctx.require(&format!("{}_DOWNLOAD_PREFIX", key))?, ctx)?;
                join_url(&prefix, &filename)
            }
        };

        let base = match ctx.get_path(&format!("{}_PACKAGE_INSTALL_DIR", key)) {
            Some(dir) => dir,
            None => PathBuf::from(ctx.require(keys::BUILD_DIR)?),
        };

        Ok(Self {
            install_dir: base.join(key.to_lowercase()),
            strip: ctx.get_bool(&format!("{}_STRIP", key)).unwrap_or(false),
            key,
            filename,
            digest,
            url,
        })
    }
}

/// An install driven by explicit locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectInstall {
    pub url: String,
    /// Literal digest, or the URL of a digest file
    pub digest_source: String,
    pub dest: PathBuf,
    pub strip: bool,
    pub extract: bool,
    /// Cache key override, derived from `url` when unset
    pub filename: Option<String>,
}

impl DirectInstall {
    pub fn new(url: impl Into<String>, digest_source: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            digest_source: digest_source.into(),
            dest: dest.into(),
            strip: false,
            extract: true,
            filename: None,
        }
    }

    pub fn strip(mut self, strip: bool) -> Self {
        self.strip = strip;
        self
    }

    pub fn extract(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Cache key for this install
    pub fn resolved_filename(&self) -> Result<String> {
        match &self.filename {
            Some(name) if !name.is_empty() => Ok(name.clone()),
            _ => filename_from_url(&self.url),
        }
    }
}

/// Last path segment of `url` with query string and fragment removed
pub fn filename_from_url(url: &str) -> Result<String> {
    let name = match url::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string),
        // Plain paths
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string),
    };

    name.ok_or_else(|| BuildpackError::InvalidConfig(format!("Cannot derive a file name from {:?}", url)))
}

fn join_url(prefix: &str, filename: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), filename)
}
