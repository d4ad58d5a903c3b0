use indexmap::IndexMap;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::context::{keys, Context};
use crate::error::{BuildpackError, Result};

const DEFAULTS_FILE: &str = "defaults/options.json";
const USER_FILE: &str = "config/options.json";

/// Represents where a context layer came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSource {
    /// Process environment
    Environment,
    /// Directories handed to the build script
    Directories,
    /// Buildpack defaults file
    Defaults(PathBuf),
    /// User options file inside the application
    User(PathBuf),
}

impl ContextSource {
    pub fn as_str(&self) -> &str {
        match self {
            ContextSource::Environment => "environment",
            ContextSource::Directories => "directories",
            ContextSource::Defaults(_) => "defaults",
            ContextSource::User(_) => "user",
        }
    }
}

/// Builds a [`Context`] from the environment, the build directories and
/// the JSON option files.
#[derive(Debug)]
pub struct ContextLoader {
    use_environment: bool,
    bp_dir: Option<PathBuf>,
    build_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    user_config: Option<PathBuf>,
    overrides: IndexMap<String, Value>,
}

impl ContextLoader {
    pub fn new(use_environment: bool) -> Self {
        Self {
            use_environment,
            bp_dir: None,
            build_dir: None,
            cache_dir: None,
            user_config: None,
            overrides: IndexMap::new(),
        }
    }

    /// Buildpack location
    pub fn bp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.bp_dir = Some(path.into());
        self
    }

    /// Application files; the droplet is built here
    pub fn build_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_dir = Some(path.into());
        self
    }

    /// Cache space for the buildpack
    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Use this options file instead of `<BUILD_DIR>/config/options.json`.
    /// Relative paths are resolved against the build directory.
    pub fn user_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_config = Some(path.into());
        self
    }

    /// Set a value that wins over every file layer
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Load a JSON options file. A missing file is an empty layer.
    pub fn load_options_file<P: AsRef<Path>>(&self, path: P) -> Result<IndexMap<String, Value>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(IndexMap::new());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            BuildpackError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            BuildpackError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    fn environment(&self) -> IndexMap<String, Value> {
        if !self.use_environment {
            return IndexMap::new();
        }
        env::vars().map(|(k, v)| (k, Value::String(v))).collect()
    }

    /// Assemble the context and make sure the build and cache directories exist
    pub fn load(self) -> Result<Context> {
        let mut ctx = Context::new();

        ctx.merge(self.environment());
        log::debug!("Context layer {}: {} keys", ContextSource::Environment.as_str(), ctx.len());

        if let Some(bp_dir) = &self.bp_dir {
            ctx.set(keys::BP_DIR, bp_dir.to_string_lossy().into_owned());
        }
        if let Some(build_dir) = &self.build_dir {
            fs::create_dir_all(build_dir)?;
            ctx.set(keys::BUILD_DIR, build_dir.to_string_lossy().into_owned());
        }
        if let Some(cache_dir) = &self.cache_dir {
            fs::create_dir_all(cache_dir)?;
            ctx.set(keys::CACHE_DIR, cache_dir.to_string_lossy().into_owned());
        }
        if !ctx.contains(keys::TMPDIR) {
            ctx.set(keys::TMPDIR, env::temp_dir().to_string_lossy().into_owned());
        }

        let mut layers = Vec::new();
        if let Some(bp_dir) = &self.bp_dir {
            layers.push(ContextSource::Defaults(bp_dir.join(DEFAULTS_FILE)));
        }
        match (&self.user_config, &self.build_dir) {
            (Some(path), _) if path.is_absolute() => layers.push(ContextSource::User(path.clone())),
            (Some(path), Some(build_dir)) => layers.push(ContextSource::User(build_dir.join(path))),
            (Some(path), None) => layers.push(ContextSource::User(path.clone())),
            (None, Some(build_dir)) => layers.push(ContextSource::User(build_dir.join(USER_FILE))),
            (None, None) => {}
        }

        for layer in &layers {
            let path = match layer {
                ContextSource::Defaults(p) | ContextSource::User(p) => p,
                _ => continue,
            };
            let values = self.load_options_file(path)?;
            log::debug!("Context layer {} ({}): {} keys", layer.as_str(), path.display(), values.len());
            ctx.merge(values);
        }

        ctx.merge(self.overrides);

        Ok(ctx)
    }
}
