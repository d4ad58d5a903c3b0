//! Global options and context loading shared by every subcommand.

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use bpx_pm::config::{Context, ContextLoader};

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Application directory the droplet is built in (BUILD_DIR)
    #[arg(long, global = true, env = "BUILD_DIR", value_name = "DIR")]
    pub build_dir: Option<PathBuf>,

    /// Cache directory shared between builds (CACHE_DIR)
    #[arg(long, global = true, env = "CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Buildpack directory holding defaults/options.json (BP_DIR)
    #[arg(long, global = true, env = "BP_DIR", value_name = "DIR")]
    pub buildpack_dir: Option<PathBuf>,

    /// Options file used instead of <BUILD_DIR>/config/options.json
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Extra context values
    #[arg(long = "set", global = true, value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Do not read the process environment into the context
    #[arg(long, global = true)]
    pub no_env: bool,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Build the context snapshot every subcommand works from
    pub fn load_context(&self) -> Result<Arc<Context>> {
        let mut loader = ContextLoader::new(!self.no_env);

        if let Some(dir) = &self.buildpack_dir {
            loader = loader.bp_dir(dir);
        }
        if let Some(dir) = &self.build_dir {
            loader = loader.build_dir(dir);
        }
        if let Some(dir) = &self.cache_dir {
            loader = loader.cache_dir(dir);
        }
        if let Some(path) = &self.config {
            loader = loader.user_config(path);
        }
        for pair in &self.set {
            let (key, value) = split_pair(pair)?;
            loader = loader.set(key, value);
        }

        let ctx = loader.load().context("Failed to load buildpack configuration")?;
        log::debug!("Loaded context with {} keys", ctx.len());
        Ok(Arc::new(ctx))
    }
}

/// Split `NAME=VALUE`
pub fn split_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => anyhow::bail!("Expected NAME=VALUE, got {:?}", pair),
    }
}
