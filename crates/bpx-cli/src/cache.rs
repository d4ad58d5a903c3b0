//! Cache command - inspect and change the artifact cache.

use anyhow::{Context as _, Result};
use clap::Subcommand;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use bpx_pm::cache::base_directory;
use bpx_pm::config::Context;
use bpx_pm::{cache_from_context, digester_from_context, CacheManager};

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Exit 0 when KEY is cached with DIGEST, 1 otherwise
    Exists {
        key: String,
        digest: String,
    },

    /// Print the cached path of KEY when it has DIGEST
    Get {
        key: String,
        digest: String,
    },

    /// Store FILE under KEY
    Put {
        key: String,
        file: PathBuf,

        /// Expected digest of FILE (computed when omitted)
        #[arg(long)]
        digest: Option<String>,
    },

    /// Remove KEY from the cache
    Delete {
        key: String,
    },
}

pub async fn execute(ctx: Arc<Context>, command: CacheCommands) -> Result<i32> {
    let cache = cache_from_context(&ctx)?;
    log::debug!("Cache directory: {}", base_directory(&ctx).display());
    run(&ctx, cache.as_ref(), command).await
}

async fn run(ctx: &Context, cache: &dyn CacheManager, command: CacheCommands) -> Result<i32> {
    match command {
        CacheCommands::Exists { key, digest } => {
            let found = cache.exists(&key, &digest).await?;
            Ok(if found { 0 } else { 1 })
        }
        CacheCommands::Get { key, digest } => match cache.get(&key, &digest).await? {
            Some(path) => {
                println!("{}", path.display());
                Ok(0)
            }
            None => {
                eprintln!("{} {} is not cached", style("Info:").cyan(), key);
                Ok(1)
            }
        },
        CacheCommands::Put { key, file, digest } => {
            let digest = match digest {
                Some(digest) => digest,
                None => digester_from_context(ctx)?.calculate(&file).await?,
            };
            let path = cache
                .put(&key, &file, &digest)
                .await
                .with_context(|| format!("Failed to cache {}", file.display()))?;
            println!("{}", path.display());
            Ok(0)
        }
        CacheCommands::Delete { key } => {
            cache.delete(&key).await?;
            Ok(0)
        }
    }
}
