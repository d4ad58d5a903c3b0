//! Digest command - hash a file the way the cache does.

use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use bpx_pm::config::{keys, Context};
use bpx_pm::digester_from_context;

#[derive(Args, Debug)]
pub struct DigestArgs {
    /// File to hash
    pub file: PathBuf,

    /// sha1, sha256 or sha512 (defaults to CACHE_HASH_ALGORITHM)
    #[arg(long, value_name = "ALGORITHM")]
    pub algorithm: Option<String>,

    /// Hash with the coreutils checksum tool instead of in-process
    #[arg(long)]
    pub external: bool,
}

pub async fn execute(ctx: Arc<Context>, args: DigestArgs) -> Result<i32> {
    let line = digest_line(&ctx, &args).await?;
    println!("{}", line);
    Ok(0)
}

/// `<hex>  <file>` as printed by `sha256sum`
async fn digest_line(ctx: &Context, args: &DigestArgs) -> Result<String> {
    let mut ctx = ctx.clone();
    if let Some(algorithm) = &args.algorithm {
        ctx = ctx.with(keys::CACHE_HASH_ALGORITHM, algorithm.as_str());
    }
    if args.external {
        ctx = ctx.with(keys::USE_EXTERNAL_HASH, true);
    }

    let digester = digester_from_context(&ctx)?;
    log::debug!("Hashing {} with {}", args.file.display(), digester.algorithm());

    let hex = digester.calculate(&args.file).await?;
    if hex.is_empty() {
        bail!("No such file: {}", args.file.display());
    }
    Ok(format!("{}  {}", hex, args.file.display()))
}
