//! Install commands - fetch, verify, cache and unpack binaries.

use anyhow::{Context as _, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use bpx_pm::config::Context;
use bpx_pm::{DirectInstall, InstallResult, Installer};

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Package keys, e.g. PHP or HTTPD
    #[arg(required = true, value_name = "KEY")]
    pub keys: Vec<String>,
}

#[derive(Args, Debug)]
pub struct InstallDirectArgs {
    /// Artifact URL (http, https or file)
    pub url: String,

    /// Expected digest, or a URL serving it
    #[arg(long, value_name = "DIGEST|URL")]
    pub digest: String,

    /// Directory to install into
    #[arg(long, value_name = "DIR")]
    pub dest: PathBuf,

    /// Drop the top-level directory of the archive
    #[arg(long)]
    pub strip: bool,

    /// Copy the artifact instead of extracting it
    #[arg(long)]
    pub no_extract: bool,

    /// Cache key and file name to use instead of the URL's last segment
    #[arg(long, value_name = "NAME")]
    pub filename: Option<String>,
}

#[derive(Args, Debug)]
pub struct InstallModulesArgs {
    /// Package key owning the module pattern, e.g. PHP
    pub key: String,

    /// Module names
    #[arg(required = true, value_name = "MODULE")]
    pub modules: Vec<String>,
}

pub async fn execute(ctx: Arc<Context>, args: InstallArgs) -> Result<i32> {
    let installer = Installer::from_context(ctx)?;

    for key in &args.keys {
        let result = installer
            .install(key)
            .await
            .with_context(|| format!("Failed to install {}", key))?;
        report(key, &result);
    }

    Ok(0)
}

pub async fn execute_direct(ctx: Arc<Context>, args: InstallDirectArgs) -> Result<i32> {
    let installer = Installer::from_context(ctx)?;

    let mut request = DirectInstall::new(&args.url, &args.digest, &args.dest)
        .strip(args.strip)
        .extract(!args.no_extract);
    if let Some(filename) = &args.filename {
        request = request.filename(filename);
    }

    let result = installer
        .install_direct(&request)
        .await
        .with_context(|| format!("Failed to install {}", args.url))?;
    report(&args.url, &result);

    Ok(0)
}

pub async fn execute_modules(ctx: Arc<Context>, args: InstallModulesArgs) -> Result<i32> {
    let installer = Installer::from_context(ctx)?;

    let results = installer
        .install_modules(&args.key, &args.modules)
        .await
        .with_context(|| format!("Failed to install {} modules", args.key))?;

    for (module, result) in unique_modules(&args.modules).into_iter().zip(&results) {
        report(module, result);
    }
    println!(
        "{} Installed {} module(s) for {}",
        style("Success:").green().bold(),
        results.len(),
        args.key
    );

    Ok(0)
}

/// Module names in first-seen order, the way the installer walks them
fn unique_modules(modules: &[String]) -> Vec<&str> {
    let mut unique: Vec<&str> = Vec::with_capacity(modules.len());
    for module in modules {
        if !unique.contains(&module.as_str()) {
            unique.push(module);
        }
    }
    unique
}

fn report(name: &str, result: &InstallResult) {
    let origin = if result.from_cache { "cache" } else { "download" };
    println!(
        "  - Installed {} to {} ({})",
        style(name).green(),
        result.path.display(),
        style(origin).dim()
    );
}
