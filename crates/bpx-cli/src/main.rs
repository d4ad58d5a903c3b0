mod cache;
mod context;
mod digest;
mod install;
mod release;
mod start;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;

use context::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "bpx")]
#[command(about = "Buildpack binary installer and process supervisor")]
#[command(version)]
struct Args {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install packages configured in the build context
    Install(install::InstallArgs),

    /// Install a single artifact from a URL
    InstallDirect(install::InstallDirectArgs),

    /// Install modules of a package from its module pattern
    InstallModules(install::InstallModulesArgs),

    /// Print the digest of a file
    Digest(digest::DigestArgs),

    /// Inspect or change the artifact cache
    Cache {
        #[command(subcommand)]
        command: cache::CacheCommands,
    },

    /// Run processes side by side until the first one exits
    Start(start::StartArgs),

    /// Print the release metadata of the droplet
    Release,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn run() -> Result<i32> {
    let args = Args::parse();
    init_logging(args.global.verbose);

    let global = args.global;
    let rt = tokio::runtime::Runtime::new()?;

    match args.command {
        // Supervisor mode does not need the build context
        Commands::Start(start_args) => rt.block_on(start::execute(start_args)),
        Commands::Install(install_args) => {
            rt.block_on(install::execute(global.load_context()?, install_args))
        }
        Commands::InstallDirect(direct_args) => {
            rt.block_on(install::execute_direct(global.load_context()?, direct_args))
        }
        Commands::InstallModules(module_args) => {
            rt.block_on(install::execute_modules(global.load_context()?, module_args))
        }
        Commands::Digest(digest_args) => rt.block_on(digest::execute(global.load_context()?, digest_args)),
        Commands::Cache { command } => rt.block_on(cache::execute(global.load_context()?, command)),
        Commands::Release => release::execute(&*global.load_context()?),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            eprintln!("{} {}", console::style("Error:").red().bold(), e);
            for cause in e.chain().skip(1) {
                eprintln!("  Caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}
