//! Start command - run the droplet's processes under one supervisor.

use anyhow::{bail, Result};
use clap::Args;
use std::time::Duration;

use bpx_procman::{ProcessManager, DEFAULT_GRACE_PERIOD};

use crate::context::split_pair;

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Process whose output is shown (repeatable)
    #[arg(long = "proc", value_name = "NAME=CMD")]
    pub procs: Vec<String>,

    /// Process whose output is discarded (repeatable)
    #[arg(long = "quiet", value_name = "NAME=CMD")]
    pub quiet: Vec<String>,

    /// Seconds to wait after SIGTERM before sending SIGKILL
    #[arg(long, value_name = "SECS")]
    pub grace: Option<f64>,
}

pub async fn execute(args: StartArgs) -> Result<i32> {
    let mut manager = build_manager(&args)?;
    let code = manager.run().await?;
    log::debug!("Supervisor finished with {}", code);
    Ok(code)
}

fn build_manager(args: &StartArgs) -> Result<ProcessManager> {
    if args.procs.is_empty() && args.quiet.is_empty() {
        bail!("Nothing to start, pass at least one --proc NAME=CMD");
    }

    let grace = match args.grace {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Duration::from_secs_f64(secs),
        Some(secs) => bail!("Invalid grace period: {}", secs),
        None => DEFAULT_GRACE_PERIOD,
    };

    let mut manager = ProcessManager::new().with_grace_period(grace);
    for pair in &args.procs {
        let (name, command) = split_pair(pair)?;
        manager.add_process(name, command, false);
    }
    for pair in &args.quiet {
        let (name, command) = split_pair(pair)?;
        manager.add_process(name, command, true);
    }
    Ok(manager)
}
