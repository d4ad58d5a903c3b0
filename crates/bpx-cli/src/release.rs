//! Release command - print the droplet's default process types.

use anyhow::Result;
use std::io::{self, Write};

use bpx_pm::config::{keys, Context};

const DEFAULT_START_SCRIPT: &str = "$HOME/start.sh";

pub fn execute(ctx: &Context) -> Result<i32> {
    let stdout = io::stdout();
    write_release(ctx, &mut stdout.lock())?;
    Ok(0)
}

fn write_release(ctx: &Context, out: &mut dyn Write) -> io::Result<()> {
    let start_script = ctx
        .get_str(keys::START_SCRIPT_NAME)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_START_SCRIPT.to_string());

    writeln!(out, "default_process_types:")?;
    writeln!(out, "  web: {}", start_script)?;
    out.flush()
}
