//! Multiplexed process supervisor.
//!
//! Runs several long-lived commands side by side, merges their output into
//! one timestamped log and shuts the whole group down once any of them exits.

mod error;
mod manager;
mod printer;

pub use error::{ProcmanError, Result};
pub use manager::{exit_code, Output, ProcessManager, DEFAULT_GRACE_PERIOD, INTERRUPTED_CODE, TERMINATED_CODE};
pub use printer::{column_width, Printer, SYSTEM_NAME};
