use std::io::{self, Write};

/// Name of the printer used for supervisor messages
pub const SYSTEM_NAME: &str = "system";

/// Prefixes lines with a timestamp and a padded process name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Printer {
    name: String,
    width: usize,
}

impl Printer {
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }

    pub fn system(width: usize) -> Self {
        Self::new(SYSTEM_NAME, width)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `HH:MM:SS <name> | ` with the name left-aligned to the width
    pub fn prefix(&self) -> String {
        format!(
            "{} {:<width$} | ",
            chrono::Local::now().format("%H:%M:%S"),
            self.name,
            width = self.width
        )
    }

    /// Write one line. Empty lines are written bare.
    pub fn write_line(&self, out: &mut dyn Write, line: &str) -> io::Result<()> {
        if line.is_empty() {
            writeln!(out)?;
        } else {
            writeln!(out, "{}{}", self.prefix(), line)?;
        }
        out.flush()
    }
}

/// Column width for a set of process names; never narrower than the system printer
pub fn column_width<'a>(names: impl IntoIterator<Item = &'a str>) -> usize {
    names
        .into_iter()
        .map(|n| n.chars().count())
        .chain(std::iter::once(SYSTEM_NAME.len()))
        .max()
        .unwrap_or(0)
}
