//! Hashing through an external checksum tool.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::process::Command;

use super::{first_token, is_absent, DigestAlgorithm, Digester};
use crate::Result;

/// Runs `sha1sum`/`sha256sum`/`sha512sum` (or a configured program taking
/// the file as its last argument) and reads the digest from the first token
/// of its output.
#[derive(Debug, Clone)]
pub struct ExternalDigester {
    algorithm: DigestAlgorithm,
    program: String,
    args: Vec<String>,
}

impl ExternalDigester {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            program: algorithm.tool_name().to_string(),
            args: Vec::new(),
        }
    }

    /// Use another program, e.g. `shasum` with `["-a", "256"]`
    pub fn with_program(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.args = args;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Digester for ExternalDigester {
    fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    async fn calculate(&self, path: &Path) -> Result<String> {
        if is_absent(path) {
            return Ok(String::new());
        }

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .await
            .map_err(|e| io::Error::new(e.kind(), format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} failed with {}: {}", self.program, output.status, stderr.trim()),
            )
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(first_token(&stdout).to_lowercase())
    }
}
