//! Runtime command parsing and resolution.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Runtime command error.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime command cannot be parsed: {0:?}")]
    InvalidCommand(String),
    #[error("runtime command is empty")]
    EmptyCommand,
    #[error("runtime executable not found: {0}")]
    NotFound(String),
}

/// The interpreter that runs background job scripts.
///
/// Parsed from a single configured string, so extra interpreter flags
/// ride along: `"node"`, `"python3 -u"`, `"deno run"`.
#[derive(Debug, Clone)]
pub struct RuntimeCommand {
    program: String,
    args: Vec<String>,
}

impl RuntimeCommand {
    /// Parse a runtime command line.
    ///
    /// # Errors
    /// Returns an error when the line cannot be shell-split or is empty.
    pub fn parse(raw: &str) -> Result<Self, RuntimeError> {
        let mut parts =
            shlex::split(raw).ok_or_else(|| RuntimeError::InvalidCommand(raw.to_owned()))?;
        if parts.is_empty() {
            return Err(RuntimeError::EmptyCommand);
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
        })
    }

    /// Interpreter program name as configured.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Interpreter arguments preceding the script path.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Resolve the program to an absolute executable path.
    ///
    /// # Errors
    /// Returns `RuntimeError::NotFound` if the executable cannot be
    /// located on the current PATH.
    pub async fn resolve(&self) -> Result<PathBuf, RuntimeError> {
        let path = Path::new(&self.program);
        if path.is_absolute() && path.is_file() {
            return Ok(path.to_path_buf());
        }

        let program = self.program.clone();
        tokio::task::spawn_blocking(move || which::which(program))
            .await
            .ok()
            .and_then(Result::ok)
            .ok_or_else(|| RuntimeError::NotFound(self.program.clone()))
    }
}
