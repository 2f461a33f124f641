//! Error types for check plugin execution.

use thiserror::Error;

/// Errors that can occur while running a check plugin (§4.1).
#[derive(Error, Debug)]
pub enum Error {
    /// The plugin binary could not be spawned (not found, not executable,
    /// permission denied, ...).
    #[error("failed to spawn check plugin {command:?}: {source}")]
    Spawn {
        command: Vec<String>,
        source: std::io::Error,
    },

    /// Writing the supplied stdin payload to the child failed.
    #[error("failed to write check input: {0}")]
    StdinWrite(std::io::Error),

    /// Reading the child's stdout/stderr failed.
    #[error("failed to read check output: {0}")]
    OutputRead(std::io::Error),

    /// Waiting on the child process failed.
    #[error("failed to wait on check plugin: {0}")]
    Wait(std::io::Error),

    /// An empty argv was supplied.
    #[error("check command is empty")]
    EmptyCommand,
}

pub type Result<T> = std::result::Result<T, Error>;
