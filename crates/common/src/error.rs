//! Error types for Meshwatch

use thiserror::Error;

/// Result type alias using Meshwatch Error
pub type Result<T> = std::result::Result<T, Error>;

/// Meshwatch error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Command `{program}` failed: {status}, output: {output}")]
    CommandFailed {
        program: String,
        status: String,
        output: String,
    },

    #[error("Mesh daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("Malformed daemon output: {0}")]
    MalformedOutput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("All {attempts} daemon start strategies failed: {last}")]
    LaunchExhausted { attempts: usize, last: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a `CommandFailed` from a finished process output
    pub fn command_failed(program: &str, output: &std::process::Output) -> Self {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Error::CommandFailed {
            program: program.to_string(),
            status: output.status.to_string(),
            output: combined.trim().to_string(),
        }
    }
}
