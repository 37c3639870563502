//! Error types for the defense crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefenseError {
    #[error("{command}: binary not found at {path}")]
    BinaryMissing { command: String, path: String },

    #[error("{command} failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{command} timed out after {secs}s")]
    CommandTimeout { command: String, secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DefenseError>;
