use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DapError>;

#[derive(Debug, Error)]
pub enum DapError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("dap protocol error: {0}")]
    Protocol(String),

    /// The adapter answered with `success: false`.
    #[error("{command} failed: {message}")]
    Rejected { command: String, message: String },

    #[error("{command} timed out waiting for the adapter")]
    Timeout { command: String },

    #[error("adapter connection closed")]
    ConnectionClosed,

    #[error("adapter client shut down")]
    Cancelled,
}
