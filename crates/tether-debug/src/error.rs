use serde::Serialize;
use tether_dap::DapError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DebugError>;

/// Stable classification surfaced to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidArgument,
    NoActiveSession,
    FrameUnavailable,
    AdapterRejected,
    Timeout,
    SessionTerminated,
    Busy,
    Transport,
}

#[derive(Debug, Error)]
pub enum DebugError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no breakpoint at {path}:{line}")]
    UnknownBreakpoint { path: String, line: i64 },

    #[error("no active debug session")]
    NoActiveSession,

    #[error("nothing to restart: no program has been launched yet")]
    NothingToRestart,

    #[error("frame unavailable: {0}")]
    FrameUnavailable(String),

    #[error("{operation} rejected by the adapter: {message}")]
    AdapterRejected { operation: String, message: String },

    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("debug session terminated")]
    SessionTerminated,

    #[error("another execution operation is still waiting for a stop")]
    Busy,

    #[error("adapter transport failed: {0}")]
    Transport(String),
}

impl DebugError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DebugError::InvalidArgument(_) | DebugError::UnknownBreakpoint { .. } => {
                ErrorKind::InvalidArgument
            }
            DebugError::NoActiveSession | DebugError::NothingToRestart => {
                ErrorKind::NoActiveSession
            }
            DebugError::FrameUnavailable(_) => ErrorKind::FrameUnavailable,
            DebugError::AdapterRejected { .. } => ErrorKind::AdapterRejected,
            DebugError::Timeout { .. } => ErrorKind::Timeout,
            DebugError::SessionTerminated => ErrorKind::SessionTerminated,
            DebugError::Busy => ErrorKind::Busy,
            DebugError::Transport(_) => ErrorKind::Transport,
        }
    }

    pub(crate) fn rejected(operation: &str, message: impl Into<String>) -> Self {
        DebugError::AdapterRejected {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Attach the caller-facing operation name to a wire error.
    pub(crate) fn from_dap(operation: &str, err: DapError) -> Self {
        match err {
            DapError::Rejected { command, message } if command == operation => {
                DebugError::rejected(operation, message)
            }
            DapError::Rejected { command, message } => {
                DebugError::rejected(operation, format!("{command}: {message}"))
            }
            DapError::Timeout { command } if command == operation => DebugError::Timeout {
                operation: operation.to_string(),
            },
            DapError::Timeout { command } => DebugError::Timeout {
                operation: format!("{operation} ({command})"),
            },
            DapError::ConnectionClosed | DapError::Cancelled => DebugError::SessionTerminated,
            DapError::Io(err) => DebugError::Transport(err.to_string()),
            DapError::Protocol(message) => DebugError::Transport(message),
        }
    }
}
