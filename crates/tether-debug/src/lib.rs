//! Debugging-session controller on top of a Debug Adapter Protocol adapter.
//!
//! [`DebugController`] owns one breakpoint registry for the lifetime of the
//! process and at most one adapter session at a time. Breakpoints can be
//! edited with or without a session; execution and inspection operations
//! need a live, stopped session.
//!
//! The crate also exposes the controller as named tools ([`dispatch`]) and a
//! newline-delimited JSON server around them ([`server`]).

pub mod breakpoints;
pub mod controller;
pub mod error;
pub mod execution;
pub mod host;
pub mod inspect;
mod pending;
pub mod server;
mod session;
pub mod supervisor;
pub mod tools;
pub mod tracker;

pub use crate::breakpoints::{BreakpointAttributes, BreakpointSpec, SetOutcome};
pub use crate::controller::{
    ControllerConfig, DebugController, Location, RemoveOutcome, SetBreakpointReport,
    StackTraceReport,
};
pub use crate::error::{DebugError, ErrorKind, Result};
pub use crate::execution::{ExecutionOutcome, StopSummary};
pub use crate::host::{ActiveFile, SharedActiveFile};
pub use crate::inspect::{Evaluation, SourceReport, VariablesReport};
pub use crate::supervisor::{LaunchConfig, LaunchReport};
pub use crate::tools::{dispatch, ToolCall, ToolResponse};
pub use crate::tracker::FrameInfo;
