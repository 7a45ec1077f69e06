//! Debug Adapter Protocol client for Tether.
//!
//! The client speaks DAP over any async byte stream (TCP or a spawned
//! adapter's stdio). Requests are correlated with responses by sequence
//! number; events are decoded and fanned out over a broadcast channel so the
//! controller can process them in arrival order.

mod client;
pub mod codec;
mod error;
pub mod types;

pub use client::{DapClient, DapClientConfig};
pub use error::{DapError, Result};
pub use types::{
    AdapterEvent, Breakpoint, Capabilities, EvaluateResponseBody, GotoTarget, Scope, Source,
    SourceBreakpoint, StackFrame, StoppedEventBody, Thread, Variable,
};

// The mock adapter is only needed for tests and downstream integration suites.
#[cfg(any(test, feature = "wire-test-support"))]
pub mod mock;
