use std::sync::Arc;

use serde::Serialize;
use tether_dap::types::GotoTargetsArguments;
use tether_dap::{Source, StoppedEventBody};

use crate::breakpoints::{normalize_path, BreakpointAttributes, BreakpointKey, BreakpointSpec};
use crate::controller::{sync_file_with, DebugController};
use crate::error::{DebugError, Result};
use crate::pending::StopSignal;
use crate::session::ActiveSession;
use crate::tracker::FrameInfo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopSummary {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    /// Innermost frame of the refreshed stack trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<FrameInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hit_breakpoint_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Stopped(StopSummary),
    Exited {
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Continue,
    Next,
    StepIn,
    StepOut,
    Pause,
    Goto { target_id: i64 },
}

impl Control {
    fn operation(self) -> &'static str {
        match self {
            Control::Continue => "continue",
            Control::Next => "next",
            Control::StepIn => "step_in",
            Control::StepOut => "step_out",
            Control::Pause => "pause",
            Control::Goto { .. } => "jump",
        }
    }

    fn command(self) -> &'static str {
        match self {
            Control::Continue => "continue",
            Control::Next => "next",
            Control::StepIn => "stepIn",
            Control::StepOut => "stepOut",
            Control::Pause => "pause",
            Control::Goto { .. } => "goto",
        }
    }
}

impl DebugController {
    pub async fn r#continue(&self) -> Result<ExecutionOutcome> {
        self.execute(Control::Continue).await
    }

    pub async fn next(&self) -> Result<ExecutionOutcome> {
        self.execute(Control::Next).await
    }

    pub async fn step_in(&self) -> Result<ExecutionOutcome> {
        self.execute(Control::StepIn).await
    }

    pub async fn step_out(&self) -> Result<ExecutionOutcome> {
        self.execute(Control::StepOut).await
    }

    pub async fn pause(&self) -> Result<ExecutionOutcome> {
        self.execute(Control::Pause).await
    }

    /// Continue until `line` in the source of the resolved frame.
    ///
    /// A temporary helper breakpoint is placed there unless one already
    /// exists, and removed afterwards if the stop happened elsewhere.
    pub async fn run_until(&self, line: i64, frame_id: Option<i64>) -> Result<ExecutionOutcome> {
        validate_line(line)?;
        let session = self.shared.require_session()?;
        let path = self.frame_path(frame_id)?;
        let path = normalize_path(&path)?;
        let _exec = self
            .shared
            .exec_lock
            .try_lock()
            .map_err(|_| DebugError::Busy)?;

        let helper = {
            let mut registry = self.shared.registry.lock().await;
            if registry.contains_line(&path, line) {
                None
            } else {
                let key = BreakpointKey {
                    path: path.clone(),
                    line,
                    column: None,
                };
                registry.set(BreakpointSpec::new(
                    key.clone(),
                    BreakpointAttributes {
                        temporary: true,
                        ..Default::default()
                    },
                ));
                let synced = sync_file_with(&session, &mut registry, &path, "run_until").await;
                if let Err(err) = synced {
                    registry.remove(&key.path, key.line, key.column);
                    return Err(err);
                }
                Some(key)
            }
        };

        let outcome = self.execute_locked(&session, Control::Continue).await;

        if let Some(key) = helper {
            let mut registry = self.shared.registry.lock().await;
            let still_present = registry
                .get(&key.path, key.line, key.column)
                .is_some_and(|spec| spec.temporary);
            if still_present {
                registry.remove(&key.path, key.line, key.column);
                let live = self
                    .shared
                    .current_session()
                    .is_some_and(|current| current.id == session.id);
                if live {
                    if let Err(err) =
                        sync_file_with(&session, &mut registry, &key.path, "run_until").await
                    {
                        tracing::warn!(target: "tether.debug", error = %err, "failed to remove run-until breakpoint");
                    }
                }
            }
        }

        outcome
    }

    /// Move execution to `line` without running the code in between.
    pub async fn jump(&self, line: i64, frame_id: Option<i64>) -> Result<ExecutionOutcome> {
        validate_line(line)?;
        let session = self.shared.require_session()?;
        let path = self.frame_path(frame_id)?;
        if !session.capabilities.supports_goto_targets_request {
            return Err(DebugError::rejected(
                "jump",
                "the adapter does not support jumping to a line",
            ));
        }
        let _exec = self
            .shared
            .exec_lock
            .try_lock()
            .map_err(|_| DebugError::Busy)?;

        let targets = session
            .client
            .goto_targets(&GotoTargetsArguments {
                source: Source::from_path(path),
                line,
                column: None,
            })
            .await
            .map_err(|err| DebugError::from_dap("jump", err))?;
        let Some(target) = targets.first() else {
            return Err(DebugError::rejected(
                "jump",
                format!("line {line} is not a valid jump target"),
            ));
        };

        self.execute_locked(
            &session,
            Control::Goto {
                target_id: target.id,
            },
        )
        .await
    }

    fn frame_path(&self, frame_id: Option<i64>) -> Result<String> {
        let tracker = self.shared.tracker.read();
        let frame = tracker.resolve_frame(frame_id)?;
        frame.path.clone().ok_or_else(|| {
            DebugError::FrameUnavailable(format!("frame {} has no source path", frame.id))
        })
    }

    async fn execute(&self, control: Control) -> Result<ExecutionOutcome> {
        let session = self.shared.require_session()?;
        let _exec = self
            .shared
            .exec_lock
            .try_lock()
            .map_err(|_| DebugError::Busy)?;
        self.execute_locked(&session, control).await
    }

    /// Issue `control` and wait for the stop it causes. The caller holds the
    /// execution lock.
    async fn execute_locked(
        &self,
        session: &Arc<ActiveSession>,
        control: Control,
    ) -> Result<ExecutionOutcome> {
        let operation = control.operation();
        let stop_timeout = self.stop_timeout();

        let _gate = tokio::time::timeout(stop_timeout, self.shared.gate.write())
            .await
            .map_err(|_| DebugError::Timeout {
                operation: operation.to_string(),
            })?;

        let thread_id = self.select_thread(session, operation).await?;
        let generation = self.shared.tracker.read().generation();
        let stopped = session.pending.open()?;

        tracing::debug!(target: "tether.debug", session = session.id, operation, thread_id, "issuing execution request");
        let response = match control {
            Control::Goto { target_id } => session.client.goto(thread_id, target_id).await,
            other => session.client.control(other.command(), thread_id).await,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                session.pending.cancel();
                return Err(DebugError::from_dap(operation, err));
            }
        };
        session.pending.arm(response.seq);
        self.shared.tracker.write().mark_running_if(generation);

        let signal = match tokio::time::timeout(stop_timeout, stopped).await {
            Ok(Ok(signal)) => signal,
            Ok(Err(_closed)) => return Err(DebugError::SessionTerminated),
            Err(_elapsed) => {
                session.pending.cancel();
                tracing::warn!(target: "tether.debug", session = session.id, operation, "no stop observed before the deadline");
                return Err(DebugError::Timeout {
                    operation: operation.to_string(),
                });
            }
        };

        match signal {
            StopSignal::Stopped { body, .. } => {
                Ok(ExecutionOutcome::Stopped(self.stop_summary(body)))
            }
            StopSignal::Exited { exit_code } => Ok(ExecutionOutcome::Exited { exit_code }),
            StopSignal::Disconnected => Err(DebugError::SessionTerminated),
        }
    }

    /// The thread of the last stop, else the first thread the adapter lists.
    async fn select_thread(&self, session: &ActiveSession, operation: &str) -> Result<i64> {
        let last_stopped = self.shared.tracker.read().thread_id();
        if let Some(thread_id) = last_stopped {
            return Ok(thread_id);
        }
        let threads = session
            .client
            .threads()
            .await
            .map_err(|err| DebugError::from_dap(operation, err))?;
        threads
            .first()
            .map(|thread| thread.id)
            .ok_or_else(|| DebugError::rejected(operation, "the adapter reported no threads"))
    }

    fn stop_summary(&self, body: StoppedEventBody) -> StopSummary {
        let tracker = self.shared.tracker.read();
        StopSummary {
            reason: body.reason,
            description: body.description,
            thread_id: body.thread_id.or(tracker.thread_id()),
            frame: tracker.frame_at(0).cloned(),
            hit_breakpoint_ids: body.hit_breakpoint_ids,
        }
    }
}

fn validate_line(line: i64) -> Result<()> {
    if line < 1 {
        return Err(DebugError::InvalidArgument(format!(
            "line must be at least 1, got {line}"
        )));
    }
    Ok(())
}
