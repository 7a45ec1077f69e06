use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_config::{AdapterConfig, InspectionConfig, TetherConfig, TimeoutsConfig};
use tether_dap::types::SetBreakpointsArguments;
use tether_dap::Source;

use crate::breakpoints::{
    normalize_optional, normalize_path, BreakpointAttributes, BreakpointKey, BreakpointRegistry,
    BreakpointSpec, SetOutcome,
};
use crate::error::{DebugError, Result};
use crate::host::{ActiveFile, SharedActiveFile};
use crate::pending::StopSignal;
use crate::session::ActiveSession;
use crate::supervisor::LaunchConfig;
use crate::tracker::{FrameInfo, SessionTracker};

#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub timeouts: TimeoutsConfig,
    pub inspection: InspectionConfig,
    pub adapter: Option<AdapterConfig>,
}

impl From<&TetherConfig> for ControllerConfig {
    fn from(config: &TetherConfig) -> Self {
        Self {
            timeouts: config.timeouts,
            inspection: config.inspection.clone(),
            adapter: config.adapter.clone(),
        }
    }
}

/// A breakpoint location as supplied by a caller. The line is required; the
/// path falls back to the host's active file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub column: Option<i64>,
}

impl Location {
    pub fn new(path: impl Into<String>, line: i64) -> Self {
        Self {
            path: Some(path.into()),
            line: Some(line),
            column: None,
        }
    }

    /// A location in the host's active file.
    pub fn line(line: i64) -> Self {
        Self {
            path: None,
            line: Some(line),
            column: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoveOutcome {
    Removed { breakpoint: BreakpointSpec },
    NotFound { path: PathBuf, line: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetBreakpointReport {
    pub outcome: SetOutcome,
    pub breakpoint: BreakpointSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackTraceReport {
    pub frames: Vec<FrameInfo>,
    pub cursor: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub text: String,
}

pub(crate) struct Shared {
    pub(crate) config: ControllerConfig,
    pub(crate) registry: tokio::sync::Mutex<BreakpointRegistry>,
    pub(crate) tracker: parking_lot::RwLock<SessionTracker>,
    /// Owned by the supervisor: only launch, quit and session teardown touch it.
    pub(crate) session: parking_lot::Mutex<Option<Arc<ActiveSession>>>,
    pub(crate) last_launch: parking_lot::Mutex<Option<LaunchConfig>>,
    /// Held for the whole life of an execution operation.
    pub(crate) exec_lock: tokio::sync::Mutex<()>,
    /// Execution operations take it exclusively, inspections shared.
    pub(crate) gate: tokio::sync::RwLock<()>,
    pub(crate) active_file: Arc<dyn ActiveFile>,
    next_session_id: AtomicU64,
}

impl Shared {
    pub(crate) fn current_session(&self) -> Option<Arc<ActiveSession>> {
        self.session.lock().clone()
    }

    pub(crate) fn require_session(&self) -> Result<Arc<ActiveSession>> {
        self.current_session().ok_or(DebugError::NoActiveSession)
    }

    pub(crate) fn allocate_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Push the complete breakpoint list of `path` to the adapter and merge
    /// the verification result. A no-op without a session.
    pub(crate) async fn sync_file(
        &self,
        registry: &mut BreakpointRegistry,
        path: &Path,
        operation: &str,
    ) -> Result<()> {
        let Some(session) = self.current_session() else {
            return Ok(());
        };
        sync_file_with(&session, registry, path, operation).await
    }

    /// Tear down session `id` if it is still the active one.
    pub(crate) async fn end_session(&self, id: u64, reason: &str) {
        let removed = {
            let mut slot = self.session.lock();
            if slot.as_ref().is_some_and(|session| session.id == id) {
                slot.take()
            } else {
                None
            }
        };
        let Some(session) = removed else {
            return;
        };

        tracing::info!(target: "tether.debug", session = id, reason, "debug session ended");
        session.pending.finish(StopSignal::Disconnected);
        session.client.shutdown();
        self.tracker.write().clear();
        self.registry.lock().await.reset_verification();
    }

    /// Drop temporary breakpoints hit by a stop and resync their files.
    pub(crate) async fn remove_hit_temporaries(
        &self,
        session: &ActiveSession,
        reason: &str,
        hit_ids: &[i64],
        location: Option<(PathBuf, i64)>,
    ) {
        let mut registry = self.registry.lock().await;
        let affected = registry.take_hit_temporaries(
            reason,
            hit_ids,
            location.as_ref().map(|(path, line)| (path.as_path(), *line)),
        );
        for path in affected {
            tracing::debug!(target: "tether.debug", path = %path.display(), "removing hit temporary breakpoint");
            let synced = sync_file_with(session, &mut registry, &path, "remove_temporary").await;
            if let Err(err) = synced {
                tracing::warn!(target: "tether.debug", path = %path.display(), error = %err, "failed to resync breakpoints");
            }
        }
    }
}

pub(crate) async fn sync_file_with(
    session: &ActiveSession,
    registry: &mut BreakpointRegistry,
    path: &Path,
    operation: &str,
) -> Result<()> {
    let breakpoints = registry.source_breakpoints(path);
    let arguments = SetBreakpointsArguments {
        source: Source::from_path(path.display().to_string()),
        lines: breakpoints.iter().map(|bp| bp.line).collect(),
        breakpoints,
    };
    let reported = session
        .client
        .set_breakpoints(&arguments)
        .await
        .map_err(|err| DebugError::from_dap(operation, err))?;
    if reported.len() != arguments.breakpoints.len() {
        tracing::warn!(
            target: "tether.debug",
            path = %path.display(),
            sent = arguments.breakpoints.len(),
            received = reported.len(),
            "adapter answered setBreakpoints with a different count"
        );
    }
    registry.apply_verification(path, &reported);
    Ok(())
}

/// The debugging-session controller.
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct DebugController {
    pub(crate) shared: Arc<Shared>,
    /// Overrides the configured stop and request deadlines for calls made
    /// through this handle.
    call_timeout: Option<Duration>,
}

impl std::fmt::Debug for DebugController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugController")
            .field("has_session", &self.has_session())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl DebugController {
    pub fn new(config: ControllerConfig, active_file: Arc<dyn ActiveFile>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                registry: tokio::sync::Mutex::new(BreakpointRegistry::new()),
                tracker: parking_lot::RwLock::new(SessionTracker::new()),
                session: parking_lot::Mutex::new(None),
                last_launch: parking_lot::Mutex::new(None),
                exec_lock: tokio::sync::Mutex::new(()),
                gate: tokio::sync::RwLock::new(()),
                active_file,
                next_session_id: AtomicU64::new(0),
            }),
            call_timeout: None,
        }
    }

    /// A controller with no host; every breakpoint operation must name a path.
    pub fn standalone(config: ControllerConfig) -> Self {
        Self::new(config, Arc::new(SharedActiveFile::new()))
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    /// A handle on the same session whose execution and inspection calls
    /// give up after `timeout` instead of the configured deadlines.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            call_timeout: Some(timeout),
        }
    }

    /// How long an execution operation waits for the gate and for its stop.
    pub(crate) fn stop_timeout(&self) -> Duration {
        self.call_timeout
            .unwrap_or_else(|| self.shared.config.timeouts.stop())
    }

    /// How long an inspection may take, queueing included.
    pub(crate) fn request_timeout(&self) -> Duration {
        self.call_timeout
            .unwrap_or_else(|| self.shared.config.timeouts.request())
    }

    pub fn has_session(&self) -> bool {
        self.shared.session.lock().is_some()
    }

    fn resolve_location(&self, location: &Location) -> Result<BreakpointKey> {
        let line = location
            .line
            .ok_or_else(|| DebugError::InvalidArgument("line is required".to_string()))?;
        if line < 1 {
            return Err(DebugError::InvalidArgument(format!(
                "line must be at least 1, got {line}"
            )));
        }
        if let Some(column) = location.column {
            if column < 1 {
                return Err(DebugError::InvalidArgument(format!(
                    "column must be at least 1, got {column}"
                )));
            }
        }
        let path = match normalize_optional(location.path.clone()) {
            Some(path) => normalize_path(&path)?,
            None => {
                let active = self.shared.active_file.active_file().ok_or_else(|| {
                    DebugError::InvalidArgument(
                        "no path given and the host has no active file".to_string(),
                    )
                })?;
                normalize_path(&active.to_string_lossy())?
            }
        };
        Ok(BreakpointKey {
            path,
            line,
            column: location.column,
        })
    }

    pub async fn set_breakpoint(
        &self,
        location: &Location,
        attributes: BreakpointAttributes,
    ) -> Result<SetBreakpointReport> {
        let key = self.resolve_location(location)?;
        if attributes.ignore_count.is_some()
            && normalize_optional(attributes.hit_condition.clone()).is_some()
        {
            tracing::debug!(
                target: "tether.debug",
                path = %key.path.display(),
                line = key.line,
                "hit condition takes precedence over ignore count"
            );
        }

        let mut registry = self.shared.registry.lock().await;
        let outcome = registry.set(BreakpointSpec::new(key.clone(), attributes));
        tracing::debug!(target: "tether.debug", path = %key.path.display(), line = key.line, ?outcome, "set breakpoint");
        self.shared
            .sync_file(&mut registry, &key.path, "set_breakpoint")
            .await?;
        let breakpoint = registry
            .get(&key.path, key.line, key.column)
            .cloned()
            .ok_or_else(|| DebugError::UnknownBreakpoint {
                path: key.path.display().to_string(),
                line: key.line,
            })?;
        Ok(SetBreakpointReport {
            outcome,
            breakpoint,
        })
    }

    pub async fn set_temporary_breakpoint(
        &self,
        location: &Location,
        attributes: BreakpointAttributes,
    ) -> Result<SetBreakpointReport> {
        self.set_breakpoint(
            location,
            BreakpointAttributes {
                temporary: true,
                ..attributes
            },
        )
        .await
    }

    pub async fn remove_breakpoint(&self, location: &Location) -> Result<RemoveOutcome> {
        let key = self.resolve_location(location)?;
        let mut registry = self.shared.registry.lock().await;
        let Some(removed) = registry.remove(&key.path, key.line, key.column) else {
            tracing::debug!(target: "tether.debug", path = %key.path.display(), line = key.line, "no breakpoint to remove");
            return Ok(RemoveOutcome::NotFound {
                path: key.path,
                line: key.line,
            });
        };
        self.shared
            .sync_file(&mut registry, &key.path, "remove_breakpoint")
            .await?;
        Ok(RemoveOutcome::Removed {
            breakpoint: removed,
        })
    }

    /// Mutate one existing breakpoint and push its file.
    async fn modify<F>(
        &self,
        location: &Location,
        operation: &str,
        update: F,
    ) -> Result<BreakpointSpec>
    where
        F: FnOnce(&mut BreakpointSpec),
    {
        let key = self.resolve_location(location)?;
        let mut registry = self.shared.registry.lock().await;
        let updated = registry.update(&key.path, key.line, key.column, update)?;
        self.shared
            .sync_file(&mut registry, &key.path, operation)
            .await?;
        Ok(registry
            .get(&updated.path, updated.line, updated.column)
            .cloned()
            .unwrap_or(updated))
    }

    pub async fn enable_breakpoint(&self, location: &Location) -> Result<BreakpointSpec> {
        self.modify(location, "enable_breakpoint", |spec| spec.enabled = true)
            .await
    }

    pub async fn disable_breakpoint(&self, location: &Location) -> Result<BreakpointSpec> {
        self.modify(location, "disable_breakpoint", |spec| spec.enabled = false)
            .await
    }

    /// Set or clear (`None`, empty) the condition of a breakpoint.
    pub async fn set_condition(
        &self,
        location: &Location,
        condition: Option<String>,
    ) -> Result<BreakpointSpec> {
        let condition = normalize_optional(condition);
        self.modify(location, "set_condition", |spec| spec.condition = condition)
            .await
    }

    pub async fn set_hit_condition(
        &self,
        location: &Location,
        hit_condition: Option<String>,
    ) -> Result<BreakpointSpec> {
        let hit_condition = normalize_optional(hit_condition);
        self.modify(location, "set_hit_condition", |spec| {
            spec.hit_condition = hit_condition
        })
        .await
    }

    pub async fn set_ignore_count(
        &self,
        location: &Location,
        ignore_count: Option<u32>,
    ) -> Result<BreakpointSpec> {
        self.modify(location, "set_ignore_count", |spec| {
            spec.ignore_count = ignore_count
        })
        .await
    }

    /// Turn a breakpoint into a tracepoint, or back with `None`.
    pub async fn set_log_message(
        &self,
        location: &Location,
        log_message: Option<String>,
    ) -> Result<BreakpointSpec> {
        let log_message = normalize_optional(log_message);
        self.modify(location, "set_log_message", |spec| {
            spec.log_message = log_message
        })
        .await
    }

    /// Remove every breakpoint of one file, or of all files.
    pub async fn clear_breakpoints(&self, path: Option<String>) -> Result<usize> {
        let path = normalize_optional(path)
            .map(|path| normalize_path(&path))
            .transpose()?;
        let mut registry = self.shared.registry.lock().await;
        let cleared = registry.clear(path.as_deref());
        let mut removed = 0;
        for (path, count) in cleared {
            removed += count;
            self.shared
                .sync_file(&mut registry, &path, "clear_breakpoints")
                .await?;
        }
        Ok(removed)
    }

    pub async fn list_active_breakpoints(&self) -> Vec<BreakpointSpec> {
        self.shared.registry.lock().await.list()
    }

    pub fn current_top_frame_id(&self) -> Option<i64> {
        self.shared.tracker.read().current_top_frame_id()
    }

    pub fn selected_frame(&self) -> Option<FrameInfo> {
        self.shared.tracker.read().selected_frame().cloned()
    }

    /// Move the frame cursor toward callers.
    pub fn up(&self) -> Result<FrameInfo> {
        self.move_cursor(1)
    }

    /// Move the frame cursor toward the innermost frame.
    pub fn down(&self) -> Result<FrameInfo> {
        self.move_cursor(-1)
    }

    pub fn move_cursor(&self, delta: isize) -> Result<FrameInfo> {
        self.shared.require_session()?;
        let mut tracker = self.shared.tracker.write();
        tracker.move_cursor(delta).cloned()
    }

    pub fn stack_trace(&self) -> Result<StackTraceReport> {
        self.shared.require_session()?;
        let tracker = self.shared.tracker.read();
        if tracker.frames().is_empty() {
            return Err(DebugError::FrameUnavailable(
                "the program is running; no stack trace is recorded".to_string(),
            ));
        }
        Ok(StackTraceReport {
            frames: tracker.frames().to_vec(),
            cursor: tracker.cursor(),
            thread_id: tracker.thread_id(),
            reason: tracker.stop_reason().map(str::to_owned),
            text: tracker.format_stack(),
        })
    }
}
