use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tether_dap::{Breakpoint, SourceBreakpoint};

use crate::error::{DebugError, Result};

/// Identity of a breakpoint: normalized path plus line and optional column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointKey {
    pub path: PathBuf,
    pub line: i64,
    pub column: Option<i64>,
}

/// Caller-supplied breakpoint attributes.
///
/// Optional text attributes are normalized on the way in: `None`, an empty
/// string and whitespace all mean "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointAttributes {
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub ignore_count: Option<u32>,
    pub log_message: Option<String>,
    pub temporary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointSpec {
    pub path: PathBuf,
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    pub enabled: bool,
    pub temporary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,

    // Adapter-reported state, refreshed on every sync of the file.
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_line: Option<i64>,
}

impl BreakpointSpec {
    pub fn new(key: BreakpointKey, attributes: BreakpointAttributes) -> Self {
        Self {
            path: key.path,
            line: key.line,
            column: key.column,
            enabled: true,
            temporary: attributes.temporary,
            condition: normalize_optional(attributes.condition),
            hit_condition: normalize_optional(attributes.hit_condition),
            ignore_count: attributes.ignore_count,
            log_message: normalize_optional(attributes.log_message),
            verified: false,
            adapter_id: None,
            message: None,
            resolved_line: None,
        }
    }

    pub fn key(&self) -> BreakpointKey {
        BreakpointKey {
            path: self.path.clone(),
            line: self.line,
            column: self.column,
        }
    }

    /// Hit condition sent to the adapter. An explicit hit condition wins; an
    /// ignore count of `n` otherwise becomes `>n`.
    pub fn effective_hit_condition(&self) -> Option<String> {
        self.hit_condition.clone().or_else(|| {
            self.ignore_count
                .filter(|count| *count > 0)
                .map(|count| format!(">{count}"))
        })
    }

    pub fn is_tracepoint(&self) -> bool {
        self.log_message.is_some()
    }

    fn to_source_breakpoint(&self) -> SourceBreakpoint {
        SourceBreakpoint {
            line: self.line,
            column: self.column,
            condition: self.condition.clone(),
            hit_condition: self.effective_hit_condition(),
            log_message: self.log_message.clone(),
        }
    }

    fn clear_adapter_state(&mut self) {
        self.verified = false;
        self.adapter_id = None;
        self.message = None;
        self.resolved_line = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOutcome {
    Created,
    Replaced,
}

/// In-memory model of the breakpoints the caller wants, grouped per file.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    files: BTreeMap<PathBuf, BTreeMap<(i64, Option<i64>), BreakpointSpec>>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a breakpoint, replacing every attribute of an existing one at the
    /// same identity.
    pub fn set(&mut self, spec: BreakpointSpec) -> SetOutcome {
        let file = self.files.entry(spec.path.clone()).or_default();
        match file.insert((spec.line, spec.column), spec) {
            Some(_) => SetOutcome::Replaced,
            None => SetOutcome::Created,
        }
    }

    /// Resolve a location to an existing identity. Without a column, the sole
    /// breakpoint on the line matches.
    fn resolve(&self, path: &Path, line: i64, column: Option<i64>) -> Option<(i64, Option<i64>)> {
        let file = self.files.get(path)?;
        if file.contains_key(&(line, column)) {
            return Some((line, column));
        }
        if column.is_some() {
            return None;
        }
        let mut on_line = file.keys().filter(|(l, _)| *l == line);
        match (on_line.next(), on_line.next()) {
            (Some(key), None) => Some(*key),
            _ => None,
        }
    }

    pub fn get(&self, path: &Path, line: i64, column: Option<i64>) -> Option<&BreakpointSpec> {
        let key = self.resolve(path, line, column)?;
        self.files.get(path)?.get(&key)
    }

    pub fn get_mut(
        &mut self,
        path: &Path,
        line: i64,
        column: Option<i64>,
    ) -> Option<&mut BreakpointSpec> {
        let key = self.resolve(path, line, column)?;
        self.files.get_mut(path)?.get_mut(&key)
    }

    /// Apply `update` to an existing breakpoint and return its new state.
    pub fn update<F>(
        &mut self,
        path: &Path,
        line: i64,
        column: Option<i64>,
        update: F,
    ) -> Result<BreakpointSpec>
    where
        F: FnOnce(&mut BreakpointSpec),
    {
        let spec = self
            .get_mut(path, line, column)
            .ok_or_else(|| DebugError::UnknownBreakpoint {
                path: path.display().to_string(),
                line,
            })?;
        update(spec);
        Ok(spec.clone())
    }

    pub fn remove(
        &mut self,
        path: &Path,
        line: i64,
        column: Option<i64>,
    ) -> Option<BreakpointSpec> {
        let key = self.resolve(path, line, column)?;
        let file = self.files.get_mut(path)?;
        let removed = file.remove(&key);
        if file.is_empty() {
            self.files.remove(path);
        }
        removed
    }

    /// Remove every breakpoint of `path`, or of every file. Returns the files
    /// that lost breakpoints together with the number removed.
    pub fn clear(&mut self, path: Option<&Path>) -> Vec<(PathBuf, usize)> {
        match path {
            Some(path) => self
                .files
                .remove(path)
                .map(|file| vec![(path.to_path_buf(), file.len())])
                .unwrap_or_default(),
            None => std::mem::take(&mut self.files)
                .into_iter()
                .map(|(path, file)| (path, file.len()))
                .collect(),
        }
    }

    pub fn contains_line(&self, path: &Path, line: i64) -> bool {
        self.files
            .get(path)
            .is_some_and(|file| file.keys().any(|(l, _)| *l == line))
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    pub fn list(&self) -> Vec<BreakpointSpec> {
        self.files
            .values()
            .flat_map(|file| file.values().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The complete list transmitted for `path`. Disabled breakpoints are left
    /// out since DAP has no per-breakpoint enabled flag.
    pub fn source_breakpoints(&self, path: &Path) -> Vec<SourceBreakpoint> {
        self.files
            .get(path)
            .map(|file| {
                file.values()
                    .filter(|spec| spec.enabled)
                    .map(BreakpointSpec::to_source_breakpoint)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merge a `setBreakpoints` response. The adapter answers positionally, in
    /// the order produced by [`Self::source_breakpoints`].
    pub fn apply_verification(&mut self, path: &Path, reported: &[Breakpoint]) {
        let Some(file) = self.files.get_mut(path) else {
            return;
        };
        let mut reported = reported.iter();
        for spec in file.values_mut() {
            spec.clear_adapter_state();
            if !spec.enabled {
                continue;
            }
            if let Some(bp) = reported.next() {
                spec.verified = bp.verified;
                spec.adapter_id = bp.id;
                spec.message = bp.message.clone();
                spec.resolved_line = bp.line;
            }
        }
    }

    /// Apply an adapter-initiated `breakpoint` event to the breakpoint carrying `id`.
    pub fn merge_adapter_update(&mut self, id: i64, update: &Breakpoint) -> bool {
        let Some(spec) = self
            .files
            .values_mut()
            .flat_map(BTreeMap::values_mut)
            .find(|spec| spec.adapter_id == Some(id))
        else {
            return false;
        };
        spec.verified = update.verified;
        if update.line.is_some() {
            spec.resolved_line = update.line;
        }
        spec.message = update.message.clone();
        true
    }

    /// Forget adapter state after a session ends.
    pub fn reset_verification(&mut self) {
        for spec in self.files.values_mut().flat_map(BTreeMap::values_mut) {
            spec.clear_adapter_state();
        }
    }

    /// Remove temporary breakpoints hit by a stop.
    ///
    /// Matching uses the adapter ids reported in the stop event. When the
    /// adapter reported none, a temporary breakpoint at the stop location
    /// matches instead, but only for a `breakpoint` stop; stepping onto the
    /// line does not count as a hit. Returns the affected files.
    pub fn take_hit_temporaries(
        &mut self,
        reason: &str,
        hit_ids: &[i64],
        location: Option<(&Path, i64)>,
    ) -> Vec<PathBuf> {
        let location = location.filter(|_| reason == "breakpoint");
        let mut affected = Vec::new();
        for (path, file) in self.files.iter_mut() {
            let before = file.len();
            file.retain(|_, spec| {
                if !spec.temporary || !spec.enabled {
                    return true;
                }
                let hit = if hit_ids.is_empty() {
                    location.is_some_and(|(stop_path, stop_line)| {
                        stop_path == spec.path
                            && (spec.resolved_line == Some(stop_line) || spec.line == stop_line)
                    })
                } else {
                    spec.adapter_id.is_some_and(|id| hit_ids.contains(&id))
                };
                !hit
            });
            if file.len() != before {
                affected.push(path.clone());
            }
        }
        self.files.retain(|_, file| !file.is_empty());
        affected
    }
}

/// Treat `None`, `""` and whitespace-only text as "not set".
pub fn normalize_optional(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Normalize a caller path to the absolute identity used by the registry.
///
/// Existing files are canonicalized. Other paths are resolved lexically against
/// the current directory so breakpoints can be placed before a file exists.
pub fn normalize_path(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DebugError::InvalidArgument(
            "path must not be empty".to_string(),
        ));
    }
    let path = Path::new(raw);
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Ok(canonical);
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|err| DebugError::InvalidArgument(format!("cannot resolve {raw}: {err}")))?
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}
