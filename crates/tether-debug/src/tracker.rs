use std::fmt::Write as _;

use serde::Serialize;
use tether_dap::StackFrame;

use crate::error::{DebugError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameInfo {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub line: i64,
    pub column: i64,
}

impl From<StackFrame> for FrameInfo {
    fn from(frame: StackFrame) -> Self {
        let path = frame
            .source
            .and_then(|source| source.path.or(source.name));
        Self {
            id: frame.id,
            name: frame.name,
            path,
            line: frame.line,
            column: frame.column,
        }
    }
}

/// Live execution state of the debuggee as observed through stop events.
///
/// The frame list and cursor are only ever replaced together, and only once a
/// complete stack trace is available.
#[derive(Debug, Default)]
pub struct SessionTracker {
    frames: Vec<FrameInfo>,
    cursor: usize,
    thread_id: Option<i64>,
    stop_reason: Option<String>,
    stop_description: Option<String>,
    stopped: bool,
    generation: u64,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stop. `frames` is `None` when the stack trace could not be
    /// fetched; the trace is then empty so no earlier frame id resolves.
    pub fn install_stop(
        &mut self,
        thread_id: Option<i64>,
        reason: String,
        description: Option<String>,
        frames: Option<Vec<FrameInfo>>,
    ) -> u64 {
        self.frames = frames.unwrap_or_default();
        self.cursor = 0;
        if thread_id.is_some() {
            self.thread_id = thread_id;
        }
        self.stop_reason = Some(reason);
        self.stop_description = description;
        self.stopped = true;
        self.generation += 1;
        self.generation
    }

    /// Drop the trace after the debuggee resumed, unless a newer stop has
    /// already been installed since `generation` was read.
    pub fn mark_running_if(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.frames.clear();
        self.cursor = 0;
        self.stopped = false;
        self.stop_reason = None;
        self.stop_description = None;
        true
    }

    /// Forget everything about the session. The generation keeps counting so
    /// stale readers never match a later stop.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.cursor = 0;
        self.thread_id = None;
        self.stop_reason = None;
        self.stop_description = None;
        self.stopped = false;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn thread_id(&self) -> Option<i64> {
        self.thread_id
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn stop_description(&self) -> Option<&str> {
        self.stop_description.as_deref()
    }

    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_top_frame_id(&self) -> Option<i64> {
        self.frames.first().map(|frame| frame.id)
    }

    pub fn frame_at(&self, index: usize) -> Option<&FrameInfo> {
        self.frames.get(index)
    }

    pub fn selected_frame(&self) -> Option<&FrameInfo> {
        self.frame_at(self.cursor)
    }

    pub fn frame_by_id(&self, id: i64) -> Option<&FrameInfo> {
        self.frames.iter().find(|frame| frame.id == id)
    }

    /// Move the cursor by `delta` (positive is outward, toward callers).
    /// Leaves the cursor untouched when the move would leave the stack.
    pub fn move_cursor(&mut self, delta: isize) -> Result<&FrameInfo> {
        if self.frames.is_empty() {
            return Err(DebugError::FrameUnavailable(
                "no stack trace recorded; the program is not stopped".to_string(),
            ));
        }
        let target = self.cursor as isize + delta;
        if target < 0 {
            return Err(DebugError::FrameUnavailable(
                "already at the innermost frame".to_string(),
            ));
        }
        if target as usize >= self.frames.len() {
            return Err(DebugError::FrameUnavailable(
                "already at the outermost frame".to_string(),
            ));
        }
        self.cursor = target as usize;
        Ok(&self.frames[self.cursor])
    }

    /// Explicit id, then the cursor-selected frame, then the top frame.
    pub fn resolve_frame(&self, explicit: Option<i64>) -> Result<&FrameInfo> {
        if let Some(id) = explicit {
            return self.frame_by_id(id).ok_or_else(|| {
                DebugError::FrameUnavailable(format!(
                    "frame {id} is not part of the current stack trace"
                ))
            });
        }
        self.selected_frame()
            .or_else(|| self.frames.first())
            .ok_or_else(|| {
                DebugError::FrameUnavailable(
                    "no frame given and no stop has been recorded".to_string(),
                )
            })
    }

    /// One line per frame, the selected frame marked with `->`.
    pub fn format_stack(&self) -> String {
        let mut out = String::new();
        for (index, frame) in self.frames.iter().enumerate() {
            let marker = if index == self.cursor { "->" } else { "  " };
            let location = frame.path.as_deref().unwrap_or("<unknown>");
            let _ = writeln!(
                out,
                "{marker} #{index} {} at {location}:{} (frame id {})",
                frame.name, frame.line, frame.id
            );
        }
        out
    }
}
