//! Newline-delimited JSON tool server.
//!
//! Each input line is one [`ToolCall`]; each output line is one
//! [`ToolResponse`]. Calls run concurrently, so responses can arrive out of
//! order and carry the caller's `id` for matching.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::controller::{ControllerConfig, DebugController};
use crate::error::DebugError;
use crate::host::SharedActiveFile;
use crate::tools::{dispatch, ToolCall, ToolResponse};

/// Serve tool calls on stdin/stdout until stdin closes.
pub async fn run_stdio(config: ControllerConfig) -> std::io::Result<()> {
    run(config, tokio::io::stdin(), tokio::io::stdout()).await
}

pub async fn run<R, W>(config: ControllerConfig, reader: R, writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let active_file = SharedActiveFile::new();
    let controller = DebugController::new(config, Arc::new(active_file.clone()));
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ToolResponse>();

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(response) = out_rx.recv().await {
            let mut line = match serde_json::to_vec(&response) {
                Ok(line) => line,
                Err(err) => {
                    tracing::error!(target: "tether.server", error = %err, "failed to encode response");
                    continue;
                }
            };
            line.push(b'\n');
            if writer.write_all(&line).await.is_err() || writer.flush().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let call = match serde_json::from_str::<ToolCall>(line) {
            Ok(call) => call,
            Err(err) => {
                let id = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|value| value.get("id").cloned());
                let err = DebugError::InvalidArgument(format!("malformed tool call: {err}"));
                let _ = out_tx.send(ToolResponse::failure(id, &err));
                continue;
            }
        };

        if call.name == "set_active_file" {
            let _ = out_tx.send(set_active_file(&active_file, call));
            continue;
        }

        let controller = controller.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let response = dispatch(&controller, call).await;
            let _ = out_tx.send(response);
        });
    }

    tracing::info!(target: "tether.server", "input closed; shutting down");
    if controller.has_session() {
        if let Err(err) = controller.quit().await {
            tracing::debug!(target: "tether.server", error = %err, "quit on shutdown failed");
        }
    }
    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}

/// The host reports which file the user is looking at. Handled here rather
/// than in [`dispatch`] because the controller only reads it.
fn set_active_file(active_file: &SharedActiveFile, call: ToolCall) -> ToolResponse {
    let path = call
        .arguments
        .get("path")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);
    tracing::debug!(target: "tether.server", path = ?path, "active file changed");
    active_file.set(path.clone());
    ToolResponse::success(call.id, json!({ "path": path }))
}
