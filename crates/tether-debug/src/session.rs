use std::sync::{Arc, Weak};

use tether_dap::types::BreakpointEventBody;
use tether_dap::{AdapterEvent, Capabilities, DapClient, StoppedEventBody};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::breakpoints::normalize_path;
use crate::controller::Shared;
use crate::pending::{PendingStop, StopSignal};
use crate::tracker::FrameInfo;

/// One live adapter connection.
pub(crate) struct ActiveSession {
    pub(crate) id: u64,
    pub(crate) client: DapClient,
    pub(crate) capabilities: Capabilities,
    pub(crate) pending: PendingStop,
    exit_code: parking_lot::Mutex<Option<i64>>,
}

impl ActiveSession {
    pub(crate) fn new(id: u64, client: DapClient, capabilities: Capabilities) -> Arc<Self> {
        Arc::new(Self {
            id,
            client,
            capabilities,
            pending: PendingStop::default(),
            exit_code: parking_lot::Mutex::new(None),
        })
    }
}

/// Start the event pump of `session`.
///
/// The pump is the only consumer of adapter events for the session and
/// handles them strictly in arrival order. It holds the controller weakly so
/// dropping the controller stops it.
pub(crate) fn spawn_event_pump(
    shared: Weak<Shared>,
    session: Arc<ActiveSession>,
    mut events: broadcast::Receiver<AdapterEvent>,
) {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "tether.debug", session = session.id, skipped, "event pump fell behind");
                    continue;
                }
                Err(RecvError::Closed) => AdapterEvent::Disconnected,
            };
            let Some(shared) = shared.upgrade() else {
                session.client.shutdown();
                return;
            };

            match event {
                AdapterEvent::Stopped { seq, body } => {
                    handle_stop(&shared, &session, seq, body).await;
                }
                AdapterEvent::Continued { thread_id, .. } => {
                    tracing::debug!(target: "tether.debug", session = session.id, ?thread_id, "debuggee continued");
                }
                AdapterEvent::Exited { exit_code, .. } => {
                    tracing::info!(target: "tether.debug", session = session.id, exit_code, "debuggee exited");
                    *session.exit_code.lock() = Some(exit_code);
                    shared.tracker.write().clear();
                    session.pending.finish(StopSignal::Exited {
                        exit_code: Some(exit_code),
                    });
                }
                AdapterEvent::Terminated { .. } => {
                    let exit_code = *session.exit_code.lock();
                    session.pending.finish(StopSignal::Exited { exit_code });
                    shared.end_session(session.id, "terminated").await;
                    return;
                }
                AdapterEvent::Output { body, .. } => {
                    tracing::info!(
                        target: "tether.debug",
                        category = body.category.as_deref().unwrap_or("console"),
                        output = %body.output.trim_end(),
                        "debuggee output"
                    );
                }
                AdapterEvent::Breakpoint { body, .. } => {
                    handle_breakpoint_event(&shared, body).await;
                }
                AdapterEvent::Initialized { .. } => {
                    tracing::debug!(target: "tether.debug", session = session.id, "late initialized event");
                }
                AdapterEvent::Other { event, .. } => {
                    tracing::trace!(target: "tether.debug", session = session.id, event = %event, "unhandled adapter event");
                }
                AdapterEvent::Disconnected => {
                    shared.end_session(session.id, "adapter disconnected").await;
                    return;
                }
            }
        }
    });
}

async fn handle_stop(shared: &Shared, session: &ActiveSession, seq: i64, body: StoppedEventBody) {
    let thread_id = body.thread_id.or_else(|| shared.tracker.read().thread_id());

    let frames = match thread_id {
        Some(thread_id) => match session.client.stack_trace(thread_id).await {
            Ok(frames) => Some(frames.into_iter().map(FrameInfo::from).collect::<Vec<_>>()),
            Err(err) => {
                tracing::warn!(target: "tether.debug", session = session.id, thread_id, error = %err, "failed to refresh stack trace");
                None
            }
        },
        None => None,
    };

    let location = frames
        .as_ref()
        .and_then(|frames| frames.first())
        .and_then(|top| {
            let path = normalize_path(top.path.as_deref()?).ok()?;
            Some((path, top.line))
        });

    let generation = shared.tracker.write().install_stop(
        thread_id,
        body.reason.clone(),
        body.description.clone(),
        frames,
    );
    tracing::debug!(
        target: "tether.debug",
        session = session.id,
        seq,
        generation,
        reason = %body.reason,
        "debuggee stopped"
    );

    shared
        .remove_hit_temporaries(session, &body.reason, &body.hit_breakpoint_ids, location)
        .await;

    session.pending.offer_stop(seq, &body);
}

async fn handle_breakpoint_event(shared: &Shared, body: BreakpointEventBody) {
    let Some(id) = body.breakpoint.id else {
        return;
    };
    let mut registry = shared.registry.lock().await;
    if registry.merge_adapter_update(id, &body.breakpoint) {
        tracing::debug!(target: "tether.debug", id, reason = %body.reason, "breakpoint updated by adapter");
    }
}
