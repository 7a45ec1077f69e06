use std::{
    collections::HashMap,
    net::SocketAddr,
    process::Stdio,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    process::{Child, Command},
    sync::{broadcast, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;

use crate::codec::{sanitize_json_error_message, DapReader, DapWriter};
use crate::types::{
    AdapterEvent, Breakpoint, Capabilities, DisconnectArguments, EvaluateArguments,
    EvaluateResponseBody, GotoArguments, GotoTarget, GotoTargetsArguments,
    GotoTargetsResponseBody, InitializeArguments, ProtocolMessage, Request, Response, Scope,
    ScopesArguments, ScopesResponseBody, SetBreakpointsArguments, SetBreakpointsResponseBody,
    StackFrame, StackTraceArguments, StackTraceResponseBody, Thread, ThreadArguments,
    ThreadsResponseBody, Variable, VariablesArguments, VariablesResponseBody,
};
use crate::{DapError, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone)]
pub struct DapClientConfig {
    pub request_timeout: Duration,
    pub event_channel_size: usize,
}

impl Default for DapClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            event_channel_size: 256,
        }
    }
}

struct Inner {
    writer: Mutex<DapWriter<BoxedWriter>>,
    pending: Mutex<HashMap<i64, oneshot::Sender<Result<Response>>>>,
    next_seq: AtomicI64,
    events: broadcast::Sender<AdapterEvent>,
    shutdown: CancellationToken,
    config: DapClientConfig,
    child: parking_lot::Mutex<Option<Child>>,
}

/// Handle to one adapter connection. Cheap to clone; all clones share the
/// same transport.
#[derive(Clone)]
pub struct DapClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DapClient")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl DapClient {
    pub fn from_transport<R, W>(reader: R, writer: W, config: DapClientConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (events, _) = broadcast::channel(config.event_channel_size);
        let inner = Arc::new(Inner {
            writer: Mutex::new(DapWriter::new(Box::new(writer) as BoxedWriter)),
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicI64::new(1),
            events,
            shutdown: CancellationToken::new(),
            config,
            child: parking_lot::Mutex::new(None),
        });

        tokio::spawn(read_loop(reader, inner.clone()));

        Self { inner }
    }

    pub async fn connect_tcp(addr: SocketAddr, config: DapClientConfig) -> Result<Self> {
        let stream = tokio::time::timeout(config.request_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DapError::Timeout {
                command: "connect".to_string(),
            })??;
        let _ = stream.set_nodelay(true);
        tracing::debug!(target: "tether.dap", %addr, "connected to adapter");
        let (reader, writer) = stream.into_split();
        Ok(Self::from_transport(reader, writer, config))
    }

    /// Spawn an adapter process and speak DAP over its stdio.
    pub async fn spawn_command(
        program: &str,
        args: &[String],
        config: DapClientConfig,
    ) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DapError::Protocol("adapter stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DapError::Protocol("adapter stdout is not piped".to_string()))?;
        tracing::debug!(target: "tether.dap", program, pid = ?child.id(), "spawned adapter");

        let client = Self::from_transport(stdout, stdin, config);
        *client.inner.child.lock() = Some(child);
        Ok(client)
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(child) = self.inner.child.lock().as_mut() {
            let _ = child.start_kill();
        }
    }

    /// Cancelled when the client is shut down, either explicitly or because the
    /// transport closed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.inner.events.subscribe()
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.config.request_timeout
    }

    pub async fn send_request(&self, command: &str, arguments: Value) -> Result<Response> {
        self.send_request_with_timeout(command, arguments, self.inner.config.request_timeout)
            .await
    }

    pub async fn send_request_with_timeout(
        &self,
        command: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Response> {
        if self.inner.shutdown.is_cancelled() {
            return Err(DapError::ConnectionClosed);
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(seq, tx);
        }

        let message = ProtocolMessage::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });
        tracing::trace!(target: "tether.dap", seq, command, "sending request");
        let written = {
            let mut writer = self.inner.writer.lock().await;
            writer.write_message(&message).await
        };
        if let Err(err) = written {
            self.remove_pending(seq).await;
            return Err(err);
        }

        let response = tokio::select! {
            _ = self.inner.shutdown.cancelled() => {
                self.remove_pending(seq).await;
                return Err(DapError::ConnectionClosed);
            }
            res = tokio::time::timeout(timeout, rx) => {
                match res {
                    Ok(Ok(response)) => response,
                    Ok(Err(_closed)) => return Err(DapError::ConnectionClosed),
                    Err(_elapsed) => {
                        self.remove_pending(seq).await;
                        return Err(DapError::Timeout {
                            command: command.to_string(),
                        });
                    }
                }
            }
        }?;

        if !response.success {
            let message = response
                .message
                .clone()
                .or_else(|| {
                    response
                        .body
                        .as_ref()
                        .and_then(|body| body.pointer("/error/format"))
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                })
                .unwrap_or_else(|| "request failed".to_string());
            return Err(DapError::Rejected {
                command: command.to_string(),
                message,
            });
        }

        Ok(response)
    }

    async fn remove_pending(&self, seq: i64) {
        let mut pending = self.inner.pending.lock().await;
        pending.remove(&seq);
    }

    pub async fn request<A, B>(&self, command: &str, arguments: &A) -> Result<B>
    where
        A: Serialize,
        B: DeserializeOwned,
    {
        let arguments = serde_json::to_value(arguments)
            .map_err(|err| DapError::Protocol(sanitize_json_error_message(&err.to_string())))?;
        let response = self.send_request(command, arguments).await?;
        decode_body(&response)
    }

    pub async fn initialize(&self, arguments: &InitializeArguments) -> Result<Capabilities> {
        self.request("initialize", arguments).await
    }

    /// Send `launch` and wait for its response. Some adapters only answer
    /// after `configurationDone`, so callers usually drive this concurrently
    /// with the configuration phase.
    pub async fn launch(&self, arguments: Value, timeout: Duration) -> Result<Response> {
        self.send_request_with_timeout("launch", arguments, timeout)
            .await
    }

    pub async fn configuration_done(&self) -> Result<()> {
        self.send_request("configurationDone", Value::Null).await?;
        Ok(())
    }

    pub async fn set_breakpoints(
        &self,
        arguments: &SetBreakpointsArguments,
    ) -> Result<Vec<Breakpoint>> {
        let body: SetBreakpointsResponseBody = self.request("setBreakpoints", arguments).await?;
        Ok(body.breakpoints)
    }

    pub async fn threads(&self) -> Result<Vec<Thread>> {
        let response = self.send_request("threads", Value::Null).await?;
        let body: ThreadsResponseBody = decode_body(&response)?;
        Ok(body.threads)
    }

    pub async fn stack_trace(&self, thread_id: i64) -> Result<Vec<StackFrame>> {
        let body: StackTraceResponseBody = self
            .request(
                "stackTrace",
                &StackTraceArguments {
                    thread_id,
                    start_frame: None,
                    levels: None,
                },
            )
            .await?;
        Ok(body.stack_frames)
    }

    pub async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        let body: ScopesResponseBody = self.request("scopes", &ScopesArguments { frame_id }).await?;
        Ok(body.scopes)
    }

    pub async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        let body: VariablesResponseBody = self
            .request(
                "variables",
                &VariablesArguments {
                    variables_reference,
                },
            )
            .await?;
        Ok(body.variables)
    }

    pub async fn evaluate(&self, arguments: &EvaluateArguments) -> Result<EvaluateResponseBody> {
        self.request("evaluate", arguments).await
    }

    pub async fn goto_targets(&self, arguments: &GotoTargetsArguments) -> Result<Vec<GotoTarget>> {
        let body: GotoTargetsResponseBody = self.request("gotoTargets", arguments).await?;
        Ok(body.targets)
    }

    /// Issue an execution-control request (`continue`, `next`, `stepIn`,
    /// `stepOut`, `pause`) and return the raw response so callers can order
    /// subsequent events against its `seq`.
    pub async fn control(&self, command: &str, thread_id: i64) -> Result<Response> {
        let arguments = serde_json::to_value(ThreadArguments { thread_id })
            .map_err(|err| DapError::Protocol(err.to_string()))?;
        self.send_request(command, arguments).await
    }

    pub async fn goto(&self, thread_id: i64, target_id: i64) -> Result<Response> {
        let arguments = serde_json::to_value(GotoArguments {
            thread_id,
            target_id,
        })
        .map_err(|err| DapError::Protocol(err.to_string()))?;
        self.send_request("goto", arguments).await
    }

    pub async fn disconnect(
        &self,
        arguments: DisconnectArguments,
        timeout: Duration,
    ) -> Result<()> {
        let arguments = serde_json::to_value(arguments)
            .map_err(|err| DapError::Protocol(err.to_string()))?;
        self.send_request_with_timeout("disconnect", arguments, timeout)
            .await?;
        Ok(())
    }
}

fn decode_body<B: DeserializeOwned>(response: &Response) -> Result<B> {
    let body = response.body.clone().unwrap_or_else(|| json!({}));
    serde_json::from_value(body).map_err(|err| {
        DapError::Protocol(format!(
            "invalid {} response body: {}",
            response.command,
            sanitize_json_error_message(&err.to_string())
        ))
    })
}

async fn read_loop<R: AsyncRead + Unpin>(reader: R, inner: Arc<Inner>) {
    let mut reader = DapReader::new(reader);

    loop {
        let message = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read_message() => res,
        };

        match message {
            Ok(Some(ProtocolMessage::Response(response))) => {
                let tx = {
                    let mut pending = inner.pending.lock().await;
                    pending.remove(&response.request_seq)
                };
                match tx {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    None => tracing::debug!(
                        target: "tether.dap",
                        request_seq = response.request_seq,
                        command = %response.command,
                        "dropping response with no pending request"
                    ),
                }
            }
            Ok(Some(ProtocolMessage::Event(event))) => {
                tracing::trace!(target: "tether.dap", seq = event.seq, event = %event.event, "event");
                let _ = inner.events.send(AdapterEvent::from_wire(event));
            }
            Ok(Some(ProtocolMessage::Request(request))) => {
                // Reverse requests (`runInTerminal`, `startDebugging`) need a host we don't have.
                tracing::debug!(
                    target: "tether.dap",
                    command = %request.command,
                    "rejecting reverse request"
                );
                let inner = inner.clone();
                tokio::spawn(async move {
                    let seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
                    let reply = ProtocolMessage::Response(Response {
                        seq,
                        request_seq: request.seq,
                        success: false,
                        command: request.command,
                        message: Some("reverse requests are not supported".to_string()),
                        body: None,
                    });
                    let mut writer = inner.writer.lock().await;
                    let _ = writer.write_message(&reply).await;
                });
            }
            Ok(None) => {
                tracing::debug!(target: "tether.dap", "adapter closed the connection");
                break;
            }
            Err(err) => {
                tracing::warn!(target: "tether.dap", error = %err, "failed to read adapter message");
                break;
            }
        }
    }

    inner.shutdown.cancel();

    let pending = {
        let mut pending = inner.pending.lock().await;
        std::mem::take(&mut *pending)
    };
    for (_seq, tx) in pending {
        let _ = tx.send(Err(DapError::ConnectionClosed));
    }

    let _ = inner.events.send(AdapterEvent::Disconnected);
}
