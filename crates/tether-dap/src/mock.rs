use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use serde_json::{json, Value};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpListener, TcpStream,
};
use tokio_util::sync::CancellationToken;

use crate::codec::{DapReader, DapWriter};
use crate::types::{
    EvaluateArguments, Event, GotoArguments, GotoTargetsArguments, ProtocolMessage, Request,
    Response, ScopesArguments, SetBreakpointsArguments, VariablesArguments,
};

/// A scriptable debug adapter used for unit and integration testing.
///
/// It models a single-threaded program of `program_lines` lines in one source
/// file. Breakpoints, stepping, goto and evaluation follow just enough DAP
/// semantics to exercise the client and controller without a real debugger.
pub struct MockAdapter {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContinueBehavior {
    /// Run to the next breakpoint below the current line, or exit.
    RunToBreakpoint,
    /// Acknowledge the request and never stop.
    Hang,
    /// Acknowledge the request and drop the connection.
    Disconnect,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockVariable {
    pub name: String,
    pub type_: String,
    pub value: String,
}

impl MockVariable {
    pub fn new(name: &str, type_: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            type_: type_.to_string(),
            value: value.to_string(),
        }
    }
}

/// `count` integer locals named `v000`, `v001`, ...
pub fn numbered_locals(count: usize) -> Vec<MockVariable> {
    (0..count)
        .map(|i| MockVariable::new(&format!("v{i:03}"), "int", &i.to_string()))
        .collect()
}

#[derive(Clone, Debug)]
pub struct MockAdapterConfig {
    pub source_path: String,
    pub program_lines: i64,
    pub frames_per_stop: usize,
    pub stop_on_entry: bool,
    pub exit_code: i64,
    pub verify_breakpoints: bool,
    pub reject_set_breakpoints: bool,
    pub supports_goto: bool,
    /// Lines for which `gotoTargets` returns no targets.
    pub goto_rejects_lines: Vec<i64>,
    pub continue_behavior: ContinueBehavior,
    /// Emit an extra `stopped` event ahead of the `continue` response.
    pub stale_stop_before_response: bool,
    /// Delay between a control response and the resulting `stopped` event.
    pub stop_delay: Option<Duration>,
    pub locals: Vec<MockVariable>,
    /// Canned `evaluate` results keyed by expression. A value starting with
    /// `!` is returned as a failed response carrying the rest as message.
    pub evaluate_results: HashMap<String, String>,
}

impl Default for MockAdapterConfig {
    fn default() -> Self {
        Self {
            source_path: "/work/a.py".to_string(),
            program_lines: 20,
            frames_per_stop: 3,
            stop_on_entry: false,
            exit_code: 0,
            verify_breakpoints: true,
            reject_set_breakpoints: false,
            supports_goto: true,
            goto_rejects_lines: Vec::new(),
            continue_behavior: ContinueBehavior::RunToBreakpoint,
            stale_stop_before_response: false,
            stop_delay: None,
            locals: vec![
                MockVariable::new("x", "int", "7"),
                MockVariable::new("name", "str", "'tether'"),
            ],
            evaluate_results: HashMap::new(),
        }
    }
}

const GOTO_TARGET_BASE: i64 = 1000;

impl MockAdapter {
    pub async fn spawn() -> std::io::Result<Self> {
        Self::spawn_with_config(Default::default()).await
    }

    pub async fn spawn_with_config(config: MockAdapterConfig) -> std::io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let state = Arc::new(State {
            config,
            requests: parking_lot::Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        });
        let task_shutdown = shutdown.clone();
        let task_state = state.clone();

        tokio::spawn(async move {
            let _ = run(listener, task_state, task_shutdown).await;
        });

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn source_path(&self) -> &str {
        &self.state.config.source_path
    }

    /// Every request received so far, across connections, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.state.requests.lock().clone()
    }

    pub fn requests_for(&self, command: &str) -> Vec<Request> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|request| request.command == command)
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.requests.lock().clear();
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::Relaxed)
    }
}

impl Drop for MockAdapter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct State {
    config: MockAdapterConfig,
    requests: parking_lot::Mutex<Vec<Request>>,
    connections: AtomicUsize,
}

async fn run(
    listener: TcpListener,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accept = listener.accept() => {
                let (socket, _) = accept?;
                state.connections.fetch_add(1, Ordering::Relaxed);
                let state = state.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, state, shutdown).await;
                });
            }
        }
    }
}

enum Flow {
    Continue,
    Close,
}

/// Per-connection debuggee.
struct Connection {
    state: Arc<State>,
    writer: DapWriter<OwnedWriteHalf>,
    seq: i64,
    line: i64,
    generation: i64,
    exited: bool,
    stop_on_entry: bool,
    next_breakpoint_id: i64,
    /// path -> (line -> adapter id)
    breakpoints: HashMap<String, BTreeMap<i64, i64>>,
}

async fn serve(
    socket: TcpStream,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let _ = socket.set_nodelay(true);
    let (reader, writer) = socket.into_split();
    let mut reader: DapReader<OwnedReadHalf> = DapReader::new(reader);
    let mut conn = Connection {
        state,
        writer: DapWriter::new(writer),
        seq: 0,
        line: 1,
        generation: 0,
        exited: false,
        stop_on_entry: false,
        next_breakpoint_id: 1,
        breakpoints: HashMap::new(),
    };

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            res = reader.read_message() => res?,
        };
        let Some(message) = message else {
            return Ok(());
        };
        let ProtocolMessage::Request(request) = message else {
            continue;
        };
        conn.state.requests.lock().push(request.clone());
        if let Flow::Close = conn.handle(request).await? {
            let _ = conn.writer.shutdown().await;
            return Ok(());
        }
    }
}

impl Connection {
    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    async fn respond(&mut self, request: &Request, body: Value) -> crate::Result<()> {
        let seq = self.next_seq();
        let response = ProtocolMessage::Response(Response {
            seq,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body: Some(body),
        });
        self.writer.write_message(&response).await
    }

    async fn fail(&mut self, request: &Request, message: &str) -> crate::Result<()> {
        let seq = self.next_seq();
        let response = ProtocolMessage::Response(Response {
            seq,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message.to_string()),
            body: None,
        });
        self.writer.write_message(&response).await
    }

    async fn event(&mut self, event: &str, body: Option<Value>) -> crate::Result<()> {
        let seq = self.next_seq();
        self.writer
            .write_message(&ProtocolMessage::Event(Event {
                seq,
                event: event.to_string(),
                body,
            }))
            .await
    }

    async fn stopped(&mut self, reason: &str, hit_breakpoint_ids: Vec<i64>) -> crate::Result<()> {
        if let Some(delay) = self.state.config.stop_delay {
            tokio::time::sleep(delay).await;
        }
        self.generation += 1;
        let mut body = json!({
            "reason": reason,
            "threadId": 1,
            "allThreadsStopped": true,
        });
        if !hit_breakpoint_ids.is_empty() {
            body["hitBreakpointIds"] = json!(hit_breakpoint_ids);
        }
        self.event("stopped", Some(body)).await
    }

    async fn exit(&mut self) -> crate::Result<()> {
        self.exited = true;
        let exit_code = self.state.config.exit_code;
        self.event("exited", Some(json!({ "exitCode": exit_code })))
            .await?;
        self.event("terminated", None).await
    }

    /// Move to `line`, stopping there or exiting past the end of the program.
    async fn advance_to(&mut self, line: i64, reason: &str) -> crate::Result<()> {
        if line > self.state.config.program_lines {
            return self.exit().await;
        }
        self.line = line;
        self.stopped(reason, Vec::new()).await
    }

    async fn run_to_breakpoint(&mut self) -> crate::Result<()> {
        let next = self
            .breakpoints
            .get(&self.state.config.source_path)
            .and_then(|lines| lines.range(self.line + 1..).next())
            .map(|(line, id)| (*line, *id));
        match next {
            Some((line, id)) => {
                self.line = line;
                self.stopped("breakpoint", vec![id]).await
            }
            None => self.exit().await,
        }
    }

    fn frame_is_current(&self, frame_id: i64) -> bool {
        frame_id / 100 == self.generation && (frame_id % 100) < self.frames() as i64
    }

    fn frames(&self) -> usize {
        self.state.config.frames_per_stop
    }

    async fn handle(&mut self, request: Request) -> crate::Result<Flow> {
        let config = self.state.config.clone();
        match request.command.as_str() {
            "initialize" => {
                self.respond(
                    &request,
                    json!({
                        "supportsConfigurationDoneRequest": true,
                        "supportsConditionalBreakpoints": true,
                        "supportsHitConditionalBreakpoints": true,
                        "supportsLogPoints": true,
                        "supportsGotoTargetsRequest": config.supports_goto,
                        "supportsTerminateRequest": false,
                    }),
                )
                .await?;
            }
            "launch" | "attach" => {
                self.stop_on_entry = config.stop_on_entry
                    || request
                        .arguments
                        .get("stopOnEntry")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                self.respond(&request, json!({})).await?;
                self.event("initialized", None).await?;
            }
            "setBreakpoints" => {
                if config.reject_set_breakpoints {
                    self.fail(&request, "breakpoints are not supported here")
                        .await?;
                    return Ok(Flow::Continue);
                }
                let Ok(args) = serde_json::from_value::<SetBreakpointsArguments>(
                    request.arguments.clone(),
                ) else {
                    self.fail(&request, "invalid arguments").await?;
                    return Ok(Flow::Continue);
                };
                let path = args.source.path.clone().unwrap_or_default();
                let mut lines = BTreeMap::new();
                let mut reported = Vec::new();
                for bp in &args.breakpoints {
                    let id = self.next_breakpoint_id;
                    self.next_breakpoint_id += 1;
                    if config.verify_breakpoints {
                        lines.insert(bp.line, id);
                    }
                    reported.push(json!({
                        "id": id,
                        "verified": config.verify_breakpoints,
                        "line": bp.line,
                        "source": { "path": path },
                    }));
                }
                self.breakpoints.insert(path, lines);
                self.respond(&request, json!({ "breakpoints": reported }))
                    .await?;
            }
            "configurationDone" => {
                self.respond(&request, json!({})).await?;
                if self.stop_on_entry {
                    self.stopped("entry", Vec::new()).await?;
                } else {
                    match config.continue_behavior {
                        ContinueBehavior::RunToBreakpoint => self.run_to_breakpoint().await?,
                        ContinueBehavior::Hang => {}
                        ContinueBehavior::Disconnect => return Ok(Flow::Close),
                    }
                }
            }
            "threads" => {
                self.respond(
                    &request,
                    json!({ "threads": [{ "id": 1, "name": "MainThread" }] }),
                )
                .await?;
            }
            "stackTrace" => {
                let frames: Vec<Value> = (0..self.frames())
                    .map(|i| {
                        let line = if i == 0 { self.line } else { i as i64 };
                        json!({
                            "id": self.generation * 100 + i as i64,
                            "name": if i == 0 { "inner".to_string() } else { format!("caller_{i}") },
                            "source": { "name": "a.py", "path": config.source_path },
                            "line": line,
                            "column": 1,
                        })
                    })
                    .collect();
                let total = frames.len();
                self.respond(
                    &request,
                    json!({ "stackFrames": frames, "totalFrames": total }),
                )
                .await?;
            }
            "scopes" => {
                let frame_id = serde_json::from_value::<ScopesArguments>(request.arguments.clone())
                    .map(|args| args.frame_id)
                    .unwrap_or(-1);
                if !self.frame_is_current(frame_id) {
                    self.fail(&request, "invalid frameId").await?;
                    return Ok(Flow::Continue);
                }
                self.respond(
                    &request,
                    json!({ "scopes": [
                        { "name": "Locals", "variablesReference": frame_id * 10 + 1, "expensive": false },
                        { "name": "Globals", "variablesReference": frame_id * 10 + 2, "expensive": false },
                    ]}),
                )
                .await?;
            }
            "variables" => {
                let reference =
                    serde_json::from_value::<VariablesArguments>(request.arguments.clone())
                        .map(|args| args.variables_reference)
                        .unwrap_or(0);
                let variables: Vec<Value> = match reference % 10 {
                    1 if self.frame_is_current(reference / 10) => config
                        .locals
                        .iter()
                        .map(|var| {
                            json!({
                                "name": var.name,
                                "type": var.type_,
                                "value": var.value,
                                "variablesReference": 0,
                                "evaluateName": var.name,
                            })
                        })
                        .collect(),
                    2 if self.frame_is_current(reference / 10) => vec![json!({
                        "name": "__name__",
                        "type": "str",
                        "value": "'__main__'",
                        "variablesReference": 0,
                    })],
                    _ => Vec::new(),
                };
                self.respond(&request, json!({ "variables": variables }))
                    .await?;
            }
            "evaluate" => {
                let Ok(args) =
                    serde_json::from_value::<EvaluateArguments>(request.arguments.clone())
                else {
                    self.fail(&request, "invalid arguments").await?;
                    return Ok(Flow::Continue);
                };
                if let Some(frame_id) = args.frame_id {
                    if !self.frame_is_current(frame_id) {
                        self.fail(&request, "invalid frameId").await?;
                        return Ok(Flow::Continue);
                    }
                }
                if let Some(result) = config.evaluate_results.get(&args.expression) {
                    if let Some(message) = result.strip_prefix('!') {
                        self.fail(&request, message).await?;
                    } else {
                        self.respond(
                            &request,
                            json!({ "result": result, "variablesReference": 0 }),
                        )
                        .await?;
                    }
                } else if let Some(var) = config
                    .locals
                    .iter()
                    .find(|var| var.name == args.expression)
                {
                    self.respond(
                        &request,
                        json!({ "result": var.value, "type": var.type_, "variablesReference": 0 }),
                    )
                    .await?;
                } else if args.context.as_deref() == Some("repl")
                    && args.expression.contains('=')
                    && !args.expression.contains("==")
                {
                    self.respond(&request, json!({ "result": "", "variablesReference": 0 }))
                        .await?;
                } else {
                    let message = format!("NameError: name '{}' is not defined", args.expression);
                    self.fail(&request, &message).await?;
                }
            }
            "next" | "stepIn" | "stepOut" => {
                if self.exited {
                    self.fail(&request, "program is not running").await?;
                    return Ok(Flow::Continue);
                }
                self.respond(&request, json!({})).await?;
                let line = self.line + 1;
                self.advance_to(line, "step").await?;
            }
            "continue" => {
                if self.exited {
                    self.fail(&request, "program is not running").await?;
                    return Ok(Flow::Continue);
                }
                if config.stale_stop_before_response {
                    self.stopped("step", Vec::new()).await?;
                }
                self.respond(&request, json!({ "allThreadsContinued": true }))
                    .await?;
                match config.continue_behavior {
                    ContinueBehavior::RunToBreakpoint => self.run_to_breakpoint().await?,
                    ContinueBehavior::Hang => {}
                    ContinueBehavior::Disconnect => return Ok(Flow::Close),
                }
            }
            "pause" => {
                self.respond(&request, json!({})).await?;
                self.stopped("pause", Vec::new()).await?;
            }
            "gotoTargets" => {
                if !config.supports_goto {
                    self.fail(&request, "gotoTargets is not supported").await?;
                    return Ok(Flow::Continue);
                }
                let line =
                    serde_json::from_value::<GotoTargetsArguments>(request.arguments.clone())
                        .map(|args| args.line)
                        .unwrap_or(0);
                let targets = if config.goto_rejects_lines.contains(&line)
                    || line < 1
                    || line > config.program_lines
                {
                    Vec::new()
                } else {
                    vec![json!({
                        "id": GOTO_TARGET_BASE + line,
                        "label": format!("line {line}"),
                        "line": line,
                    })]
                };
                self.respond(&request, json!({ "targets": targets }))
                    .await?;
            }
            "goto" => {
                let Ok(args) = serde_json::from_value::<GotoArguments>(request.arguments.clone())
                else {
                    self.fail(&request, "invalid arguments").await?;
                    return Ok(Flow::Continue);
                };
                self.respond(&request, json!({})).await?;
                self.line = args.target_id - GOTO_TARGET_BASE;
                self.stopped("goto", Vec::new()).await?;
            }
            "disconnect" | "terminate" => {
                self.respond(&request, json!({})).await?;
                self.event("terminated", None).await?;
                return Ok(Flow::Close);
            }
            other => {
                let message = format!("unsupported request {other}");
                self.fail(&request, &message).await?;
            }
        }
        Ok(Flow::Continue)
    }
}
