//! Named-tool dispatch for automation callers.
//!
//! A [`ToolCall`] names one controller operation and carries its arguments as
//! JSON. Every call produces a [`ToolResponse`]; failures are reported in-band
//! with their [`ErrorKind`] and never abort the dispatcher.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::breakpoints::BreakpointAttributes;
use crate::controller::{DebugController, Location};
use crate::error::{DebugError, ErrorKind, Result};
use crate::supervisor::LaunchConfig;

/// Every tool name [`dispatch`] understands.
pub const TOOL_NAMES: &[&str] = &[
    "set_breakpoint",
    "set_temporary_breakpoint",
    "remove_breakpoint",
    "enable_breakpoint",
    "disable_breakpoint",
    "set_condition",
    "set_hit_condition",
    "set_ignore_count",
    "set_log_message",
    "clear_breakpoints",
    "list_breakpoints",
    "continue",
    "next",
    "step_in",
    "step_out",
    "pause",
    "run_until",
    "jump",
    "up",
    "down",
    "stack_trace",
    "evaluate",
    "execute_statement",
    "pretty_print",
    "whatis",
    "get_variables",
    "get_source",
    "launch",
    "restart",
    "quit",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    /// Echoed back so callers can match concurrent responses.
    #[serde(default)]
    pub id: Option<Value>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResponse {
    pub(crate) fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, err: &DebugError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ToolError {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BreakpointArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    line: Option<i64>,
    #[serde(default)]
    column: Option<i64>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    hit_condition: Option<String>,
    #[serde(default)]
    ignore_count: Option<u32>,
    #[serde(default)]
    log_message: Option<String>,
}

impl BreakpointArgs {
    fn location(&self) -> Location {
        Location {
            path: self.path.clone(),
            line: self.line,
            column: self.column,
        }
    }

    fn attributes(self, temporary: bool) -> BreakpointAttributes {
        BreakpointAttributes {
            condition: self.condition,
            hit_condition: self.hit_condition,
            ignore_count: self.ignore_count,
            log_message: self.log_message,
            temporary,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocationArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    line: Option<i64>,
    #[serde(default)]
    column: Option<i64>,
}

impl LocationArgs {
    fn location(&self) -> Location {
        Location {
            path: self.path.clone(),
            line: self.line,
            column: self.column,
        }
    }
}

/// Location plus one optional attribute, e.g. `condition`. `null`, `""` and
/// omission all clear the attribute.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AttributeArgs<T> {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    line: Option<i64>,
    #[serde(default)]
    column: Option<i64>,
    #[serde(default)]
    value: Option<T>,
}

impl<T> AttributeArgs<T> {
    fn location(&self) -> Location {
        Location {
            path: self.path.clone(),
            line: self.line,
            column: self.column,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClearArgs {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LineArgs {
    line: i64,
    #[serde(default)]
    frame_id: Option<i64>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EvaluateArgs {
    expression: String,
    #[serde(default)]
    frame_id: Option<i64>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatementArgs {
    statement: String,
    #[serde(default)]
    frame_id: Option<i64>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct VariablesArgs {
    #[serde(default)]
    frame_id: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControlArgs {
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

/// The controller itself, or a handle bounded by the caller's `timeout_ms`.
fn within(controller: &DebugController, timeout_ms: Option<u64>) -> Result<DebugController> {
    match timeout_ms {
        None => Ok(controller.clone()),
        Some(0) => Err(DebugError::InvalidArgument(
            "timeout_ms must be greater than zero".to_string(),
        )),
        Some(ms) => Ok(controller.with_timeout(Duration::from_millis(ms))),
    }
}

fn parse<T: DeserializeOwned + Default>(tool: &str, arguments: Value) -> Result<T> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    parse_required(tool, arguments)
}

fn parse_required<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|err| DebugError::InvalidArgument(format!("{tool}: {err}")))
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| DebugError::Transport(err.to_string()))
}

/// Run one tool call against `controller`.
pub async fn dispatch(controller: &DebugController, call: ToolCall) -> ToolResponse {
    let ToolCall {
        id,
        name,
        arguments,
    } = call;
    tracing::debug!(target: "tether.debug", tool = %name, "tool call");
    match run(controller, &name, arguments).await {
        Ok(result) => ToolResponse::success(id, result),
        Err(err) => {
            tracing::debug!(target: "tether.debug", tool = %name, kind = ?err.kind(), error = %err, "tool call failed");
            ToolResponse::failure(id, &err)
        }
    }
}

async fn run(controller: &DebugController, name: &str, arguments: Value) -> Result<Value> {
    match name {
        "set_breakpoint" | "set_temporary_breakpoint" => {
            let args: BreakpointArgs = parse(name, arguments)?;
            let location = args.location();
            let report = controller
                .set_breakpoint(&location, args.attributes(name == "set_temporary_breakpoint"))
                .await?;
            to_value(report)
        }
        "remove_breakpoint" => {
            let args: LocationArgs = parse(name, arguments)?;
            to_value(controller.remove_breakpoint(&args.location()).await?)
        }
        "enable_breakpoint" => {
            let args: LocationArgs = parse(name, arguments)?;
            to_value(controller.enable_breakpoint(&args.location()).await?)
        }
        "disable_breakpoint" => {
            let args: LocationArgs = parse(name, arguments)?;
            to_value(controller.disable_breakpoint(&args.location()).await?)
        }
        "set_condition" => {
            let args: AttributeArgs<String> = parse(name, rename_value(arguments, "condition"))?;
            to_value(
                controller
                    .set_condition(&args.location(), args.value)
                    .await?,
            )
        }
        "set_hit_condition" => {
            let args: AttributeArgs<String> =
                parse(name, rename_value(arguments, "hit_condition"))?;
            to_value(
                controller
                    .set_hit_condition(&args.location(), args.value)
                    .await?,
            )
        }
        "set_ignore_count" => {
            let args: AttributeArgs<u32> = parse(name, rename_value(arguments, "ignore_count"))?;
            to_value(
                controller
                    .set_ignore_count(&args.location(), args.value)
                    .await?,
            )
        }
        "set_log_message" => {
            let args: AttributeArgs<String> =
                parse(name, rename_value(arguments, "log_message"))?;
            to_value(
                controller
                    .set_log_message(&args.location(), args.value)
                    .await?,
            )
        }
        "clear_breakpoints" => {
            let args: ClearArgs = parse(name, arguments)?;
            let removed = controller.clear_breakpoints(args.path).await?;
            Ok(json!({ "removed": removed }))
        }
        "list_breakpoints" => {
            let _: NoArgs = parse(name, arguments)?;
            to_value(controller.list_active_breakpoints().await)
        }
        "continue" | "next" | "step_in" | "step_out" | "pause" => {
            let args: ControlArgs = parse(name, arguments)?;
            let controller = within(controller, args.timeout_ms)?;
            let outcome = match name {
                "continue" => controller.r#continue().await?,
                "next" => controller.next().await?,
                "step_in" => controller.step_in().await?,
                "step_out" => controller.step_out().await?,
                _ => controller.pause().await?,
            };
            to_value(outcome)
        }
        "run_until" => {
            let args: LineArgs = parse_required(name, arguments)?;
            let controller = within(controller, args.timeout_ms)?;
            to_value(controller.run_until(args.line, args.frame_id).await?)
        }
        "jump" => {
            let args: LineArgs = parse_required(name, arguments)?;
            let controller = within(controller, args.timeout_ms)?;
            to_value(controller.jump(args.line, args.frame_id).await?)
        }
        "up" => {
            let _: NoArgs = parse(name, arguments)?;
            to_value(controller.up()?)
        }
        "down" => {
            let _: NoArgs = parse(name, arguments)?;
            to_value(controller.down()?)
        }
        "stack_trace" => {
            let _: NoArgs = parse(name, arguments)?;
            to_value(controller.stack_trace()?)
        }
        "evaluate" | "pretty_print" | "whatis" | "get_source" => {
            let args: EvaluateArgs = parse_required(name, arguments)?;
            let controller = within(controller, args.timeout_ms)?;
            match name {
                "evaluate" => to_value(
                    controller
                        .evaluate(&args.expression, args.frame_id, args.context.as_deref())
                        .await?,
                ),
                "pretty_print" => {
                    to_value(controller.pretty_print(&args.expression, args.frame_id).await?)
                }
                "whatis" => to_value(controller.whatis(&args.expression, args.frame_id).await?),
                _ => to_value(controller.get_source(&args.expression, args.frame_id).await?),
            }
        }
        "execute_statement" => {
            let args: StatementArgs = parse_required(name, arguments)?;
            let controller = within(controller, args.timeout_ms)?;
            to_value(
                controller
                    .execute_statement(&args.statement, args.frame_id)
                    .await?,
            )
        }
        "get_variables" => {
            let args: VariablesArgs = parse(name, arguments)?;
            let controller = within(controller, args.timeout_ms)?;
            to_value(
                controller
                    .get_variables(args.frame_id, args.scope.as_deref())
                    .await?,
            )
        }
        "launch" => {
            let config: LaunchConfig = parse_required(name, arguments)?;
            to_value(controller.launch(config).await?)
        }
        "restart" => {
            let _: NoArgs = parse(name, arguments)?;
            to_value(controller.restart().await?)
        }
        "quit" => {
            let _: NoArgs = parse(name, arguments)?;
            controller.quit().await?;
            Ok(json!({ "quit": true }))
        }
        other => Err(DebugError::InvalidArgument(format!(
            "unknown tool {other:?}"
        ))),
    }
}

/// Accept the attribute under its own name (`condition`, `ignore_count`, ...)
/// and move it to `value`.
fn rename_value(mut arguments: Value, field: &str) -> Value {
    if let Some(object) = arguments.as_object_mut() {
        if let Some(value) = object.remove(field) {
            object.insert("value".to_string(), value);
        }
    }
    arguments
}
