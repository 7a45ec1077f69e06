use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tether_dap::types::EvaluateArguments;
use tether_dap::{Scope, Variable};
use tokio::sync::RwLockReadGuard;

use crate::controller::DebugController;
use crate::error::{DebugError, Result};
use crate::session::ActiveSession;

/// Contexts accepted by `evaluate`.
pub const EVALUATE_CONTEXTS: &[&str] = &["watch", "hover", "repl", "clipboard"];

const DEFAULT_CONTEXT: &str = "repl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub expression: String,
    pub frame_id: i64,
    pub result: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Non-zero when the result has children the adapter can enumerate.
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableRow {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeReport {
    pub name: String,
    pub total: usize,
    pub variables: Vec<VariableRow>,
    /// Names left out of `variables` by the per-scope cap.
    pub elided: Vec<String>,
    /// Expensive scopes are only fetched when requested by name.
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariablesReport {
    pub frame_id: i64,
    pub scopes: Vec<ScopeReport>,
    /// Set when a scope filter matched nothing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available_scopes: Vec<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub expression: String,
    pub frame_id: i64,
    pub source: String,
}

impl DebugController {
    /// Evaluate `expression` in a frame. `context` defaults to `repl`.
    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: Option<&str>,
    ) -> Result<Evaluation> {
        self.evaluate_as("evaluate", expression, frame_id, context)
            .await
    }

    /// Run a statement for its side effects.
    pub async fn execute_statement(
        &self,
        statement: &str,
        frame_id: Option<i64>,
    ) -> Result<Evaluation> {
        self.evaluate_as("execute_statement", statement, frame_id, None)
            .await
    }

    pub async fn pretty_print(
        &self,
        expression: &str,
        frame_id: Option<i64>,
    ) -> Result<Evaluation> {
        self.evaluate_as("pretty_print", expression, frame_id, None)
            .await
    }

    pub async fn whatis(&self, expression: &str, frame_id: Option<i64>) -> Result<Evaluation> {
        self.evaluate_as("whatis", expression, frame_id, None)
            .await
    }

    async fn evaluate_as(
        &self,
        operation: &str,
        expression: &str,
        frame_id: Option<i64>,
        context: Option<&str>,
    ) -> Result<Evaluation> {
        if expression.trim().is_empty() {
            return Err(DebugError::InvalidArgument(format!(
                "{operation} needs a non-empty expression"
            )));
        }
        let context = match context.map(str::trim).filter(|c| !c.is_empty()) {
            Some(context) if EVALUATE_CONTEXTS.contains(&context) => context,
            Some(context) => {
                return Err(DebugError::InvalidArgument(format!(
                    "unknown evaluate context {context:?}; expected one of {}",
                    EVALUATE_CONTEXTS.join(", ")
                )))
            }
            None => DEFAULT_CONTEXT,
        };

        self.bounded(
            operation,
            self.evaluate_in(operation, expression, frame_id, context),
        )
        .await
    }

    async fn evaluate_in(
        &self,
        operation: &str,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<Evaluation> {
        let (session, _gate, frame_id) = self.inspection_target(frame_id).await?;
        let body = session
            .client
            .evaluate(&EvaluateArguments {
                expression: expression.to_string(),
                frame_id: Some(frame_id),
                context: Some(context.to_string()),
            })
            .await
            .map_err(|err| DebugError::from_dap(operation, err))?;

        Ok(Evaluation {
            expression: expression.to_string(),
            frame_id,
            result: body.result,
            type_: body.type_,
            variables_reference: body.variables_reference,
        })
    }

    /// List the variables of every scope of a frame, or of the scope matching
    /// `scope_filter` (case-insensitive).
    pub async fn get_variables(
        &self,
        frame_id: Option<i64>,
        scope_filter: Option<&str>,
    ) -> Result<VariablesReport> {
        let filter = scope_filter.map(str::trim).filter(|f| !f.is_empty());
        self.bounded("get_variables", self.collect_variables(frame_id, filter))
            .await
    }

    async fn collect_variables(
        &self,
        frame_id: Option<i64>,
        filter: Option<&str>,
    ) -> Result<VariablesReport> {
        let (session, _gate, frame_id) = self.inspection_target(frame_id).await?;

        let scopes = session
            .client
            .scopes(frame_id)
            .await
            .map_err(|err| DebugError::from_dap("get_variables", err))?;

        let selected: Vec<&Scope> = match filter {
            Some(filter) => scopes
                .iter()
                .filter(|scope| scope.name.eq_ignore_ascii_case(filter))
                .collect(),
            None => scopes.iter().collect(),
        };

        if selected.is_empty() {
            let available: Vec<String> = scopes.iter().map(|scope| scope.name.clone()).collect();
            let text = match filter {
                Some(filter) => format!(
                    "No scope named {filter:?} in frame {frame_id}. Available scopes: {}\n",
                    available.join(", ")
                ),
                None => format!("Frame {frame_id} has no scopes.\n"),
            };
            return Ok(VariablesReport {
                frame_id,
                scopes: Vec::new(),
                available_scopes: available,
                text,
            });
        }

        let cap = self.shared.config.inspection.max_variables_per_scope;
        let max_value_chars = self.shared.config.inspection.max_value_chars;
        let mut reports = Vec::with_capacity(selected.len());
        for scope in selected {
            if scope.expensive && filter.is_none() {
                reports.push(ScopeReport {
                    name: scope.name.clone(),
                    total: 0,
                    variables: Vec::new(),
                    elided: Vec::new(),
                    skipped: true,
                });
                continue;
            }
            let variables = session
                .client
                .variables(scope.variables_reference)
                .await
                .map_err(|err| DebugError::from_dap("get_variables", err))?;
            reports.push(scope_report(&scope.name, variables, cap, max_value_chars));
        }

        let text = format_scopes(&reports);
        Ok(VariablesReport {
            frame_id,
            scopes: reports,
            available_scopes: Vec::new(),
            text,
        })
    }

    /// Retrieve the source of the object `expression` names, using the
    /// configured source template.
    pub async fn get_source(
        &self,
        expression: &str,
        frame_id: Option<i64>,
    ) -> Result<SourceReport> {
        if expression.trim().is_empty() {
            return Err(DebugError::InvalidArgument(
                "get_source needs a non-empty expression".to_string(),
            ));
        }
        let template = &self.shared.config.inspection.source_template;
        let request = template.replace("{expression}", expression.trim());
        let evaluation = self
            .evaluate_as("get_source", &request, frame_id, None)
            .await?;
        Ok(SourceReport {
            expression: expression.to_string(),
            frame_id: evaluation.frame_id,
            source: unquote_repr(&evaluation.result),
        })
    }

    /// Common prelude of inspection operations: require a session, queue
    /// behind any pending execution operation, then resolve the frame.
    async fn inspection_target(
        &self,
        frame_id: Option<i64>,
    ) -> Result<(Arc<ActiveSession>, RwLockReadGuard<'_, ()>, i64)> {
        let session = self.shared.require_session()?;
        let gate = self.shared.gate.read().await;
        let frame_id = self.shared.tracker.read().resolve_frame(frame_id)?.id;
        Ok((session, gate, frame_id))
    }

    /// Run an inspection under the request deadline of this handle. The
    /// deadline covers the wait behind an execution operation too.
    async fn bounded<T>(
        &self,
        operation: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.request_timeout(), work)
            .await
            .map_err(|_| DebugError::Timeout {
                operation: operation.to_string(),
            })?
    }
}

fn scope_report(
    name: &str,
    variables: Vec<Variable>,
    cap: usize,
    max_value_chars: usize,
) -> ScopeReport {
    let total = variables.len();
    let mut rows = Vec::with_capacity(total.min(cap));
    let mut elided = Vec::new();
    for (index, variable) in variables.into_iter().enumerate() {
        if index < cap {
            rows.push(VariableRow {
                name: variable.name,
                type_: variable.type_.unwrap_or_default(),
                value: render_value(&variable.value, max_value_chars),
            });
        } else {
            elided.push(variable.name);
        }
    }
    ScopeReport {
        name: name.to_string(),
        total,
        variables: rows,
        elided,
        skipped: false,
    }
}

fn format_scopes(scopes: &[ScopeReport]) -> String {
    let mut out = String::new();
    for scope in scopes {
        if scope.skipped {
            let _ = writeln!(
                out,
                "{}: not fetched (expensive); request it with scope={:?}\n",
                scope.name, scope.name
            );
            continue;
        }
        if scope.elided.is_empty() {
            let _ = writeln!(out, "{} ({} variables):", scope.name, scope.total);
        } else {
            let _ = writeln!(
                out,
                "{} ({} variables, showing the first {}):",
                scope.name,
                scope.total,
                scope.variables.len()
            );
        }
        out.push_str("name | type | value\n");
        for row in &scope.variables {
            let _ = writeln!(out, "{} | {} | {}", row.name, row.type_, row.value);
        }
        if !scope.elided.is_empty() {
            let _ = writeln!(
                out,
                "{} more variables not shown: {}",
                scope.elided.len(),
                scope.elided.join(", ")
            );
            out.push_str("Use evaluate with one of these names to inspect an elided variable.\n");
        }
        out.push('\n');
    }
    out
}

/// Render a value on one line, cut to `max_chars` characters (0 disables the
/// cut).
pub fn render_value(value: &str, max_chars: usize) -> String {
    let single_line = value
        .replace("\r\n", "\\n")
        .replace('\n', "\\n")
        .replace('\r', "\\r");
    if max_chars == 0 || single_line.chars().count() <= max_chars {
        return single_line;
    }
    let mut cut: String = single_line.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Decode a quoted string literal as printed by a REPL (`'a\nb'`). Anything
/// else is returned unchanged.
pub fn unquote_repr(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() < 2 {
        return value.to_string();
    }
    let quote = bytes[0];
    if !(quote == b'\'' || quote == b'"') || bytes[bytes.len() - 1] != quote {
        return value.to_string();
    }

    let inner = &value[1..value.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
