//! Debug Session (C3), base dialect: high-level operations layered on a
//! [`Connection`], plus the translation from raw connection events into the
//! typed session events listed in spec.md §4.3.

use crate::connection::{Connection, ConnectionEvent};
use crate::error::SessionError;
use crate::value::{Breakpoint, BreakpointVerification, Scope, StackFrame, Variable};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Evaluation context discriminator for `evaluate` (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalContext {
    Watch,
    Repl,
    Hover,
    Clipboard,
    Variables,
}

impl EvalContext {
    fn as_wire(self) -> &'static str {
        match self {
            EvalContext::Watch => "watch",
            EvalContext::Repl => "repl",
            EvalContext::Hover => "hover",
            EvalContext::Clipboard => "clipboard",
            EvalContext::Variables => "variables",
        }
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        EvalContext::Watch
    }
}

/// Filter discriminator for `inspectVariable`/the `variables` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariablesFilter {
    Named,
    Indexed,
}

impl VariablesFilter {
    fn as_wire(self) -> &'static str {
        match self {
            VariablesFilter::Named => "named",
            VariablesFilter::Indexed => "indexed",
        }
    }
}

/// Optional pagination/filtering for `inspectVariable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariablesQuery {
    pub filter: Option<VariablesFilter>,
    pub start: Option<u32>,
    pub count: Option<u32>,
}

/// Reason a `stopped` session event was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Entry,
    Exception,
    Breakpoint,
    Pause,
    Step,
    StepIn,
    StepOut,
}

/// Reason a `context` session event was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextReason {
    New,
    Exited,
}

/// Typed events surfaced by a [`DebugSession`] (spec.md §4.3 "Events
/// surfaced by the Session").
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Stopped { thread: i64, reason: StopReason },
    Context { thread: i64, reason: ContextReason },
    End,
}

fn parse_stop_reason(raw: &str) -> StopReason {
    match raw {
        "exception" => StopReason::Exception,
        "breakpoint" => StopReason::Breakpoint,
        "pause" => StopReason::Pause,
        "step" => StopReason::Step,
        "stepIn" => StopReason::StepIn,
        "stepOut" => StopReason::StepOut,
        _ => StopReason::Entry,
    }
}

fn parse_context_reason(raw: &str) -> ContextReason {
    match raw {
        "exited" => ContextReason::Exited,
        _ => ContextReason::New,
    }
}

/// Translate a raw [`ConnectionEvent`] into a [`SessionEvent`], if the base
/// dialect recognises it. Returns `None` for events a subclassed dialect
/// (e.g. the host-extended one) handles instead.
pub(crate) fn translate_base_event(event: &ConnectionEvent) -> Option<SessionEvent> {
    match event {
        ConnectionEvent::End => Some(SessionEvent::End),
        ConnectionEvent::Event { name, payload } => match name.as_str() {
            "StoppedEvent" => {
                let thread = payload.get("thread").and_then(Value::as_i64).unwrap_or(0);
                let reason = payload
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(parse_stop_reason)
                    .unwrap_or(StopReason::Entry);
                Some(SessionEvent::Stopped { thread, reason })
            }
            "ThreadEvent" => {
                let thread = payload.get("thread").and_then(Value::as_i64).unwrap_or(0);
                let reason = payload
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(parse_context_reason)
                    .unwrap_or(ContextReason::New);
                Some(SessionEvent::Context { thread, reason })
            }
            "terminated" => Some(SessionEvent::End),
            _ => None,
        },
    }
}

/// High-level debugger operations layered on a [`Connection`] (spec.md
/// §4.3 base dialect).
pub struct DebugSession {
    conn: Connection,
}

impl DebugSession {
    pub fn new(conn: Connection) -> Self {
        DebugSession { conn }
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Subscribe to session-level events, translated from the underlying
    /// connection's event stream.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.conn.subscribe()
    }

    /// Translate the next raw connection event this subscription yields,
    /// skipping any the base dialect does not recognise.
    pub async fn next_event(
        rx: &mut broadcast::Receiver<ConnectionEvent>,
    ) -> Option<SessionEvent> {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    if let Some(translated) = translate_base_event(&ev) {
                        debug!(?translated, "session event");
                        return Some(translated);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    trace!(skipped = n, "session event receiver lagged");
                }
            }
        }
    }

    /// Requests orderly shutdown of the underlying connection. Idempotent,
    /// forwards to [`Connection::close`] (SPEC_FULL.md Debug Session
    /// supplement: every complete debug-adapter-style client exposes a
    /// caller-driven teardown alongside the spec's connection-initiated
    /// `end`).
    pub fn disconnect(&self) {
        self.conn.close();
    }

    pub async fn continue_(&self) -> Result<Value, SessionError> {
        Ok(self.conn.send_request("continue", None).await?)
    }

    pub async fn pause(&self) -> Result<Value, SessionError> {
        Ok(self.conn.send_request("pause", None).await?)
    }

    pub async fn step_next(&self) -> Result<Value, SessionError> {
        Ok(self.conn.send_request("next", None).await?)
    }

    pub async fn step_in(&self) -> Result<Value, SessionError> {
        Ok(self.conn.send_request("stepIn", None).await?)
    }

    pub async fn step_out(&self) -> Result<Value, SessionError> {
        Ok(self.conn.send_request("stepOut", None).await?)
    }

    /// `evaluate(frameId, expr, context?)`, defaulting `context` to `watch`.
    pub async fn evaluate(
        &self,
        frame_id: i64,
        expression: impl Into<String>,
        context: Option<EvalContext>,
    ) -> Result<Variable, SessionError> {
        let args = json!({
            "frameId": frame_id,
            "context": context.unwrap_or_default().as_wire(),
            "expression": expression.into(),
        });
        let body = self.conn.send_request("evaluate", Some(args)).await?;
        Ok(Variable::from_evaluate_body(&body))
    }

    /// `traceStack()`: debuggee-ordered sequence of stack frames, top first.
    pub async fn trace_stack(&self) -> Result<Vec<StackFrame>, SessionError> {
        let body = self.conn.send_request("stackTrace", None).await?;
        let frames = body
            .get("stackFrames")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(frames)
            .map_err(|_| SessionError::MalformedResponse("stackFrames"))
    }

    pub async fn get_top_stack(&self) -> Result<Option<StackFrame>, SessionError> {
        Ok(self.trace_stack().await?.into_iter().next())
    }

    pub async fn get_scopes(&self, frame_id: i64) -> Result<Vec<Scope>, SessionError> {
        let args = json!({ "frameId": frame_id });
        let body = self.conn.send_request("scopes", Some(args)).await?;
        let scopes = body.get("scopes").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(scopes).map_err(|_| SessionError::MalformedResponse("scopes"))
    }

    /// `inspectVariable(ref, ...)`: one level of `variables` expansion. See
    /// [`crate::inspect`] for the recursive materialiser built on top of
    /// this.
    pub async fn inspect_variable(
        &self,
        reference: i64,
        query: VariablesQuery,
    ) -> Result<Vec<Variable>, SessionError> {
        let mut args = json!({ "variablesReference": reference });
        let obj = args.as_object_mut().unwrap();
        if let Some(filter) = query.filter {
            obj.insert("filter".to_string(), Value::from(filter.as_wire()));
        }
        if let Some(start) = query.start {
            obj.insert("start".to_string(), Value::from(start));
        }
        if let Some(count) = query.count {
            obj.insert("count".to_string(), Value::from(count));
        }

        let body = self.conn.send_request("variables", Some(args)).await?;
        let raw_vars: Vec<crate::value::RawVariableInfo> = serde_json::from_value(
            body.get("variables").cloned().unwrap_or(Value::Array(vec![])),
        )
        .map_err(|_| SessionError::MalformedResponse("variables"))?;
        Ok(raw_vars.into_iter().map(Variable::from_wire).collect())
    }

    /// `resume()`: fire-and-forget envelope, no response awaited.
    pub fn resume(&self) -> Result<(), SessionError> {
        Ok(self.conn.send_envelope("resume", None)?)
    }

    /// `setBreakpoints(path, bps)`: base dialect always fires the
    /// fire-and-forget envelope and returns synthetic all-verified status.
    /// The host-extended dialect overrides this for protocol v≥6
    /// (spec.md §4.3 "Open question").
    pub async fn set_breakpoints(
        &self,
        path: impl Into<String>,
        breakpoints: &[Breakpoint],
    ) -> Result<Vec<BreakpointVerification>, SessionError> {
        let data = json!({
            "breakpoints": {
                "path": path.into(),
                "breakpoints": if breakpoints.is_empty() { Value::Null } else { json!(breakpoints) },
            }
        });
        self.conn.send_envelope("breakpoints", Some(data))?;
        Ok(vec![BreakpointVerification { verified: true }; breakpoints.len()])
    }

    pub fn set_stop_on_exception(&self, enabled: bool) -> Result<(), SessionError> {
        let data = json!({ "stopOnException": enabled });
        Ok(self.conn.send_envelope("stopOnException", Some(data))?)
    }

    /// `evaluateHandle(f, args)`: local (`eval`-style) stringified-callable
    /// convenience wrapper over `evaluate` (spec.md §4.3 "Expression
    /// helper"). Evaluated in `frame_id`'s scope.
    pub async fn evaluate_handle(
        &self,
        frame_id: i64,
        fn_source: &str,
        args_json: &Value,
    ) -> Result<Variable, SessionError> {
        let expr = format!("({})({})", fn_source, args_json);
        self.evaluate(frame_id, expr, None).await
    }

    /// `evaluateHandleGlobal(f, args)`: global (`function`-style) variant,
    /// evaluated in the debuggee's global scope.
    pub async fn evaluate_handle_global(
        &self,
        frame_id: i64,
        fn_source: &str,
        args_json: &Value,
    ) -> Result<Variable, SessionError> {
        let expr = format!(
            "(new Function(\"return ({})(arguments[0])\"))({})",
            fn_source, args_json
        );
        self.evaluate(frame_id, expr, None).await
    }
}
