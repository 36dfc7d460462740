//! Host-extended dialect (spec.md §4.3 "Host-extended dialect").
//!
//! Composition over inheritance: [`HostSession`] wraps a [`DebugSession`]
//! rather than subclassing it, the same way the reference codebase layers
//! `rt-protocol` envelope variants over a shared base rather than forking
//! the base type.

use crate::connection::{Connection, ConnectionEvent};
use crate::error::SessionError;
use crate::session::{translate_base_event, DebugSession, SessionEvent};
use crate::value::{Breakpoint, BreakpointVerification};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Locally-configured handshake echo data (spec.md §4.3 item 2).
#[derive(Debug, Clone, Default)]
pub struct ProtocolInfo {
    pub target_module_uuid: Option<String>,
    pub passcode: Option<String>,
}

/// Log event severity, 0 (most severe) through 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Level0,
    Level1,
    Level2,
    Level3,
    Level4,
}

impl LogSeverity {
    fn from_wire(raw: i64) -> Self {
        match raw {
            0 => LogSeverity::Level0,
            1 => LogSeverity::Level1,
            2 => LogSeverity::Level2,
            3 => LogSeverity::Level3,
            _ => LogSeverity::Level4,
        }
    }
}

/// Extra events the host-extended dialect surfaces on top of the base
/// [`SessionEvent`] set.
#[derive(Debug, Clone)]
pub enum HostEvent {
    Base(SessionEvent),
    Log { severity: LogSeverity, message: String },
    /// Raw `StatEvent`/`StatEvent2` payload; the stat-tree merge itself is
    /// an out-of-scope external collaborator (spec.md §6).
    Stat(Value),
    ProfilerCapture(Value),
}

/// Session wrapper adding the protocol-version-gated host dialect.
pub struct HostSession {
    inner: DebugSession,
    protocol_info: Option<ProtocolInfo>,
    /// Updated on every received protocol-handshake event (spec.md §3
    /// "Protocol Dialect State"). 0 means unknown.
    protocol_version: Arc<AtomicU32>,
}

impl HostSession {
    pub fn new(conn: Connection, protocol_info: Option<ProtocolInfo>) -> Self {
        HostSession {
            inner: DebugSession::new(conn),
            protocol_info,
            protocol_version: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn base(&self) -> &DebugSession {
        &self.inner
    }

    /// Requests orderly shutdown of the underlying connection. Idempotent.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events()
    }

    /// Translate and, where the payload is a protocol handshake, react to
    /// the next raw connection event on `rx`. Must be driven continuously
    /// by the caller for the version-tracking and handshake-echo behavior
    /// to take effect (spec.md §4.3 items 1-2).
    pub async fn next_event(&self, rx: &mut broadcast::Receiver<ConnectionEvent>) -> Option<HostEvent> {
        loop {
            let raw = match rx.recv().await {
                Ok(ev) => ev,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            };

            if let ConnectionEvent::Event { name, payload } = &raw {
                match name.as_str() {
                    "ProtocolEvent" => {
                        self.handle_protocol_event(payload).await;
                        continue;
                    }
                    "PrintEvent" => {
                        let severity = payload
                            .get("severity")
                            .and_then(Value::as_i64)
                            .map(LogSeverity::from_wire)
                            .unwrap_or(LogSeverity::Level4);
                        let message = payload
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        return Some(HostEvent::Log { severity, message });
                    }
                    "StatEvent" | "StatEvent2" => return Some(HostEvent::Stat(payload.clone())),
                    "ProfilerCapture" => return Some(HostEvent::ProfilerCapture(payload.clone())),
                    _ => {}
                }
            }

            if let Some(base) = translate_base_event(&raw) {
                return Some(HostEvent::Base(base));
            }
        }
    }

    async fn handle_protocol_event(&self, payload: &Value) {
        let version = payload.get("version").and_then(Value::as_u64).unwrap_or(0) as u32;
        self.protocol_version.store(version, Ordering::SeqCst);
        debug!(version, "protocol handshake received");

        let Some(info) = &self.protocol_info else { return };

        let mut echo = serde_json::Map::new();
        echo.insert("version".to_string(), Value::from(version));
        if version >= 2 {
            if let Some(uuid) = &info.target_module_uuid {
                echo.insert("target_module_uuid".to_string(), Value::from(uuid.clone()));
            }
        }
        if version >= 4 {
            if let Some(passcode) = &info.passcode {
                echo.insert("passcode".to_string(), Value::from(passcode.clone()));
            }
        }
        let _ = self.inner.connection().send_envelope("protocol", Some(Value::Object(echo)));
    }

    /// `minecraftCommand`: wire shape varies by protocol version (spec.md
    /// §4.3 item 4). Requires v≥4; flat before v5, nested `{command:{...}}`
    /// from v5. Below v4, rejects with
    /// [`SessionError::ProtocolVersionGate`] rather than silently dropping
    /// the command.
    pub fn minecraft_command(&self, command: impl Into<String>, dimension_type: impl Into<String>) -> Result<(), SessionError> {
        let version = self.protocol_version();
        if version < 4 {
            return Err(SessionError::ProtocolVersionGate {
                operation: "minecraftCommand",
                required: 4,
                actual: version,
            });
        }
        let command = command.into();
        let dimension_type = dimension_type.into();
        let data = if version >= 5 {
            json!({ "command": { "command": command, "dimension_type": dimension_type } })
        } else {
            json!({ "command": command, "dimension_type": dimension_type })
        };
        Ok(self.inner.connection().send_envelope("minecraftCommand", Some(data))?)
    }

    /// `startProfiler`: v≥5 only. Below that, rejects with
    /// [`SessionError::ProtocolVersionGate`] rather than silently dropping
    /// the command.
    pub fn start_profiler(&self, target_module_uuid: impl Into<String>) -> Result<(), SessionError> {
        let version = self.protocol_version();
        if version < 5 {
            return Err(SessionError::ProtocolVersionGate {
                operation: "startProfiler",
                required: 5,
                actual: version,
            });
        }
        let data = json!({ "profiler": { "target_module_uuid": target_module_uuid.into() } });
        Ok(self.inner.connection().send_envelope("startProfiler", Some(data))?)
    }

    /// `stopProfiler`: v≥5 only. Below that, rejects with
    /// [`SessionError::ProtocolVersionGate`] rather than silently dropping
    /// the command.
    pub fn stop_profiler(
        &self,
        captures_path: impl Into<String>,
        target_module_uuid: impl Into<String>,
    ) -> Result<(), SessionError> {
        let version = self.protocol_version();
        if version < 5 {
            return Err(SessionError::ProtocolVersionGate {
                operation: "stopProfiler",
                required: 5,
                actual: version,
            });
        }
        let data = json!({
            "profiler": {
                "captures_path": captures_path.into(),
                "target_module_uuid": target_module_uuid.into(),
            }
        });
        Ok(self.inner.connection().send_envelope("stopProfiler", Some(data))?)
    }

    /// `setBreakpoints` override: v≥6 issues an awaitable `"setBreakpoints"`
    /// request with real per-breakpoint verification; earlier versions fall
    /// back to the base dialect's fire-and-forget envelope with synthetic
    /// verification. This override is authoritative — it never also sends
    /// the base envelope (spec.md §4.3/§9 "Open question").
    pub async fn set_breakpoints(
        &self,
        path: impl Into<String>,
        breakpoints: &[Breakpoint],
    ) -> Result<Vec<BreakpointVerification>, SessionError> {
        if self.protocol_version() < 6 {
            return self.inner.set_breakpoints(path, breakpoints).await;
        }

        let path = path.into();
        let args = json!({ "path": path, "breakpoints": breakpoints });
        let body = self
            .inner
            .connection()
            .send_request("setBreakpoints", Some(args))
            .await?;
        let verifications = body
            .get("breakpoints")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(verifications)
            .map_err(|_| SessionError::MalformedResponse("breakpoints"))
    }
}
