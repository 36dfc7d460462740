//! Client library for a remote embedded ECMAScript runtime's debug agent:
//! framed transport, request/response correlation over a versioned
//! protocol dialect, and recursive remote object-graph inspection.
//!
//! Layered, leaves first: [`transport`] frames bytes into JSON envelopes,
//! [`connection`] correlates requests with responses and dispatches
//! events, [`session`]/[`host`] expose the high-level debugger operations,
//! and [`inspect`] recursively materialises a remote object graph.

pub mod connection;
pub mod error;
pub mod host;
pub mod inspect;
pub mod session;
pub mod transport;
pub mod value;

pub use connection::{Connection, ConnectionEvent};
pub use error::{ConnectionError, FrameError, SessionError};
pub use host::{HostEvent, HostSession, LogSeverity, ProtocolInfo};
pub use inspect::{inspect, InspectGraph, InspectOptions, InspectedNode, NodeId};
pub use session::{
    ContextReason, DebugSession, EvalContext, SessionEvent, StopReason, VariablesFilter,
    VariablesQuery,
};
pub use value::{
    Breakpoint, BreakpointVerification, PrimitiveValue, RawVariableInfo, Scope, StackFrame,
    Variable, VariableKind,
};

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Tunable knobs for a new [`Connection`] (SPEC_FULL.md "Configuration").
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub request_timeout: Duration,
    pub max_depth: u32,
    pub inspect_proto: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            request_timeout: Duration::from_secs(10),
            max_depth: 16,
            inspect_proto: false,
        }
    }
}

impl ConnectOptions {
    pub fn inspect_options(&self) -> InspectOptions {
        InspectOptions { max_depth: self.max_depth, inspect_proto: self.inspect_proto }
    }
}

/// Connect a base-dialect session over an already-open duplex stream (for
/// example a `tokio::net::TcpStream`).
pub fn connect<S>(stream: S, options: ConnectOptions) -> DebugSession
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    info!(request_timeout = ?options.request_timeout, "opening debug session");
    let conn = Connection::spawn(stream, options.request_timeout);
    DebugSession::new(conn)
}

/// Connect a host-extended session over an already-open duplex stream.
pub fn connect_host<S>(
    stream: S,
    options: ConnectOptions,
    protocol_info: Option<ProtocolInfo>,
) -> HostSession
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    info!(request_timeout = ?options.request_timeout, "opening host-extended debug session");
    let conn = Connection::spawn(stream, options.request_timeout);
    HostSession::new(conn, protocol_info)
}
