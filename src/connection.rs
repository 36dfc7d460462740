//! Debug Connection (C2): correlates requests with responses, dispatches
//! events, enforces per-request timeouts, signals connection end.
//!
//! All Connection state (the pending-request map and the sequence counter)
//! lives inside a single task (spec.md §5 Scheduling); public methods talk
//! to that task over an internal command channel, the same shape as the
//! reference codebase's `ForwarderCommand { .., reply: oneshot::Sender<_> }`
//! queues in `server/src/http/forwarder_config.rs`.

use crate::error::ConnectionError;
use crate::transport::FrameCodec;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast payload a `Connection` hands its subscribers.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A received `"event"` envelope; `name` is the inner `event.type`.
    Event { name: String, payload: Value },
    /// The stream ended. Emitted exactly once.
    End,
}

enum Command {
    SendRequest {
        command: String,
        args: Option<Value>,
        reply: oneshot::Sender<Result<Value, ConnectionError>>,
    },
    SendEnvelope {
        ty: String,
        data: Option<Value>,
    },
    Timeout(u32),
    Close,
}

struct PendingRequest {
    resolver: oneshot::Sender<Result<Value, ConnectionError>>,
}

/// Handle to a running connection task. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    version: u32,
}

impl Connection {
    /// Spawn the connection task over `stream` and return a handle to it.
    pub fn spawn<S>(stream: S, request_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(stream, FrameCodec);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cmd_tx = cmd_tx.clone();
        let task_events = events.clone();
        tokio::spawn(run(framed, cmd_rx, task_cmd_tx, task_events, request_timeout, 1));

        Connection { cmd_tx, events, version: 1 }
    }

    /// Spawn with the default 10s request timeout.
    pub fn spawn_default<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::spawn(stream, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Subscribe to this connection's event/end stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Emit a `"request"` envelope and await its correlated response.
    ///
    /// Resolves with the response `body` (or `{}` if absent) on success,
    /// rejects with [`ConnectionError::Remote`] if the debuggee's response
    /// carried a non-empty `error`, with [`ConnectionError::Timeout`] if no
    /// response arrives within the configured timeout, or with
    /// [`ConnectionError::Closed`] if the connection ends first.
    pub async fn send_request(
        &self,
        command: impl Into<String>,
        args: Option<Value>,
    ) -> Result<Value, ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendRequest { command: command.into(), args, reply })
            .map_err(|_| ConnectionError::Closed)?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Emit a non-request envelope; no response is awaited.
    pub fn send_envelope(&self, ty: impl Into<String>, data: Option<Value>) -> Result<(), ConnectionError> {
        self.cmd_tx
            .send(Command::SendEnvelope { ty: ty.into(), data })
            .map_err(|_| ConnectionError::Closed)
    }

    /// Request orderly shutdown of the underlying stream. Idempotent.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    pub fn protocol_version_tag(&self) -> u32 {
        self.version
    }
}

async fn run<S>(
    mut framed: Framed<S, FrameCodec>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    self_cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    request_timeout: Duration,
    version: u32,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut pending: HashMap<u32, PendingRequest> = HashMap::new();
    let mut next_seq: u32 = 0;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(Command::Close) => break,
                    Some(Command::SendRequest { command, args, reply }) => {
                        next_seq += 1;
                        let seq = next_seq;

                        let mut request = Map::new();
                        request.insert("request_seq".to_string(), Value::from(seq));
                        request.insert("command".to_string(), Value::from(command));
                        if let Some(args) = args {
                            request.insert("args".to_string(), args);
                        }

                        let mut envelope = Map::new();
                        envelope.insert("version".to_string(), Value::from(version));
                        envelope.insert("type".to_string(), Value::from("request"));
                        envelope.insert("request".to_string(), Value::Object(request));

                        if let Err(e) = framed.send(Value::Object(envelope)).await {
                            warn!(error = %e, "failed to write request envelope");
                            let _ = reply.send(Err(ConnectionError::Frame(e)));
                            continue;
                        }

                        pending.insert(seq, PendingRequest { resolver: reply });

                        let timeout_tx = self_cmd_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(request_timeout).await;
                            let _ = timeout_tx.send(Command::Timeout(seq));
                        });
                    }
                    Some(Command::SendEnvelope { ty, data }) => {
                        let mut envelope = match data {
                            Some(Value::Object(map)) => map,
                            Some(other) => {
                                warn!(?other, "sendEnvelope data was not a JSON object; ignoring");
                                Map::new()
                            }
                            None => Map::new(),
                        };
                        // Callers that already tagged the payload with their own
                        // `version` (e.g. the host dialect's protocol-handshake
                        // echo, which must carry the negotiated protocol version
                        // rather than the connection's constant wire version) win;
                        // only envelopes silent on `version` get the default.
                        envelope
                            .entry("version".to_string())
                            .or_insert_with(|| Value::from(version));
                        envelope.insert("type".to_string(), Value::from(ty));

                        if let Err(e) = framed.send(Value::Object(envelope)).await {
                            warn!(error = %e, "failed to write envelope");
                        }
                    }
                    Some(Command::Timeout(seq)) => {
                        if let Some(p) = pending.remove(&seq) {
                            let _ = p.resolver.send(Err(ConnectionError::Timeout));
                        }
                    }
                }
            }
            incoming = framed.next() => {
                match incoming {
                    None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "framing error, tearing down connection");
                        break;
                    }
                    Some(Ok(value)) => handle_incoming(value, &mut pending, &events),
                }
            }
        }
    }

    // Teardown: clear the map before rejecting, per spec.md §4.2 — a
    // rejecter that synchronously triggers another send must not observe a
    // stale entry.
    let drained: Vec<_> = pending.drain().collect();
    for (_, p) in drained {
        let _ = p.resolver.send(Err(ConnectionError::Closed));
    }
    let _ = events.send(ConnectionEvent::End);
}

fn handle_incoming(
    value: Value,
    pending: &mut HashMap<u32, PendingRequest>,
    events: &broadcast::Sender<ConnectionEvent>,
) {
    let ty = value.get("type").and_then(Value::as_str);
    match ty {
        Some("response") => {
            let Some(seq) = value.get("request_seq").and_then(Value::as_u64) else {
                warn!("response envelope missing request_seq");
                return;
            };
            let Some(pending_req) = pending.remove(&(seq as u32)) else {
                trace!(seq, "response for unknown/expired request_seq, dropping");
                return;
            };
            let result = match value.get("error").and_then(Value::as_str) {
                Some(err) if !err.is_empty() => Err(ConnectionError::Remote(err.to_string())),
                _ => Ok(value.get("body").cloned().unwrap_or(Value::Null)),
            };
            let _ = pending_req.resolver.send(result);
        }
        Some("event") => {
            let Some(event) = value.get("event") else {
                warn!("event envelope missing event payload");
                return;
            };
            let name = event
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            debug!(name = %name, "dispatching event");
            let _ = events.send(ConnectionEvent::Event { name, payload: event.clone() });
        }
        _ => {
            // Forward-compat: any other inbound type is ignored.
        }
    }
}
