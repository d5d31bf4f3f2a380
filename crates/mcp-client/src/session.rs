//! Session state machine layered on a [`Transport`].
//!
//! A session moves `Uninitialized -> Ready -> Closed`. A background reader
//! task pumps frames off the transport and completes pending calls through
//! a correlation map, so a caller waiting in [`Session::call_tool`] is woken
//! by the matching response, by session teardown, or by its bounded wait —
//! never left hanging.
//!
//! Protocol violations (unmatched correlation ids, malformed frames) are
//! logged and dropped; past [`MAX_PROTOCOL_VIOLATIONS`] of them the session
//! force-closes rather than tolerating a broken peer forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use tw_domain::config::McpServerConfig;
use tw_domain::ToolOutcome;

use crate::protocol::{
    self, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ToolCallPayload, ToolDescriptor,
    ToolsListResult,
};
use crate::transport::{Transport, TransportError};

/// Dropped-frame budget before the session gives up on the peer.
const MAX_PROTOCOL_VIOLATIONS: u32 = 32;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State & errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("timed out waiting for response to {method}")]
    Timeout { method: String },

    #[error("{op} is not valid in state {state}")]
    InvalidState { op: &'static str, state: SessionState },

    #[error("session closed")]
    Closed,

    #[error("protocol: {0}")]
    Protocol(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Shared {
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    /// Correlation map: request id -> completion handle for the waiting caller.
    pending: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicU64,
    violations: AtomicU32,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Move to `Closed` and wake every pending caller.
    ///
    /// Dropping a pending sender resolves the caller's receive with an
    /// error, which the wait path maps to [`SessionError::Closed`].
    fn force_close(&self) {
        self.set_state(SessionState::Closed);
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "waking pending calls with session-closed");
        }
    }

    /// Record one dropped frame; returns true once the budget is exhausted.
    fn record_violation(&self, reason: &str, frame: &str) -> bool {
        let count = self.violations.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(reason, frame, count, "dropping protocol-violating frame");
        count >= MAX_PROTOCOL_VIOLATIONS
    }
}

/// A client session over one transport.
///
/// Cheap to share: all methods take `&self`, and the one-call-at-a-time
/// discipline is the orchestration layer's (the protocol itself tolerates
/// out-of-order responses via the correlation map).
pub struct Session {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl Session {
    /// Attach a session to a connected transport and start the reader task.
    ///
    /// The session starts `Uninitialized`; call [`Session::initialize`]
    /// before anything else.
    pub fn connect(transport: Arc<dyn Transport>, config: &McpServerConfig) -> Self {
        let shared = Arc::new(Shared {
            transport,
            state: Mutex::new(SessionState::Uninitialized),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            violations: AtomicU32::new(0),
        });

        let reader = tokio::spawn(read_loop(shared.clone()));

        Self {
            shared,
            reader: Mutex::new(Some(reader)),
            handshake_timeout: config.handshake_timeout(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Perform the MCP handshake: `initialize` request, then the
    /// `notifications/initialized` notification.
    ///
    /// On a handshake timeout the session stays `Uninitialized` so the
    /// caller may retry transport setup.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Uninitialized => {}
            state => return Err(SessionError::InvalidState { op: "initialize", state }),
        }

        let params = serde_json::to_value(protocol::initialize_params())
            .map_err(|e| SessionError::Protocol(format!("failed to serialize initialize params: {e}")))?;

        let resp = match self
            .send_request("initialize", Some(params), self.handshake_timeout)
            .await
        {
            Ok(resp) => resp,
            Err(SessionError::Timeout { .. }) => return Err(SessionError::HandshakeTimeout),
            Err(other) => return Err(other),
        };

        let result = resp
            .into_result()
            .map_err(|e| SessionError::Protocol(format!("initialize failed: {e}")))?;

        if let Some(version) = result.get("protocolVersion").and_then(Value::as_str) {
            tracing::debug!(version, "server protocol version");
        }

        self.send_notification("notifications/initialized").await?;
        self.shared.set_state(SessionState::Ready);
        tracing::info!("session ready");
        Ok(())
    }

    /// Fetch the published tool set.
    ///
    /// An undecodable discovery result degrades to the empty set with a
    /// warning rather than aborting the session.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        self.require_ready("list_tools")?;

        let resp = self
            .send_request("tools/list", None, self.request_timeout)
            .await?;

        let result = match resp.into_result() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "tools/list returned error, falling back to empty tool set");
                return Ok(Vec::new());
            }
        };

        match serde_json::from_value::<ToolsListResult>(result) {
            Ok(r) => Ok(r.tools),
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode tools/list result, falling back to empty tool set");
                Ok(Vec::new())
            }
        }
    }

    /// Invoke a tool and wait for the correlation-matched result.
    ///
    /// Handler failures come back as `ToolOutcome::Err`, not as session
    /// errors. If the session closes while the call is outstanding, the
    /// wait resolves with [`SessionError::Closed`].
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutcome, SessionError> {
        self.require_ready("call_tool")?;

        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let resp = self
            .send_request("tools/call", Some(params), self.request_timeout)
            .await?;

        let result = resp
            .into_result()
            .map_err(|e| SessionError::Protocol(format!("tools/call failed: {e}")))?;

        let payload = serde_json::from_value::<ToolCallPayload>(result)
            .map_err(|e| SessionError::Protocol(format!("failed to decode tools/call result: {e}")))?;

        let text = payload.joined_text();
        if payload.is_error {
            Ok(ToolOutcome::Err(text))
        } else {
            Ok(ToolOutcome::Ok(text))
        }
    }

    /// Tear the session down: wake pending callers, stop the reader, and
    /// shut the transport (and any child process) down.
    pub async fn close(&self) {
        if self.state() == SessionState::Closed {
            return;
        }
        tracing::info!("closing session");
        self.shared.force_close();

        let handle = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }

        self.shared.transport.shutdown().await;
    }

    // ── Internals ────────────────────────────────────────────────

    fn require_ready(&self, op: &'static str) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            state => Err(SessionError::InvalidState { op, state }),
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), SessionError> {
        let notif = JsonRpcNotification::new(method);
        let json = serde_json::to_string(&notif)
            .map_err(|e| SessionError::Protocol(format!("failed to serialize notification: {e}")))?;
        tracing::debug!(method, "sending notification");
        if let Err(e) = self.shared.transport.send(&json).await {
            self.shared.force_close();
            return Err(e.into());
        }
        Ok(())
    }

    /// Mint a correlation id, register a pending slot, send the request,
    /// and wait (bounded) for the matched response.
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        wait: Duration,
    ) -> Result<JsonRpcResponse, SessionError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)
            .map_err(|e| SessionError::Protocol(format!("failed to serialize request: {e}")))?;

        tracing::debug!(id, method, "sending request");
        if let Err(e) = self.shared.transport.send(&json).await {
            self.shared
                .pending
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&id);
            // A failed write means the channel is gone.
            self.shared.force_close();
            return Err(e.into());
        }

        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => {
                self.shared
                    .pending
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&id);
                Err(SessionError::Timeout { method: method.to_string() })
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reader task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pump frames off the transport until it fails or the violation budget
/// is spent, completing pending calls by correlation id.
async fn read_loop(shared: Arc<Shared>) {
    loop {
        let frame = match shared.transport.receive().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "transport closed, ending read loop");
                break;
            }
        };

        let value: Value = match serde_json::from_str(&frame) {
            Ok(v) => v,
            Err(_) => {
                if shared.record_violation("undecodable frame", &frame) {
                    break;
                }
                continue;
            }
        };

        // Server-initiated notifications have a method and no id; they are
        // not violations, just uninteresting to this client.
        if value.get("id").is_none() {
            if value.get("method").is_some() {
                tracing::debug!(frame = %frame, "ignoring server notification");
            } else if shared.record_violation("frame with neither id nor method", &frame) {
                break;
            }
            continue;
        }

        let resp: JsonRpcResponse = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(_) => {
                if shared.record_violation("malformed response", &frame) {
                    break;
                }
                continue;
            }
        };

        let slot = shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&resp.id);
        match slot {
            Some(tx) => {
                // The caller may have timed out and dropped the receiver.
                let _ = tx.send(resp);
            }
            None => {
                if shared.record_violation("unmatched correlation id", &frame) {
                    break;
                }
            }
        }
    }

    tracing::warn!("session read loop ended, closing session");
    shared.force_close();
    shared.transport.shutdown().await;
}

impl From<SessionError> for tw_domain::Error {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Transport(t) => Self::Transport(t.to_string()),
            other => Self::Session(other.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DuplexTransport;

    fn test_config() -> McpServerConfig {
        let mut cfg = McpServerConfig::new("unused", vec![]);
        cfg.handshake_timeout_ms = 200;
        cfg.request_timeout_ms = 1_000;
        cfg
    }

    /// Peer that answers `initialize` and echoes every `tools/call` back
    /// as a text payload. Methods in `ignore` get no response.
    fn spawn_peer(peer: DuplexTransport, ignore: &'static [&'static str]) {
        tokio::spawn(async move {
            while let Ok(frame) = peer.receive().await {
                let value: Value = match serde_json::from_str(&frame) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let Some(id) = value.get("id").and_then(Value::as_u64) else {
                    continue; // notification
                };
                let method = value.get("method").and_then(Value::as_str).unwrap_or("");
                if ignore.contains(&method) {
                    continue;
                }
                let result = match method {
                    "initialize" => serde_json::json!({
                        "protocolVersion": protocol::PROTOCOL_VERSION,
                        "capabilities": { "tools": {} },
                        "serverInfo": { "name": "peer", "version": "0.0.0" }
                    }),
                    "tools/list" => serde_json::json!({
                        "tools": [
                            { "name": "add", "description": "Add", "inputSchema": { "type": "object" } }
                        ]
                    }),
                    "tools/call" => serde_json::json!({
                        "content": [{ "type": "text", "text": "echo" }],
                        "isError": false
                    }),
                    _ => serde_json::json!({}),
                };
                let resp = serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result });
                if peer.send(&resp.to_string()).await.is_err() {
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn call_tool_before_initialize_fails_fast() {
        let (client, _peer) = DuplexTransport::pair();
        let session = Session::connect(Arc::new(client), &test_config());

        let err = session
            .call_tool("add", serde_json::json!({"a": 1, "b": 2}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState { op: "call_tool", state: SessionState::Uninitialized }
        ));
    }

    #[tokio::test]
    async fn list_tools_before_initialize_fails_fast() {
        let (client, _peer) = DuplexTransport::pair();
        let session = Session::connect(Arc::new(client), &test_config());
        assert!(matches!(
            session.list_tools().await.unwrap_err(),
            SessionError::InvalidState { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_leaves_session_uninitialized() {
        let (client, _peer) = DuplexTransport::pair();
        let session = Session::connect(Arc::new(client), &test_config());

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, SessionError::HandshakeTimeout));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn handshake_then_list_and_call() {
        let (client, peer) = DuplexTransport::pair();
        spawn_peer(peer, &[]);
        let session = Session::connect(Arc::new(client), &test_config());

        session.initialize().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "add");

        let outcome = session
            .call_tool("add", serde_json::json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::Ok("echo".into()));
    }

    #[tokio::test]
    async fn double_initialize_is_a_state_error() {
        let (client, peer) = DuplexTransport::pair();
        spawn_peer(peer, &[]);
        let session = Session::connect(Arc::new(client), &test_config());

        session.initialize().await.unwrap();
        assert!(matches!(
            session.initialize().await.unwrap_err(),
            SessionError::InvalidState { op: "initialize", state: SessionState::Ready }
        ));
    }

    #[tokio::test]
    async fn undecodable_tools_list_falls_back_to_empty_set() {
        let (client, peer) = DuplexTransport::pair();
        tokio::spawn(async move {
            while let Ok(frame) = peer.receive().await {
                let value: Value = serde_json::from_str(&frame).unwrap();
                let Some(id) = value.get("id").and_then(Value::as_u64) else { continue };
                let method = value.get("method").and_then(Value::as_str).unwrap_or("");
                let result = if method == "initialize" {
                    serde_json::json!({ "protocolVersion": protocol::PROTOCOL_VERSION })
                } else {
                    // Not a { tools: [...] } shape.
                    serde_json::json!({ "tools": "oops" })
                };
                let resp = serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result });
                let _ = peer.send(&resp.to_string()).await;
            }
        });

        let session = Session::connect(Arc::new(client), &test_config());
        session.initialize().await.unwrap();
        let tools = session.list_tools().await.unwrap();
        assert!(tools.is_empty());
        // Session survives the degraded discovery.
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn unmatched_response_is_dropped_not_fatal() {
        let (client, peer) = DuplexTransport::pair();
        tokio::spawn(async move {
            while let Ok(frame) = peer.receive().await {
                let value: Value = serde_json::from_str(&frame).unwrap();
                let Some(id) = value.get("id").and_then(Value::as_u64) else { continue };
                // Reply for a correlation id nobody is waiting on first.
                let junk = serde_json::json!({ "jsonrpc": "2.0", "id": 9_999, "result": {} });
                let _ = peer.send(&junk.to_string()).await;
                let resp = serde_json::json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": { "protocolVersion": protocol::PROTOCOL_VERSION }
                });
                let _ = peer.send(&resp.to_string()).await;
            }
        });

        let session = Session::connect(Arc::new(client), &test_config());
        session.initialize().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn violation_flood_closes_session() {
        let (client, peer) = DuplexTransport::pair();
        let session = Session::connect(Arc::new(client), &test_config());

        for _ in 0..MAX_PROTOCOL_VIOLATIONS {
            let junk = serde_json::json!({ "jsonrpc": "2.0", "id": 4_242, "result": {} });
            peer.send(&junk.to_string()).await.unwrap();
        }

        // Let the reader drain the flood.
        for _ in 0..100 {
            if session.state() == SessionState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn close_wakes_outstanding_call() {
        let (client, peer) = DuplexTransport::pair();
        // Peer answers the handshake but never tools/call.
        spawn_peer(peer, &["tools/call"]);

        let session = Arc::new(Session::connect(Arc::new(client), &test_config()));
        session.initialize().await.unwrap();

        let caller = {
            let session = session.clone();
            tokio::spawn(async move {
                session.call_tool("add", serde_json::json!({})).await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        session.close().await;

        let result = tokio::time::timeout(Duration::from_secs(1), caller)
            .await
            .expect("caller must resolve after close")
            .unwrap();
        assert!(matches!(result.unwrap_err(), SessionError::Closed));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn transport_eof_closes_session_and_wakes_caller() {
        let (client, peer) = DuplexTransport::pair();
        // Peer answers the handshake, then dies on the first tools/call,
        // dropping its end of the pipe.
        tokio::spawn(async move {
            while let Ok(frame) = peer.receive().await {
                let value: Value = serde_json::from_str(&frame).unwrap();
                let Some(id) = value.get("id").and_then(Value::as_u64) else { continue };
                let method = value.get("method").and_then(Value::as_str).unwrap_or("");
                if method == "tools/call" {
                    return; // peer crash
                }
                let resp = serde_json::json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": { "protocolVersion": protocol::PROTOCOL_VERSION }
                });
                let _ = peer.send(&resp.to_string()).await;
            }
        });

        let session = Arc::new(Session::connect(Arc::new(client), &test_config()));
        session.initialize().await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            session.call_tool("add", serde_json::json!({})),
        )
        .await
        .expect("caller must resolve after transport failure");
        assert!(matches!(result.unwrap_err(), SessionError::Closed));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn call_after_close_is_a_state_error() {
        let (client, peer) = DuplexTransport::pair();
        spawn_peer(peer, &[]);
        let session = Session::connect(Arc::new(client), &test_config());
        session.initialize().await.unwrap();
        session.close().await;

        assert!(matches!(
            session.call_tool("add", serde_json::json!({})).await.unwrap_err(),
            SessionError::InvalidState { op: "call_tool", state: SessionState::Closed }
        ));
    }
}
