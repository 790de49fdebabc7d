// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket dispatch: one connection per robot endpoint, opened on demand,
//! closed after an idle period. Replies are multiplexed over the single
//! connection and routed back to callers by command id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::model::CommandMsg;

use super::{parse_reply, wire_payload, DispatchError, DispatchTarget, RobotAdapter};

/// Idle period after which a robot connection is closed.
const IDLE_CLOSE: Duration = Duration::from_secs(60);
/// How often the connection task checks for idleness.
const IDLE_SWEEP: Duration = Duration::from_secs(10);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>>;

struct WsConn {
    /// Writes funnel through the connection task, one frame at a time.
    outgoing: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    last_used: Mutex<tokio::time::Instant>,
    cancel: CancellationToken,
}

/// WebSocket adapter with a per-endpoint connection pool.
pub struct WsAdapter {
    conns: Mutex<HashMap<String, Arc<WsConn>>>,
}

impl WsAdapter {
    pub fn new() -> Self {
        Self { conns: Mutex::new(HashMap::new()) }
    }

    /// Return the live connection for an endpoint, dialing if needed.
    /// The pool lock is never held across the dial.
    async fn ensure_conn(&self, endpoint: &str) -> Result<Arc<WsConn>, DispatchError> {
        {
            let mut conns = self.conns.lock().await;
            if let Some(conn) = conns.get(endpoint) {
                if !conn.cancel.is_cancelled() {
                    return Ok(Arc::clone(conn));
                }
                conns.remove(endpoint);
            }
        }

        let (stream, _) = connect_async(endpoint).await.map_err(|e| {
            DispatchError::new(ErrorCode::Protocol, format!("websocket connect: {e}"))
        })?;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(WsConn {
            outgoing: outgoing_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            last_used: Mutex::new(tokio::time::Instant::now()),
            cancel: CancellationToken::new(),
        });

        {
            let mut conns = self.conns.lock().await;
            // A concurrent dial for the same endpoint may have won; keep the
            // established one and let our fresh stream drop.
            if let Some(existing) = conns.get(endpoint) {
                if !existing.cancel.is_cancelled() {
                    return Ok(Arc::clone(existing));
                }
            }
            conns.insert(endpoint.to_owned(), Arc::clone(&conn));
        }

        tokio::spawn(run_conn(stream, outgoing_rx, Arc::clone(&conn), endpoint.to_owned()));
        Ok(conn)
    }

    /// Close every pooled connection. Called once during shutdown.
    pub async fn close_all(&self) {
        let mut conns = self.conns.lock().await;
        for (_, conn) in conns.drain() {
            conn.cancel.cancel();
        }
    }
}

impl Default for WsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RobotAdapter for WsAdapter {
    async fn dispatch(
        &self,
        msg: &CommandMsg,
        target: &DispatchTarget,
        timeout: Duration,
    ) -> Result<serde_json::Value, DispatchError> {
        let conn = self.ensure_conn(&target.endpoint).await?;
        *conn.last_used.lock().await = tokio::time::Instant::now();

        let (tx, rx) = oneshot::channel();
        conn.pending.lock().await.insert(msg.id.clone(), tx);

        let body = wire_payload(msg).to_string();
        if conn.outgoing.send(body).is_err() {
            conn.pending.lock().await.remove(&msg.id);
            return Err(DispatchError::new(ErrorCode::Protocol, "websocket connection closed"));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => parse_reply(reply),
            Ok(Err(_)) => Err(DispatchError::new(
                ErrorCode::Protocol,
                "websocket connection lost awaiting reply",
            )),
            Err(_) => {
                conn.pending.lock().await.remove(&msg.id);
                Err(DispatchError::new(ErrorCode::Timeout, "no websocket reply before the deadline"))
            }
        }
    }
}

/// Per-connection task: writes outgoing frames, routes incoming replies by
/// command id, and closes the socket after the idle period.
async fn run_conn<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    conn: Arc<WsConn>,
    endpoint: String,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut source) = stream.split();
    let mut idle_timer = tokio::time::interval(IDLE_SWEEP);
    idle_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = conn.cancel.cancelled() => break,
            _ = idle_timer.tick() => {
                if conn.last_used.lock().await.elapsed() >= IDLE_CLOSE {
                    tracing::debug!(endpoint = %endpoint, "closing idle robot websocket");
                    break;
                }
            }
            frame = outgoing.recv() => {
                let Some(text) = frame else { break };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        route_reply(&conn.pending, text.as_str()).await;
                        *conn.last_used.lock().await = tokio::time::Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(endpoint = %endpoint, err = %e, "robot websocket error");
                        break;
                    }
                }
            }
        }
    }

    conn.cancel.cancel();
    let _ = sink.close().await;
    // Waiters learn about the closure through their dropped reply channels.
    conn.pending.lock().await.clear();
}

/// Route a reply frame to the waiter registered under its command id.
async fn route_reply(pending: &PendingMap, text: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        tracing::debug!("discarding unparseable websocket reply");
        return;
    };
    let key = value
        .get("command_id")
        .or_else(|| value.get("correlation_id"))
        .and_then(|c| c.as_str());
    let Some(command_id) = key else {
        tracing::debug!("discarding websocket reply without command_id");
        return;
    };
    if let Some(tx) = pending.lock().await.remove(command_id) {
        let _ = tx.send(value);
    }
}
