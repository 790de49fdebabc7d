// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event stream endpoint: fans lifecycle and audit events out to WebSocket
//! subscribers, one JSON event per text frame.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::events::{EventCategory, EventFilter, EventRecord, Severity};
use crate::state::AppState;
use crate::transport::auth;

/// Query parameters for the event stream.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Auth token, for clients that cannot set headers on upgrade.
    pub token: Option<String>,
    /// Comma-separated categories; empty subscribes to all.
    #[serde(default)]
    pub category: String,
    /// Restrict the stream to a single trace.
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// `GET /v1/events`: WebSocket upgrade for the event bus.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    // Accept the bearer header or a token query param.
    let authed = auth::validate_bearer(&headers, state.auth_token.as_deref()).is_ok() || {
        let query_str = query.token.as_ref().map(|t| format!("token={t}")).unwrap_or_default();
        auth::validate_ws_query(&query_str, state.auth_token.as_deref()).is_ok()
    };
    if !authed {
        crate::metrics::Metrics::inc(&state.metrics.auth_failures);
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unauthorized"))
            .unwrap_or_default()
            .into_response();
    }

    let filter = EventFilter::new(&query.category, query.trace_id.as_deref());
    ws.on_upgrade(move |socket| handle_events_connection(state, filter, socket))
        .into_response()
}

/// Per-connection forwarding loop.
///
/// A subscriber that lags past the per-subscriber buffer is dropped; the
/// remaining subscribers see a WARN event about it.
async fn handle_events_connection(state: Arc<AppState>, filter: EventFilter, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = state.events.subscribe();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            event = events.recv() => {
                let event = match event {
                    Ok(e) => e,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "dropping slow event subscriber");
                        state.emit(
                            EventRecord::new(
                                Severity::Warn,
                                EventCategory::Audit,
                                "events.subscriber_dropped",
                            )
                            .with_context(serde_json::json!({"missed": missed})),
                        );
                        break;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if filter.wants(&event) {
                    if let Ok(json) = serde_json::to_string(&event) {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    // The stream is one-way; client frames are ignored.
                    _ => {}
                }
            }
        }
    }
}
