// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the fleetmux API.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{CommandError, ErrorCode};
use crate::events::{EventCategory, EventRecord, Severity};
use crate::metrics::Metrics;
use crate::model::{Actor, CommandState, Protocol, RobotStatus};
use crate::registry::RobotEntry;
use crate::state::AppState;
use crate::validate;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub version: String,
    pub queue: crate::queue::QueueDepth,
    pub robots: usize,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub command: SubmittedCommand,
    pub trace_id: String,
}

#[derive(Debug, Serialize)]
pub struct SubmittedCommand {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub command_id: String,
    pub state: CommandState,
    /// True when this call moved the record to `cancelled`. In-flight
    /// dispatches are aborted best-effort; poll the record for the outcome.
    pub cancelled: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancel_requested: bool,
}

#[derive(Debug, Deserialize)]
pub struct TraceQuery {
    pub trace_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RobotsQuery {
    #[serde(default)]
    pub status: Option<RobotStatus>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRobotRequest {
    pub robot_id: String,
    #[serde(default)]
    pub robot_type: String,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    #[serde(default = "default_status")]
    pub status: RobotStatus,
    pub endpoint: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Registering principal, checked against the `robot.register`
    /// capability. Defaults to the system actor.
    #[serde(default)]
    pub actor: Option<Actor>,
}

fn default_status() -> RobotStatus {
    RobotStatus::Online
}

#[derive(Debug, Serialize)]
pub struct RegisterRobotResponse {
    pub robot_id: String,
    pub registered: bool,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub robot_id: String,
    #[serde(default)]
    pub status: Option<RobotStatus>,
}

#[derive(Debug, Serialize)]
pub struct DeregisterResponse {
    pub robot_id: String,
    pub removed: bool,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<AppState>>) -> Response {
    let queue = s.queue.size().await;
    let robots = s.registry.online_count().await;
    let body = HealthResponse {
        status: if s.is_ready() { "healthy" } else { "starting" }.to_owned(),
        service: "fleetmux".to_owned(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        queue,
        robots,
    };
    let status =
        if s.is_ready() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body)).into_response()
}

/// `GET /metrics`
pub async fn metrics(State(s): State<Arc<AppState>>) -> Response {
    let depth = s.queue.size().await;
    let robots = s.registry.online_count().await;
    let body = s.metrics.render(&depth, robots, s.is_ready());
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

/// `POST /v1/command`
///
/// Validation and auth errors return synchronously; dispatch errors settle
/// on the record and surface through the status endpoint and the event bus.
pub async fn submit_command(
    State(s): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    Metrics::inc(&s.metrics.commands_submitted);
    // Best-effort trace for error bodies produced before validation.
    let raw_trace = body.get("trace_id").and_then(|t| t.as_str()).map(str::to_owned);

    let envelope = match validate::parse_envelope(body) {
        Ok(envelope) => envelope,
        Err(err) => return err.to_http_response(raw_trace.as_deref()),
    };

    let msg =
        match validate::validate(envelope, &s.actions, &s.registry, &s.store, &s.config).await {
            Ok(msg) => msg,
            Err(err) => return err.to_http_response(raw_trace.as_deref()),
        };

    let trace_id = msg.trace_id.clone();
    let command_id = msg.id.clone();

    if let Err(err) = s.store.insert(msg.clone()).await {
        return err.to_http_response(Some(&trace_id));
    }
    if let Err(err) = s.queue.enqueue(msg.clone()).await {
        // Free the command id again; the record never became queueable.
        s.store.remove(&command_id).await;
        return err.to_http_response(Some(&trace_id));
    }
    Metrics::inc(&s.metrics.enqueued);

    s.emit(
        EventRecord::new(Severity::Info, EventCategory::Audit, "command.accepted")
            .with_trace(&trace_id)
            .with_context(serde_json::json!({
                "command_id": command_id,
                "robot_id": msg.robot_id,
                "action": msg.action,
                "priority": msg.priority.as_str(),
                "actor": msg.actor,
                "source": msg.source,
            })),
    );

    (
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            command: SubmittedCommand { id: command_id, status: "pending".to_owned() },
            trace_id,
        }),
    )
        .into_response()
}

/// `GET /v1/command/{id}`
pub async fn get_command(State(s): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match s.store.get(&id).await {
        Some(record) => Json(record).into_response(),
        None => unknown_command(&id),
    }
}

/// `GET /v1/command?trace_id=...`
pub async fn list_commands(
    State(s): State<Arc<AppState>>,
    Query(query): Query<TraceQuery>,
) -> Response {
    let commands = s.store.find_by_trace(&query.trace_id).await;
    Json(serde_json::json!({
        "trace_id": query.trace_id,
        "commands": commands,
    }))
    .into_response()
}

/// `POST /v1/command/{id}/cancel`
///
/// Pending commands are removed from the queue and cancelled here; running
/// commands get their dispatch aborted and settle when the worker observes
/// the signal. Terminal records are a no-op reporting the current state.
pub async fn cancel_command(State(s): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Some(record) = s.store.get(&id).await else {
        return unknown_command(&id);
    };

    if record.state.is_terminal() {
        return Json(CancelResponse {
            command_id: id,
            state: record.state,
            cancelled: false,
            cancel_requested: false,
        })
        .into_response();
    }

    s.emit(
        EventRecord::new(Severity::Info, EventCategory::Audit, "command.cancel_requested")
            .with_trace(&record.msg.trace_id)
            .with_context(serde_json::json!({"command_id": id, "state": record.state})),
    );

    // Waiting in a band or parked for a retry: take it out of the queue and
    // settle it directly.
    if s.queue.remove(&id).await.is_some() {
        s.clear_cancel_token(&id).await;
        match s.store.update_state(&id, CommandState::Cancelled, None, None).await {
            Ok(updated) => {
                s.emit_command(
                    Severity::Info,
                    &updated.msg.trace_id,
                    "command.cancelled",
                    serde_json::json!({"command_id": id, "robot_id": updated.msg.robot_id}),
                );
                return Json(CancelResponse {
                    command_id: id,
                    state: CommandState::Cancelled,
                    cancelled: true,
                    cancel_requested: false,
                })
                .into_response();
            }
            Err(err) => return err.to_http_response(Some(&record.msg.trace_id)),
        }
    }

    // In a worker's hands: signal the dispatch to abort, best-effort.
    s.dispatch_cancel_token(&id).await.cancel();
    let state_now = s.store.get(&id).await.map_or(record.state, |r| r.state);
    Json(CancelResponse {
        command_id: id,
        state: state_now,
        cancelled: state_now == CommandState::Cancelled,
        cancel_requested: state_now != CommandState::Cancelled,
    })
    .into_response()
}

/// `GET /v1/robots`
pub async fn list_robots(
    State(s): State<Arc<AppState>>,
    Query(query): Query<RobotsQuery>,
) -> Response {
    let robots = s.registry.list(query.status).await;
    Json(serde_json::json!({
        "count": robots.len(),
        "robots": robots,
    }))
    .into_response()
}

/// `POST /v1/robots/register`
pub async fn register_robot(
    State(s): State<Arc<AppState>>,
    Json(req): Json<RegisterRobotRequest>,
) -> Response {
    let actor = req.actor.clone().unwrap_or_else(Actor::system);
    if !(s.permissions)(&actor, "robot.register") {
        return CommandError::new(ErrorCode::Unauthorized, "permission denied: robot.register")
            .to_http_response(None);
    }

    if req.robot_id.trim().is_empty() || req.endpoint.trim().is_empty() {
        return CommandError::new(ErrorCode::Validation, "robot_id and endpoint are required")
            .to_http_response(None);
    }

    let entry = RobotEntry {
        robot_id: req.robot_id.clone(),
        robot_type: req.robot_type,
        capabilities: req.capabilities,
        status: req.status,
        endpoint: req.endpoint,
        protocol: req.protocol,
        last_heartbeat: Utc::now(),
        auth_token: req.auth_token,
        metadata: req.metadata,
    };
    let created = s.registry.register(entry).await;

    s.emit(
        EventRecord::new(Severity::Info, EventCategory::Robot, "robot.registered")
            .with_context(serde_json::json!({
                "robot_id": req.robot_id,
                "created": created,
                "actor": actor,
            })),
    );

    Json(RegisterRobotResponse { robot_id: req.robot_id, registered: true, created })
        .into_response()
}

/// `POST /v1/robots/heartbeat`
pub async fn robot_heartbeat(
    State(s): State<Arc<AppState>>,
    Json(req): Json<HeartbeatRequest>,
) -> Response {
    match s.registry.heartbeat(&req.robot_id, req.status).await {
        Ok(entry) => Json(serde_json::json!({
            "robot_id": entry.robot_id,
            "status": entry.status,
            "last_heartbeat": entry.last_heartbeat,
        }))
        .into_response(),
        Err(err) => err.to_http_response(None),
    }
}

/// `DELETE /v1/robots/{id}`
pub async fn deregister_robot(State(s): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let removed = s.registry.deregister(&id).await;
    if removed {
        s.emit(
            EventRecord::new(Severity::Info, EventCategory::Robot, "robot.deregistered")
                .with_context(serde_json::json!({"robot_id": id})),
        );
    }
    Json(DeregisterResponse { robot_id: id, removed }).into_response()
}

// -- Helpers ------------------------------------------------------------------

fn unknown_command(id: &str) -> Response {
    let body = CommandError::new(ErrorCode::Validation, "unknown command id")
        .with_details(serde_json::json!({"command_id": id}))
        .to_body(None);
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}
