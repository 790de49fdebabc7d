// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the fleetmux service.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all service routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Supervisor surface (no auth)
        .route("/health", get(http::health))
        .route("/metrics", get(http::metrics))
        // Command lifecycle
        .route("/v1/command", post(http::submit_command).get(http::list_commands))
        .route("/v1/command/{id}", get(http::get_command))
        .route("/v1/command/{id}/cancel", post(http::cancel_command))
        // Robot registry
        .route("/v1/robots", get(http::list_robots))
        .route("/v1/robots/register", post(http::register_robot))
        .route("/v1/robots/heartbeat", post(http::robot_heartbeat))
        .route("/v1/robots/{id}", delete(http::deregister_robot))
        // Event stream
        .route("/v1/events", get(ws::events_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
