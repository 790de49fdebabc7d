// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token authentication shared with the supervisor process.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{CommandError, ErrorCode};
use crate::events::{EventCategory, EventRecord, Severity};
use crate::metrics::Metrics;
use crate::state::AppState;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), CommandError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            CommandError::new(ErrorCode::Unauthorized, "Missing Authorization header")
        })?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| CommandError::new(ErrorCode::Unauthorized, "Invalid token"))?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(CommandError::new(ErrorCode::Unauthorized, "Invalid token"))
    }
}

/// Validate a token from a WebSocket query string (`?token=...`).
pub fn validate_ws_query(query: &str, expected: Option<&str>) -> Result<(), CommandError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            if constant_time_eq(value, expected) {
                return Ok(());
            }
        }
    }

    Err(CommandError::new(ErrorCode::Unauthorized, "Invalid token"))
}

/// Axum middleware that enforces Bearer token authentication.
///
/// Exempt: `/health` and `/metrics` (supervisor and scrapers). The event
/// stream upgrade also passes here; it accepts the header or a `?token=`
/// query param, checked in its own handler.
pub async fn auth_layer(
    state: State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/health" || path == "/metrics" || path == "/v1/events" {
        return next.run(req).await;
    }

    if let Err(err) = validate_bearer(req.headers(), state.auth_token.as_deref()) {
        Metrics::inc(&state.metrics.auth_failures);
        state.emit(
            EventRecord::new(Severity::Warn, EventCategory::Auth, "auth.rejected")
                .with_context(serde_json::json!({"path": path, "reason": err.message})),
        );
        return err.to_http_response(None);
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
