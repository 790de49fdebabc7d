// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error codes for the fleetmux API and dispatch pipeline.
///
/// The string forms are part of the wire contract; clients and robots match
/// on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Validation,
    Unauthorized,
    Routing,
    RobotNotFound,
    RobotOffline,
    RobotBusy,
    ActionInvalid,
    Protocol,
    Timeout,
    QueueFull,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Unauthorized => 401,
            Self::Routing => 502,
            Self::RobotNotFound => 404,
            Self::RobotOffline => 503,
            Self::RobotBusy => 409,
            Self::ActionInvalid => 400,
            Self::Protocol => 502,
            Self::Timeout => 504,
            Self::QueueFull => 503,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ERR_VALIDATION",
            Self::Unauthorized => "ERR_UNAUTHORIZED",
            Self::Routing => "ERR_ROUTING",
            Self::RobotNotFound => "ERR_ROBOT_NOT_FOUND",
            Self::RobotOffline => "ERR_ROBOT_OFFLINE",
            Self::RobotBusy => "ERR_ROBOT_BUSY",
            Self::ActionInvalid => "ERR_ACTION_INVALID",
            Self::Protocol => "ERR_PROTOCOL",
            Self::Timeout => "ERR_TIMEOUT",
            Self::QueueFull => "ERR_QUEUE_FULL",
            Self::Internal => "ERR_INTERNAL",
        }
    }

    /// Parse a wire code reported by a robot back into the taxonomy.
    /// Unknown codes collapse to `Protocol` so they stay retriable.
    pub fn from_wire(code: &str) -> Self {
        match code {
            "ERR_VALIDATION" => Self::Validation,
            "ERR_UNAUTHORIZED" => Self::Unauthorized,
            "ERR_ROUTING" => Self::Routing,
            "ERR_ROBOT_NOT_FOUND" => Self::RobotNotFound,
            "ERR_ROBOT_OFFLINE" => Self::RobotOffline,
            "ERR_ROBOT_BUSY" => Self::RobotBusy,
            "ERR_ACTION_INVALID" => Self::ActionInvalid,
            "ERR_PROTOCOL" => Self::Protocol,
            "ERR_TIMEOUT" => Self::Timeout,
            "ERR_QUEUE_FULL" => Self::QueueFull,
            _ => Self::Protocol,
        }
    }

    /// Whether the worker may retry a dispatch that failed with this code.
    pub fn retriable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Protocol | Self::RobotOffline)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed error carried as a value across component boundaries.
#[derive(Debug, Clone)]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Build the uniform wire body, attaching the originating trace id.
    pub fn to_body(&self, trace_id: Option<&str>) -> ErrorBody {
        ErrorBody {
            code: self.code.as_str().to_owned(),
            message: self.message.clone(),
            details: self.details.clone().unwrap_or(serde_json::Value::Null),
            trace_id: trace_id.map(str::to_owned),
        }
    }

    /// Build the HTTP response for this error, using the canonical status
    /// for the code. `ERR_QUEUE_FULL` carries a `Retry-After` hint.
    pub fn to_http_response(&self, trace_id: Option<&str>) -> Response {
        let status = StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut resp = (status, Json(self.to_body(trace_id))).into_response();
        if self.code == ErrorCode::QueueFull {
            if let Ok(v) = "1".parse() {
                resp.headers_mut().insert("retry-after", v);
            }
        }
        resp
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommandError {}

/// Uniform error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
