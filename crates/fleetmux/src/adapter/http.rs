// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP dispatch: POST the wire payload to the robot's endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::ErrorCode;
use crate::model::CommandMsg;

use super::{wire_payload, DispatchError, DispatchTarget, RobotAdapter};

/// HTTP adapter. One pooled client, safe to share across workers.
pub struct HttpAdapter {
    client: Client,
}

impl HttpAdapter {
    pub fn new() -> Self {
        // Connect timeout only; the per-request deadline comes from the
        // command and is applied per dispatch.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RobotAdapter for HttpAdapter {
    async fn dispatch(
        &self,
        msg: &CommandMsg,
        target: &DispatchTarget,
        timeout: Duration,
    ) -> Result<serde_json::Value, DispatchError> {
        let mut req = self.client.post(&target.endpoint).timeout(timeout).json(&wire_payload(msg));
        if let Some(token) = &target.auth_token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(classify_transport)?;
        let status = resp.status();

        if status.is_success() {
            let bytes = resp.bytes().await.map_err(classify_transport)?;
            if bytes.is_empty() {
                return Ok(serde_json::Value::Null);
            }
            return serde_json::from_slice(&bytes).map_err(|e| {
                DispatchError::new(ErrorCode::Protocol, format!("unparseable robot reply: {e}"))
            });
        }

        let body = resp.text().await.unwrap_or_default();
        let code = match status.as_u16() {
            401 | 403 => ErrorCode::Unauthorized,
            409 => ErrorCode::RobotBusy,
            400..=499 => ErrorCode::ActionInvalid,
            _ => ErrorCode::Protocol,
        };
        Err(DispatchError::new(code, format!("robot returned {status}: {body}")))
    }
}

/// Map reqwest transport failures onto the taxonomy.
fn classify_transport(err: reqwest::Error) -> DispatchError {
    if err.is_timeout() {
        DispatchError::new(ErrorCode::Timeout, "robot did not respond before the deadline")
    } else {
        DispatchError::new(ErrorCode::Protocol, format!("transport failure: {err}"))
    }
}
