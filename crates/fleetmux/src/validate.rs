// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envelope validation: structural checks, per-action param schemas, and
//! target resolution. Produces the canonicalized internal message or a typed
//! error; nothing here touches the network.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::Config;
use crate::error::{CommandError, ErrorCode};
use crate::model::{CommandMsg, Envelope};
use crate::registry::RobotRegistry;
use crate::store::CommandStore;

/// Hard ceiling on `command.timeout_ms`.
pub const MAX_TIMEOUT_MS: u64 = 300_000;

fn action_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+$").unwrap()
    })
}

// -- Param schemas ------------------------------------------------------------

/// JSON kind expected for a param field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl ParamKind {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }
}

/// Structural schema for one action's params: required and optional fields,
/// each with an expected kind. Unknown extra fields pass through untouched.
#[derive(Debug, Clone, Default)]
pub struct ActionSchema {
    required: Vec<(String, ParamKind)>,
    optional: Vec<(String, ParamKind)>,
}

impl ActionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: ParamKind) -> Self {
        self.required.push((name.to_owned(), kind));
        self
    }

    pub fn optional(mut self, name: &str, kind: ParamKind) -> Self {
        self.optional.push((name.to_owned(), kind));
        self
    }

    fn check(&self, action: &str, params: &serde_json::Value) -> Result<(), CommandError> {
        let obj = params.as_object().ok_or_else(|| {
            CommandError::new(ErrorCode::Validation, "command.params must be an object")
        })?;

        for (name, kind) in &self.required {
            match obj.get(name) {
                None => {
                    return Err(CommandError::new(
                        ErrorCode::Validation,
                        format!("missing required param '{name}' for {action}"),
                    )
                    .with_details(serde_json::json!({"param": name, "action": action})));
                }
                Some(v) if !kind.matches(v) => {
                    return Err(param_kind_error(action, name, *kind));
                }
                Some(_) => {}
            }
        }
        for (name, kind) in &self.optional {
            if let Some(v) = obj.get(name) {
                if !v.is_null() && !kind.matches(v) {
                    return Err(param_kind_error(action, name, *kind));
                }
            }
        }
        Ok(())
    }
}

fn param_kind_error(action: &str, name: &str, kind: ParamKind) -> CommandError {
    CommandError::new(
        ErrorCode::Validation,
        format!("param '{name}' for {action} must be a {}", kind.as_str()),
    )
    .with_details(serde_json::json!({"param": name, "expected": kind.as_str()}))
}

/// Per-action schema table, sealed before the service starts.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    schemas: HashMap<String, ActionSchema>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in robot action set.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "robot.move",
            ActionSchema::new()
                .required("x", ParamKind::Number)
                .required("y", ParamKind::Number)
                .optional("speed", ParamKind::Number)
                .optional("heading", ParamKind::Number),
        );
        registry.register("robot.stop", ActionSchema::new().optional("reason", ParamKind::String));
        registry.register(
            "robot.say",
            ActionSchema::new()
                .required("text", ParamKind::String)
                .optional("volume", ParamKind::Number),
        );
        registry.register("robot.home", ActionSchema::new());
        registry
            .register("robot.set_speed", ActionSchema::new().required("speed", ParamKind::Number));
        registry
    }

    pub fn register(&mut self, action: &str, schema: ActionSchema) {
        self.schemas.insert(action.to_owned(), schema);
    }

    pub fn get(&self, action: &str) -> Option<&ActionSchema> {
        self.schemas.get(action)
    }

    pub fn known_actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }
}

// -- Envelope validation ------------------------------------------------------

/// Parse a raw JSON body into an [`Envelope`], mapping serde failures into
/// the uniform validation error.
pub fn parse_envelope(value: serde_json::Value) -> Result<Envelope, CommandError> {
    serde_json::from_value(value).map_err(|e| {
        CommandError::new(ErrorCode::Validation, format!("malformed envelope: {e}"))
    })
}

/// Validate an envelope and promote it to the canonical internal message.
///
/// Checks run cheapest-first; the duplicate-id check is repeated atomically
/// at store insert, so a pass here is only advisory under concurrency.
pub async fn validate(
    envelope: Envelope,
    actions: &ActionRegistry,
    registry: &RobotRegistry,
    store: &CommandStore,
    config: &Config,
) -> Result<CommandMsg, CommandError> {
    let spec = &envelope.command;

    if spec.id.trim().is_empty() {
        return Err(CommandError::new(ErrorCode::Validation, "command.id must not be empty"));
    }

    if !action_name_re().is_match(&spec.action) {
        return Err(CommandError::new(
            ErrorCode::Validation,
            format!("command.type '{}' is not a dotted action name", spec.action),
        ));
    }

    if spec.target.robot_id.trim().is_empty() {
        return Err(CommandError::new(
            ErrorCode::Validation,
            "command.target.robot_id must not be empty",
        ));
    }

    // Only trace_id carries a generated-if-absent exception; timestamp and
    // priority must be present.
    let Some(timestamp) = envelope.timestamp else {
        return Err(CommandError::new(ErrorCode::Validation, "timestamp is required"));
    };
    let Some(priority) = spec.priority else {
        return Err(CommandError::new(ErrorCode::Validation, "command.priority is required"));
    };

    let trace_id = match envelope.trace_id {
        Some(raw) => {
            let parsed = uuid::Uuid::parse_str(&raw).map_err(|_| {
                CommandError::new(ErrorCode::Validation, "trace_id must be a UUID")
                    .with_details(serde_json::json!({"trace_id": raw}))
            })?;
            parsed.to_string()
        }
        None => uuid::Uuid::new_v4().to_string(),
    };

    let timeout_ms = spec.timeout_ms.unwrap_or(config.default_timeout_ms);
    if timeout_ms == 0 || timeout_ms > MAX_TIMEOUT_MS {
        return Err(CommandError::new(
            ErrorCode::Validation,
            format!("command.timeout_ms must be in [1, {MAX_TIMEOUT_MS}]"),
        )
        .with_details(serde_json::json!({"timeout_ms": timeout_ms})));
    }

    let schema = actions.get(&spec.action).ok_or_else(|| {
        CommandError::new(ErrorCode::ActionInvalid, format!("unknown action '{}'", spec.action))
            .with_details(serde_json::json!({
                "action": spec.action,
                "known_actions": actions.known_actions(),
            }))
    })?;
    schema.check(&spec.action, &spec.params)?;

    if config.strict_target_check {
        let robot = registry.get(&spec.target.robot_id).await.ok_or_else(|| {
            CommandError::new(
                ErrorCode::RobotNotFound,
                format!("robot '{}' is not registered", spec.target.robot_id),
            )
            .with_details(serde_json::json!({"robot_id": spec.target.robot_id}))
        })?;
        if !robot.capabilities.contains(&spec.action) {
            return Err(CommandError::new(
                ErrorCode::ActionInvalid,
                format!("robot '{}' does not support '{}'", robot.robot_id, spec.action),
            )
            .with_details(serde_json::json!({
                "robot_id": robot.robot_id,
                "action": spec.action,
            })));
        }
    }

    if store.contains(&spec.id).await {
        return Err(CommandError::new(ErrorCode::Validation, "duplicate command id")
            .with_details(serde_json::json!({
                "reason": "duplicate_command_id",
                "command_id": spec.id,
            })));
    }

    let id = spec.id.clone();
    let action = spec.action.clone();
    let robot_id = spec.target.robot_id.clone();
    let params = spec.params.clone();

    Ok(CommandMsg {
        trace_id,
        timestamp,
        actor: envelope.actor,
        source: envelope.source,
        id,
        action,
        robot_id,
        params,
        timeout_ms,
        priority,
        labels: envelope.labels,
        enqueued_at: chrono::Utc::now(),
        attempt_count: 0,
        max_retries: config.max_retries,
    })
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
