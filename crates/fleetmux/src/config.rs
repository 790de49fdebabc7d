// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the fleetmux service.
///
/// Every knob is settable as a flag or an environment variable; the env names
/// form the supervisor contract.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "fleetmux", about = "Robot command middleware")]
pub struct Config {
    /// Host to bind on. The service is local-only by contract.
    #[arg(long, default_value = "127.0.0.1", env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 5000, env = "PORT")]
    pub port: u16,

    /// Bearer token shared with the supervisor. Required, minimum 16 chars.
    #[arg(long, env = "APP_TOKEN", hide_env_values = true)]
    pub app_token: Option<String>,

    /// Maximum queued commands across all priority bands.
    #[arg(long, default_value_t = 1000, env = "QUEUE_MAX_SIZE")]
    pub queue_max_size: usize,

    /// Number of dispatch workers.
    #[arg(long, default_value_t = 5, env = "MAX_WORKERS")]
    pub max_workers: usize,

    /// Worker dequeue poll timeout in milliseconds.
    #[arg(long, default_value_t = 100, env = "POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,

    /// Default per-command timeout in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "DEFAULT_TIMEOUT_MS")]
    pub default_timeout_ms: u64,

    /// Maximum dispatch retries after the initial attempt.
    #[arg(long, default_value_t = 3, env = "MAX_RETRIES")]
    pub max_retries: u32,

    /// Seconds without a heartbeat before a robot is marked offline.
    #[arg(long, default_value_t = 120, env = "HEARTBEAT_TIMEOUT_S")]
    pub heartbeat_timeout_s: u64,

    /// Seconds to wait for in-flight commands on shutdown.
    #[arg(long, default_value_t = 10, env = "SHUTDOWN_GRACE_S")]
    pub shutdown_grace_s: u64,

    /// Seconds a terminal record stays in the store before eviction.
    #[arg(long, default_value_t = 3600, env = "STORE_TTL_S")]
    pub store_ttl_s: u64,

    /// MQTT broker address (`host:port`) for robots registered with the
    /// `mqtt` protocol; their registry endpoint is the topic.
    #[arg(long, default_value = "127.0.0.1:1883", env = "MQTT_BROKER")]
    pub mqtt_broker: String,

    /// Reject submissions whose target robot is not registered.
    #[arg(
        long,
        default_value_t = true,
        env = "STRICT_TARGET_CHECK",
        action = clap::ArgAction::Set
    )]
    pub strict_target_check: bool,
}

impl Config {
    /// Validate the supervisor-provided token. Absent or short tokens are a
    /// startup failure (exit code 2).
    pub fn token(&self) -> Result<&str, &'static str> {
        match self.app_token.as_deref() {
            None => Err("APP_TOKEN is not set"),
            Some(t) if t.len() < 16 => Err("APP_TOKEN must be at least 16 characters"),
            Some(t) => Ok(t),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_s)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_s)
    }

    pub fn store_ttl(&self) -> Duration {
        Duration::from_secs(self.store_ttl_s)
    }
}
