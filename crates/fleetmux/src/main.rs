// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use fleetmux::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    // One JSON object per line on stdout.
    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_env_filter(
            EnvFilter::try_from_env("FLEETMUX_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = config.token() {
        error!(service = "fleetmux", "startup failed: {e}");
        std::process::exit(2);
    }

    if let Err(e) = fleetmux::run(config).await {
        error!(service = "fleetmux", "fatal: {e:#}");
        std::process::exit(1);
    }
}
