// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-local counters and gauges, rendered in Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::queue::QueueDepth;

/// Monotonic counters for the command pipeline.
///
/// All counters are relaxed atomics; exact cross-counter consistency is not
/// needed for scrape output.
#[derive(Debug, Default)]
pub struct Metrics {
    pub commands_submitted: AtomicU64,
    pub enqueued: AtomicU64,
    pub dequeued: AtomicU64,
    pub acked: AtomicU64,
    pub nacked: AtomicU64,
    pub retries: AtomicU64,
    pub errors: AtomicU64,
    pub auth_failures: AtomicU64,
    pub events_published: AtomicU64,
    pub workers_busy: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Render the scrape body for `GET /metrics`.
    pub fn render(&self, depth: &QueueDepth, robots_online: usize, ready: bool) -> String {
        let mut out = String::with_capacity(1024);

        let counters: [(&str, &AtomicU64); 9] = [
            ("fleetmux_commands_submitted_total", &self.commands_submitted),
            ("fleetmux_queue_enqueued_total", &self.enqueued),
            ("fleetmux_queue_dequeued_total", &self.dequeued),
            ("fleetmux_queue_acked_total", &self.acked),
            ("fleetmux_queue_nacked_total", &self.nacked),
            ("fleetmux_dispatch_retries_total", &self.retries),
            ("fleetmux_dispatch_errors_total", &self.errors),
            ("fleetmux_auth_failures_total", &self.auth_failures),
            ("fleetmux_events_published_total", &self.events_published),
        ];
        for (name, counter) in counters {
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {}", Self::get(counter));
        }

        let _ = writeln!(out, "# TYPE fleetmux_queue_depth gauge");
        for (band, count) in [
            ("low", depth.low),
            ("normal", depth.normal),
            ("high", depth.high),
            ("urgent", depth.urgent),
        ] {
            let _ = writeln!(out, "fleetmux_queue_depth{{band=\"{band}\"}} {count}");
        }
        let _ = writeln!(out, "# TYPE fleetmux_queue_depth_total gauge");
        let _ = writeln!(out, "fleetmux_queue_depth_total {}", depth.total);

        let _ = writeln!(out, "# TYPE fleetmux_workers_busy gauge");
        let _ = writeln!(out, "fleetmux_workers_busy {}", Self::get(&self.workers_busy));

        let _ = writeln!(out, "# TYPE fleetmux_robots_online gauge");
        let _ = writeln!(out, "fleetmux_robots_online {robots_online}");

        let _ = writeln!(out, "# TYPE fleetmux_ready gauge");
        let _ = writeln!(out, "fleetmux_ready {}", u8::from(ready));

        out
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
