// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Four-band priority queue with per-robot concurrency locks.
//!
//! Selection order is strict priority, FIFO within a band, with one
//! exception: a message whose target robot already holds the per-robot lock
//! is skipped so it cannot block work for other robots. Retried messages
//! wait in a delay set until their backoff expires, then rejoin their band.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::error::{CommandError, ErrorCode};
use crate::model::{CommandMsg, Priority};

/// Backoff base for the first retry.
const BACKOFF_BASE_MS: u64 = 200;
/// Upper bound on a single backoff delay, pre-jitter.
const BACKOFF_CAP_MS: u64 = 30_000;

/// Per-band and total queue occupancy. Delayed (backoff) messages count
/// toward their band and the total; in-flight messages do not.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueDepth {
    pub low: usize,
    pub normal: usize,
    pub high: usize,
    pub urgent: usize,
    pub total: usize,
}

/// Outcome of a nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// The message was re-enqueued; it becomes eligible after `delay`.
    Requeued { attempt: u32, delay: Duration },
    /// No retry: the caller must record the terminal failure.
    Terminal,
}

struct InFlight {
    msg: CommandMsg,
}

struct Delayed {
    ready_at: Instant,
    msg: CommandMsg,
}

struct QueueInner {
    bands: [VecDeque<CommandMsg>; 4],
    /// Messages waiting out a retry backoff, keyed by command id.
    delayed: HashMap<String, Delayed>,
    /// Dequeued messages not yet acked or nacked, keyed by command id.
    in_flight: HashMap<String, InFlight>,
    /// Robots with a command currently in flight.
    busy_robots: HashSet<String>,
    closed: bool,
}

impl QueueInner {
    fn waiting(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum::<usize>() + self.delayed.len()
    }

    /// Move delayed messages whose backoff expired back into their bands.
    fn promote_ready(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        let ready: Vec<String> = self
            .delayed
            .iter()
            .filter(|(_, d)| d.ready_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ready {
            if let Some(delayed) = self.delayed.remove(&id) {
                let mut msg = delayed.msg;
                msg.enqueued_at = chrono::Utc::now();
                self.bands[msg.priority.band()].push_back(msg);
            }
        }
    }

    /// Earliest backoff expiry among delayed messages.
    fn next_ready_at(&self) -> Option<Instant> {
        self.delayed.values().map(|d| d.ready_at).min()
    }

    /// Highest-priority message whose robot is free, removed from its band.
    fn pop_ready(&mut self) -> Option<CommandMsg> {
        for band in (0..4).rev() {
            let free_idx = {
                let busy = &self.busy_robots;
                self.bands[band].iter().position(|m| !busy.contains(&m.robot_id))
            };
            if let Some(idx) = free_idx {
                return self.bands[band].remove(idx);
            }
        }
        None
    }

    /// Same selection as [`pop_ready`], non-destructive.
    fn peek_ready(&self) -> Option<&CommandMsg> {
        for band in (0..4).rev() {
            if let Some(msg) =
                self.bands[band].iter().find(|m| !self.busy_robots.contains(&m.robot_id))
            {
                return Some(msg);
            }
        }
        None
    }
}

/// Bounded in-memory command queue.
pub struct CommandQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
    /// Woken on enqueue, ack, nack, and close.
    notify: Notify,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                bands: [VecDeque::new(), VecDeque::new(), VecDeque::new(), VecDeque::new()],
                delayed: HashMap::new(),
                in_flight: HashMap::new(),
                busy_robots: HashSet::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Add a message to its priority band. Rejects when the queue is at
    /// capacity or shutting down.
    pub async fn enqueue(&self, mut msg: CommandMsg) -> Result<(), CommandError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(CommandError::new(ErrorCode::Internal, "service is shutting down")
                .with_details(serde_json::json!({"reason": "shutting_down"})));
        }
        if inner.waiting() >= self.capacity {
            return Err(CommandError::new(ErrorCode::QueueFull, "command queue is full")
                .with_details(serde_json::json!({"capacity": self.capacity})));
        }
        msg.enqueued_at = chrono::Utc::now();
        inner.bands[msg.priority.band()].push_back(msg);
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Block up to `timeout` for the next dispatchable message.
    ///
    /// The returned message is tracked as in flight and its robot is locked
    /// until [`ack`](Self::ack) or [`nack`](Self::nack).
    pub async fn dequeue(&self, timeout: Duration) -> Option<CommandMsg> {
        let deadline = Instant::now() + timeout;
        loop {
            // Arm the wakeup before checking state so a concurrent enqueue
            // between the check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);

            let next_ready = {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return None;
                }
                inner.promote_ready(Instant::now());
                if let Some(msg) = inner.pop_ready() {
                    inner.busy_robots.insert(msg.robot_id.clone());
                    inner.in_flight.insert(msg.id.clone(), InFlight { msg: msg.clone() });
                    return Some(msg);
                }
                inner.next_ready_at()
            };

            // Wake early if a delayed message matures before the deadline.
            let wake_at = match next_ready {
                Some(ready) if ready < deadline => ready,
                _ => deadline,
            };
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {
                    if wake_at >= deadline {
                        return None;
                    }
                }
            }
        }
    }

    /// Next dispatchable message without removing it.
    pub async fn peek(&self) -> Option<CommandMsg> {
        let mut inner = self.inner.lock().await;
        inner.promote_ready(Instant::now());
        inner.peek_ready().cloned()
    }

    /// Release the per-robot lock and drop in-flight tracking.
    /// Returns false when the id was not in flight.
    pub async fn ack(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.in_flight.remove(id) else {
            return false;
        };
        inner.busy_robots.remove(&entry.msg.robot_id);
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    /// Fail an in-flight message.
    ///
    /// With `requeue` and retries remaining, the attempt count is bumped and
    /// the message parks in the delay set for an exponential backoff before
    /// rejoining its band. Otherwise the caller records the terminal failure.
    pub async fn nack(&self, id: &str, requeue: bool) -> NackOutcome {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.in_flight.remove(id) else {
            return NackOutcome::Terminal;
        };
        let mut msg = entry.msg;
        inner.busy_robots.remove(&msg.robot_id);

        let outcome = if !requeue || msg.attempt_count >= msg.max_retries || inner.closed {
            NackOutcome::Terminal
        } else {
            let delay = backoff_delay(msg.attempt_count);
            msg.attempt_count += 1;
            let attempt = msg.attempt_count;
            let id = msg.id.clone();
            inner.delayed.insert(id, Delayed { ready_at: Instant::now() + delay, msg });
            NackOutcome::Requeued { attempt, delay }
        };
        drop(inner);
        // Waiters recompute their wake-up against the new delay set, and a
        // freed robot may unblock a queued message.
        self.notify.notify_waiters();
        outcome
    }

    /// Remove a waiting or delayed message, for cancellation. In-flight
    /// messages are not touched.
    pub async fn remove(&self, id: &str) -> Option<CommandMsg> {
        let mut inner = self.inner.lock().await;
        for band in 0..4 {
            if let Some(idx) = inner.bands[band].iter().position(|m| m.id == id) {
                return inner.bands[band].remove(idx);
            }
        }
        inner.delayed.remove(id).map(|d| d.msg)
    }

    pub async fn size(&self) -> QueueDepth {
        let inner = self.inner.lock().await;
        let mut depth = QueueDepth {
            low: inner.bands[Priority::Low.band()].len(),
            normal: inner.bands[Priority::Normal.band()].len(),
            high: inner.bands[Priority::High.band()].len(),
            urgent: inner.bands[Priority::Urgent.band()].len(),
            total: 0,
        };
        for delayed in inner.delayed.values() {
            match delayed.msg.priority {
                Priority::Low => depth.low += 1,
                Priority::Normal => depth.normal += 1,
                Priority::High => depth.high += 1,
                Priority::Urgent => depth.urgent += 1,
            }
        }
        depth.total = depth.low + depth.normal + depth.high + depth.urgent;
        depth
    }

    pub async fn in_flight_count(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }

    /// Drop every waiting and delayed message.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        for band in inner.bands.iter_mut() {
            band.clear();
        }
        inner.delayed.clear();
    }

    /// Stop accepting work. Blocked dequeuers return `None`.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Empty the queue, handing back every waiting and delayed message so
    /// shutdown can cancel them.
    pub async fn drain(&self) -> Vec<CommandMsg> {
        let mut inner = self.inner.lock().await;
        let mut drained = Vec::with_capacity(inner.waiting());
        for band in (0..4).rev() {
            drained.extend(inner.bands[band].drain(..));
        }
        drained.extend(inner.delayed.drain().map(|(_, d)| d.msg));
        drained
    }
}

/// Delay before retry attempt `attempt_count + 1`: exponential from 200ms,
/// factor 2, capped at 30s, with a ±25% jitter.
pub fn backoff_delay(attempt_count: u32) -> Duration {
    let shift = attempt_count.min(16);
    let raw = BACKOFF_BASE_MS.saturating_mul(1u64 << shift).min(BACKOFF_CAP_MS);
    let jitter: f64 = rand::rng().random_range(0.75..=1.25);
    Duration::from_millis((raw as f64 * jitter) as u64)
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
