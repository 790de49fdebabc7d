// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MQTT dispatch: publish at QoS 1 to the robot's topic, await the reply on
//! a per-adapter reply topic, matched by correlation id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::model::CommandMsg;

use super::{parse_reply, wire_payload, DispatchError, DispatchTarget, RobotAdapter};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>>;

/// MQTT adapter. The broker connection is opened lazily on first dispatch
/// and shared by all workers; replies are demultiplexed by correlation id.
pub struct MqttAdapter {
    broker: String,
    handle: Mutex<Option<MqttHandle>>,
    cancel: CancellationToken,
}

struct MqttHandle {
    client: AsyncClient,
    pending: PendingMap,
    reply_topic: String,
}

impl MqttAdapter {
    pub fn new(broker: String) -> Self {
        Self { broker, handle: Mutex::new(None), cancel: CancellationToken::new() }
    }

    /// Connect to the broker and start the reply router if not yet running.
    async fn ensure_connected(&self) -> Result<(AsyncClient, PendingMap, String), DispatchError> {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.as_ref() {
            return Ok((handle.client.clone(), Arc::clone(&handle.pending), handle.reply_topic.clone()));
        }

        let (host, port) = split_broker(&self.broker)?;
        let client_id = format!("fleetmux-{}", uuid::Uuid::new_v4());
        // Reply topic unique per adapter instance so concurrent service
        // instances never steal each other's replies.
        let reply_topic = format!("fleetmux/reply/{client_id}");

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        client
            .subscribe(reply_topic.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| DispatchError::new(ErrorCode::Protocol, format!("mqtt subscribe: {e}")))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let router_pending = Arc::clone(&pending);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            route_reply(&router_pending, &publish.payload).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(err = %e, "mqtt event loop error, reconnecting");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        });

        *guard = Some(MqttHandle {
            client: client.clone(),
            pending: Arc::clone(&pending),
            reply_topic: reply_topic.clone(),
        });
        Ok((client, pending, reply_topic))
    }

    /// Tear down the broker connection. Pending waiters get a protocol error
    /// via their dropped channels.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            let _ = handle.client.disconnect().await;
            handle.pending.lock().await.clear();
        }
    }
}

#[async_trait]
impl RobotAdapter for MqttAdapter {
    async fn dispatch(
        &self,
        msg: &CommandMsg,
        target: &DispatchTarget,
        timeout: Duration,
    ) -> Result<serde_json::Value, DispatchError> {
        let (client, pending, reply_topic) = self.ensure_connected().await?;

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(msg.id.clone(), tx);

        let mut payload = wire_payload(msg);
        payload["correlation_id"] = serde_json::Value::String(msg.id.clone());
        payload["reply_to"] = serde_json::Value::String(reply_topic);
        let body = payload.to_string();

        if let Err(e) = client.publish(target.endpoint.as_str(), QoS::AtLeastOnce, false, body).await {
            pending.lock().await.remove(&msg.id);
            return Err(DispatchError::new(ErrorCode::Protocol, format!("mqtt publish: {e}")));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => parse_reply(reply),
            Ok(Err(_)) => {
                Err(DispatchError::new(ErrorCode::Protocol, "mqtt connection lost awaiting reply"))
            }
            Err(_) => {
                pending.lock().await.remove(&msg.id);
                Err(DispatchError::new(
                    ErrorCode::Timeout,
                    "no mqtt reply before the deadline",
                ))
            }
        }
    }
}

/// Route an incoming reply to the waiter registered under its correlation id.
async fn route_reply(pending: &PendingMap, payload: &[u8]) {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) else {
        tracing::debug!("discarding unparseable mqtt reply");
        return;
    };
    let Some(correlation_id) = value.get("correlation_id").and_then(|c| c.as_str()) else {
        tracing::debug!("discarding mqtt reply without correlation_id");
        return;
    };
    if let Some(tx) = pending.lock().await.remove(correlation_id) {
        let _ = tx.send(value);
    }
}

/// Split a `host:port` broker address; the port defaults to 1883.
fn split_broker(broker: &str) -> Result<(String, u16), DispatchError> {
    match broker.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_| {
                DispatchError::new(ErrorCode::Protocol, format!("bad mqtt broker port in '{broker}'"))
            })?;
            Ok((host.to_owned(), port))
        }
        None if !broker.is_empty() => Ok((broker.to_owned(), 1883)),
        _ => Err(DispatchError::new(
            ErrorCode::Protocol,
            format!("bad mqtt broker address '{broker}'"),
        )),
    }
}

#[cfg(test)]
#[path = "mqtt_tests.rs"]
mod tests;
