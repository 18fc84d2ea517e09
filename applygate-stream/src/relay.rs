//! Cross-instance event relay.
//!
//! Gateway instances are competing consumers on the status queue, so any
//! one broker delivery lands on exactly one instance. To let every
//! subscriber on every instance see every event, the receiving instance
//! republishes on a distributed pub/sub topic keyed by job id; each
//! instance listens and forwards foreign envelopes to its local hub.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use applygate_core::types::StatusEvent;

#[derive(Debug)]
pub struct RelayError(pub String);

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "relay error: {}", self.0)
    }
}

impl std::error::Error for RelayError {}

/// A status event stamped with the originating instance so instances can
/// skip their own copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub origin: Uuid,
    pub event: StatusEvent,
}

pub type RelaySink = Arc<dyn Fn(RelayEnvelope) + Send + Sync>;

pub trait EventRelay: Send + Sync + 'static {
    fn publish(
        &self,
        envelope: &RelayEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>>;

    /// Deliver incoming envelopes to `sink` until cancelled.
    fn run(
        &self,
        sink: RelaySink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>>;
}

// ---------------------------------------------------------------------------
// In-memory relay (single instance, tests)
// ---------------------------------------------------------------------------

pub struct InMemoryRelay {
    tx: tokio::sync::broadcast::Sender<RelayEnvelope>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(256);
        Self { tx }
    }
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRelay for InMemoryRelay {
    fn publish(
        &self,
        envelope: &RelayEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        let envelope = envelope.clone();
        Box::pin(async move {
            // No subscribers is fine; same as an empty topic.
            let _ = self.tx.send(envelope);
            Ok(())
        })
    }

    fn run(
        &self,
        sink: RelaySink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        let mut rx = self.tx.subscribe();
        Box::pin(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    received = rx.recv() => match received {
                        Ok(envelope) => sink(envelope),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "in-memory relay lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
                    },
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Redis pub/sub relay
// ---------------------------------------------------------------------------

const TOPIC_PREFIX: &str = "jobs:events:";

pub struct RedisRelay {
    client: redis::Client,
    publish_conn: redis::aio::ConnectionManager,
}

impl RedisRelay {
    pub fn new(client: redis::Client, publish_conn: redis::aio::ConnectionManager) -> Self {
        Self { client, publish_conn }
    }

    fn topic(job_id: Uuid) -> String {
        format!("{TOPIC_PREFIX}{job_id}")
    }
}

impl EventRelay for RedisRelay {
    fn publish(
        &self,
        envelope: &RelayEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        let topic = Self::topic(envelope.event.job_id);
        let payload = serde_json::to_vec(envelope);
        let mut conn = self.publish_conn.clone();
        Box::pin(async move {
            let payload = payload.map_err(|e| RelayError(e.to_string()))?;
            redis::cmd("PUBLISH")
                .arg(topic)
                .arg(payload)
                .query_async::<i64>(&mut conn)
                .await
                .map_err(|e| RelayError(e.to_string()))?;
            Ok(())
        })
    }

    fn run(
        &self,
        sink: RelaySink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + '_>> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut pubsub = client
                .get_async_pubsub()
                .await
                .map_err(|e| RelayError(e.to_string()))?;
            pubsub
                .psubscribe(format!("{TOPIC_PREFIX}*"))
                .await
                .map_err(|e| RelayError(e.to_string()))?;
            debug!("redis relay listening");

            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    message = stream.next() => {
                        let Some(message) = message else { return Ok(()) };
                        let payload: Vec<u8> = match message.get_payload() {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!(error = %err, "relay payload unreadable");
                                continue;
                            }
                        };
                        match serde_json::from_slice::<RelayEnvelope>(&payload) {
                            Ok(envelope) => sink(envelope),
                            Err(err) => warn!(error = %err, "relay envelope undecodable"),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use applygate_core::types::JobStatus;

    #[tokio::test]
    async fn in_memory_relay_round_trips() {
        let relay = Arc::new(InMemoryRelay::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink: RelaySink = Arc::new(move |envelope| {
            let _ = tx.send(envelope);
        });

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let run_relay = relay.clone();
        let runner = tokio::spawn(async move { run_relay.run(sink, run_cancel).await });
        tokio::task::yield_now().await;

        let envelope = RelayEnvelope {
            origin: Uuid::new_v4(),
            event: StatusEvent::new(Uuid::new_v4(), JobStatus::Processing),
        };
        relay.publish(&envelope).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.origin, envelope.origin);
        assert_eq!(received.event.job_id, envelope.event.job_id);

        cancel.cancel();
        runner.await.unwrap().unwrap();
    }
}
