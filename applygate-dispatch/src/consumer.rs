//! Status-queue consumer.
//!
//! A long-lived consumer on `jobs.status`. Each delivery is decoded and
//! handed to the event handler; the message is acked only after the
//! handler succeeds. Handler failures and undecodable frames are nacked
//! without requeue so they land in the dead-letter queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use applygate_core::types::StatusEvent;

use crate::codec::decode_frame;
use crate::error::DispatchError;
use crate::topology::STATUS_QUEUE;

/// Handles one decoded status event. Returning an error sends the
/// delivery to the DLQ.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(
        &self,
        event: StatusEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>>;
}

pub struct StatusConsumer {
    channel: Channel,
    consumer_tag: String,
    prefetch: u16,
}

impl StatusConsumer {
    pub fn new(channel: Channel, consumer_tag: impl Into<String>) -> Self {
        Self {
            channel,
            consumer_tag: consumer_tag.into(),
            prefetch: 64,
        }
    }

    /// Consume until cancelled. Runs on its own task.
    pub async fn run(
        self,
        handler: Arc<dyn EventHandler>,
        cancel: CancellationToken,
    ) -> Result<(), DispatchError> {
        self.channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;
        let mut consumer = self
            .channel
            .basic_consume(
                STATUS_QUEUE,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(queue = STATUS_QUEUE, tag = %self.consumer_tag, "status consumer started");

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = consumer.next() => delivery,
            };

            let delivery = match delivery {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => {
                    error!(error = %err, "status consumer stream error");
                    continue;
                }
                None => {
                    warn!("status consumer stream closed");
                    break;
                }
            };

            let event = decode_frame(&delivery.data)
                .map_err(|e| e.to_string())
                .and_then(|payload| {
                    serde_json::from_slice::<StatusEvent>(&payload).map_err(|e| e.to_string())
                });

            match event {
                Ok(event) => {
                    let job_id = event.job_id;
                    match handler.handle(event).await {
                        Ok(()) => {
                            if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                                error!(error = %err, %job_id, "ack failed");
                            }
                        }
                        Err(reason) => {
                            warn!(%job_id, reason, "status event handling failed, dead-lettering");
                            let _ = delivery
                                .nack(BasicNackOptions {
                                    requeue: false,
                                    ..BasicNackOptions::default()
                                })
                                .await;
                        }
                    }
                }
                Err(reason) => {
                    warn!(reason, "undecodable status delivery, dead-lettering");
                    let _ = delivery
                        .nack(BasicNackOptions {
                            requeue: false,
                            ..BasicNackOptions::default()
                        })
                        .await;
                }
            }
        }

        debug!("status consumer stopped");
        Ok(())
    }
}
