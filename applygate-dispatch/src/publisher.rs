//! Confirmed publishing with retry and bounded back-pressure.
//!
//! A publish succeeds only once the broker acks it. Confirms are awaited
//! with a timeout; a nack or timeout triggers exponential backoff and up
//! to the configured number of attempts. The in-flight window is a
//! semaphore: when it stays full past the bounded wait the caller gets a
//! back-pressure error instead of queueing unboundedly.

use std::sync::Arc;
use std::time::Duration;

use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use applygate_core::config::DispatchConfig;
use applygate_core::metrics::{dispatch_failures, publish_retries};

use crate::codec::encode_frame;
use crate::descriptor::{CancelMessage, JobDescriptor};
use crate::error::DispatchError;
use crate::topology::{self, CONTROL_ROUTING_KEY};

const IN_FLIGHT_WINDOW: usize = 256;

pub struct DispatchGateway {
    channel: Channel,
    exchange: String,
    confirm_timeout: Duration,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    backpressure_wait: Duration,
    shards_per_priority: u32,
    compress_threshold: usize,
    window: Arc<Semaphore>,
}

impl DispatchGateway {
    /// Connect, enable publisher confirms, and declare the topology.
    pub async fn connect(cfg: &DispatchConfig) -> Result<Self, DispatchError> {
        let conn = Connection::connect(
            &cfg.broker_url,
            ConnectionProperties::default()
                .with_executor(tokio_executor_trait::Tokio::current())
                .with_reactor(tokio_reactor_trait::Tokio),
        )
        .await?;
        let channel = conn.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        topology::declare_topology(&channel, &cfg.exchange, cfg.shards_per_priority).await?;
        info!(exchange = %cfg.exchange, "dispatch gateway connected");

        Ok(Self {
            channel,
            exchange: cfg.exchange.clone(),
            confirm_timeout: cfg.confirm_timeout,
            max_attempts: cfg.max_attempts.max(1),
            initial_backoff: cfg.initial_backoff,
            max_backoff: cfg.max_backoff,
            backpressure_wait: cfg.backpressure_wait,
            shards_per_priority: cfg.shards_per_priority,
            compress_threshold: cfg.compress_threshold,
            window: Arc::new(Semaphore::new(IN_FLIGHT_WINDOW)),
        })
    }

    /// Publish a job descriptor to its priority queue.
    pub async fn publish(&self, descriptor: &JobDescriptor) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(descriptor)
            .map_err(|e| DispatchError::Codec(e.to_string()))?;
        let frame = encode_frame(&payload, self.compress_threshold);
        let routing_key = descriptor.routing_key(self.shards_per_priority);
        self.publish_framed(&routing_key, &frame).await
    }

    /// Publish a cancellation control message.
    pub async fn publish_cancel(&self, cancel: &CancelMessage) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(cancel)
            .map_err(|e| DispatchError::Codec(e.to_string()))?;
        let frame = encode_frame(&payload, self.compress_threshold);
        self.publish_framed(CONTROL_ROUTING_KEY, &frame).await
    }

    async fn publish_framed(&self, routing_key: &str, frame: &[u8]) -> Result<(), DispatchError> {
        // Bounded wait for a slot in the in-flight window.
        let _permit = tokio::time::timeout(
            self.backpressure_wait,
            self.window.clone().acquire_owned(),
        )
        .await
        .map_err(|_| DispatchError::Backpressure)?
        .map_err(|_| DispatchError::Backpressure)?;

        let mut backoff = self.initial_backoff;
        let mut last_err = DispatchError::ConfirmTimeout;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                publish_retries().inc();
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.max_backoff);
            }

            match self.publish_once(routing_key, frame).await {
                Ok(()) => {
                    debug!(routing_key, attempt, "publish confirmed");
                    return Ok(());
                }
                Err(err) => {
                    warn!(routing_key, attempt, error = %err, "publish attempt failed");
                    last_err = err;
                }
            }
        }

        dispatch_failures().inc();
        warn!(routing_key, error = %last_err, "publish failed, attempts exhausted");
        Err(DispatchError::RetriesExhausted {
            attempts: self.max_attempts,
        })
    }

    async fn publish_once(&self, routing_key: &str, frame: &[u8]) -> Result<(), DispatchError> {
        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                frame,
                BasicProperties::default()
                    .with_content_type("application/octet-stream".into())
                    .with_delivery_mode(2),
            )
            .await?;

        let confirmation = tokio::time::timeout(self.confirm_timeout, confirm)
            .await
            .map_err(|_| DispatchError::ConfirmTimeout)??;

        match confirmation {
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
            Confirmation::Nack(_) => Err(DispatchError::Nacked),
        }
    }
}
