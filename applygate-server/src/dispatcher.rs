//! Broker dispatch seam.
//!
//! The lifecycle service publishes through the [`Dispatcher`] trait so
//! tests can swap the broker out. The production implementation wraps
//! [`DispatchGateway`] behind a lazy reconnect: a gateway that cannot
//! reach the broker at startup still serves HTTP, and submissions fail
//! with 503 until the broker returns.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use applygate_core::config::DispatchConfig;
use applygate_dispatch::descriptor::CancelMessage;
use applygate_dispatch::{DispatchError, DispatchGateway, JobDescriptor, StatusConsumer};

pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch<'a>(
        &'a self,
        descriptor: &'a JobDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;

    fn cancel<'a>(
        &'a self,
        message: &'a CancelMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;
}

pub struct BrokerDispatcher {
    config: DispatchConfig,
    gateway: RwLock<Option<Arc<DispatchGateway>>>,
}

impl BrokerDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            gateway: RwLock::new(None),
        }
    }

    async fn gateway(&self) -> Result<Arc<DispatchGateway>, DispatchError> {
        if let Some(gateway) = self.gateway.read().await.as_ref() {
            return Ok(gateway.clone());
        }
        let mut slot = self.gateway.write().await;
        if let Some(gateway) = slot.as_ref() {
            return Ok(gateway.clone());
        }
        let gateway = Arc::new(DispatchGateway::connect(&self.config).await?);
        *slot = Some(gateway.clone());
        Ok(gateway)
    }

    async fn drop_gateway(&self) {
        *self.gateway.write().await = None;
    }

    async fn with_gateway<'a, T, F, Fut>(&'a self, op: F) -> Result<T, DispatchError>
    where
        F: Fn(Arc<DispatchGateway>) -> Fut,
        Fut: Future<Output = Result<T, DispatchError>> + Send + 'a,
    {
        let gateway = self.gateway().await?;
        match op(gateway).await {
            Ok(value) => Ok(value),
            Err(err) => {
                // Channel-level failures poison the cached gateway; the
                // next call reconnects.
                if matches!(err, DispatchError::Broker(_)) {
                    self.drop_gateway().await;
                }
                Err(err)
            }
        }
    }
}

impl Dispatcher for BrokerDispatcher {
    fn dispatch<'a>(
        &'a self,
        descriptor: &'a JobDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>> {
        Box::pin(self.with_gateway(move |gateway| async move { gateway.publish(descriptor).await }))
    }

    fn cancel<'a>(
        &'a self,
        message: &'a CancelMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>> {
        Box::pin(self.with_gateway(move |gateway| async move { gateway.publish_cancel(message).await }))
    }
}

/// Run the status consumer with reconnect: on any broker failure, wait
/// and start over until cancelled.
pub fn spawn_status_consumer(
    config: DispatchConfig,
    handler: Arc<dyn applygate_dispatch::consumer::EventHandler>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut backoff = Duration::from_secs(1);
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match connect_consumer(&config).await {
                Ok(consumer) => {
                    info!("status consumer connected");
                    backoff = Duration::from_secs(1);
                    if let Err(err) = consumer.run(handler.clone(), cancel.clone()).await {
                        warn!(error = %err, "status consumer failed");
                    }
                    if cancel.is_cancelled() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "status consumer connect failed");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(Duration::from_secs(30));
        }
    });
}

async fn connect_consumer(config: &DispatchConfig) -> Result<StatusConsumer, DispatchError> {
    let conn = lapin::Connection::connect(
        &config.broker_url,
        lapin::ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio),
    )
    .await?;
    let channel = conn.create_channel().await?;
    applygate_dispatch::declare_topology(&channel, &config.exchange, config.shards_per_priority)
        .await?;
    Ok(StatusConsumer::new(channel, format!("applygate-{}", uuid::Uuid::new_v4().simple())))
}
