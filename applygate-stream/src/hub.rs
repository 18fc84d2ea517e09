//! The status subscription hub.
//!
//! One in-process registry of subscribers keyed by job id. Broker-side:
//! [`StatusHub::handle_broker_event`] persists terminal transitions
//! through the [`JobStatusStore`] before reporting success (the caller
//! acks only then), fans the event out to local subscribers without ever
//! blocking, and republishes on the cross-instance relay. Subscriber
//! buffers are bounded; a full buffer drops the oldest pending event and
//! bumps a counter.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use applygate_core::metrics::{active_subscribers, subscriber_events_dropped};
use applygate_core::types::{JobStatus, StatusEvent};

use crate::relay::{EventRelay, RelayEnvelope};

/// Why a subscription was refused.
#[derive(Debug)]
pub enum SubscribeError {
    /// Job absent or owned by someone else.
    NotFound,
    /// Job already reached a terminal status; read it from the
    /// repository instead of streaming.
    AlreadyTerminal(JobStatus),
    /// The authoritative store could not answer.
    Store(String),
}

impl std::fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscribeError::NotFound => write!(f, "job not found"),
            SubscribeError::AlreadyTerminal(status) => write!(f, "job already terminal: {status}"),
            SubscribeError::Store(msg) => write!(f, "store error: {msg}"),
        }
    }
}

impl std::error::Error for SubscribeError {}

/// Ownership/status gate for subscription, answered by the job store.
#[derive(Debug, Clone, Copy)]
pub struct JobGate {
    pub status: JobStatus,
}

/// The hub's view of the authoritative job store.
pub trait JobStatusStore: Send + Sync + 'static {
    /// Apply a terminal event to the job row. Must be idempotent with
    /// respect to version conflicts: a concurrent transition that
    /// already moved the job terminal is success, not failure.
    fn apply_terminal(
        &self,
        event: StatusEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>>;

    /// Ownership check + current status for `subscribe`.
    fn job_gate(
        &self,
        job_id: Uuid,
        subject_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<JobGate, SubscribeError>> + Send + '_>>;
}

// ---------------------------------------------------------------------------
// Subscriber queue: bounded, drop-oldest, single consumer
// ---------------------------------------------------------------------------

struct SubscriberQueue {
    buf: Mutex<VecDeque<StatusEvent>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Non-blocking push; a full buffer drops the oldest pending event.
    fn push(&self, event: StatusEvent) {
        {
            let mut buf = self.buf.lock().expect("subscriber buffer poisoned");
            if buf.len() >= self.capacity {
                buf.pop_front();
                subscriber_events_dropped().inc();
            }
            buf.push_back(event);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    async fn next(&self) -> Option<StatusEvent> {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.buf.lock().expect("subscriber buffer poisoned").pop_front() {
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }
}

/// A registered subscriber. Dropping it removes the registration.
pub struct Subscription {
    job_id: Uuid,
    registration: u64,
    queue: Arc<SubscriberQueue>,
    hub: StatusHub,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.job_id)
            .field("registration", &self.registration)
            .finish()
    }
}

impl Subscription {
    /// The next event, in broker delivery order. `None` once the hub
    /// closed this subscriber. Cancel-safe.
    pub async fn recv(&self) -> Option<StatusEvent> {
        self.queue.next().await
    }

    /// Owned equivalent of [`recv`](Self::recv) for poll-based consumers.
    ///
    /// The returned future captures the queue handle, so it can be held
    /// pinned across polls — keeping the waker it registered with the
    /// queue alive until an event arrives or the queue closes.
    pub fn recv_owned(
        &self,
    ) -> impl std::future::Future<Output = Option<StatusEvent>> + Send + 'static {
        let queue = self.queue.clone();
        async move { queue.next().await }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.job_id, self.registration);
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

struct HubInner {
    subscribers: DashMap<Uuid, Vec<(u64, Arc<SubscriberQueue>)>>,
    next_registration: AtomicU64,
    store: Arc<dyn JobStatusStore>,
    relay: Arc<dyn EventRelay>,
    instance_id: Uuid,
    buffer: usize,
}

#[derive(Clone)]
pub struct StatusHub {
    inner: Arc<HubInner>,
}

impl StatusHub {
    pub fn new(store: Arc<dyn JobStatusStore>, relay: Arc<dyn EventRelay>, buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: DashMap::new(),
                next_registration: AtomicU64::new(1),
                store,
                relay,
                instance_id: Uuid::new_v4(),
                buffer,
            }),
        }
    }

    /// Register a subscriber for a job the subject owns.
    pub async fn subscribe(
        &self,
        job_id: Uuid,
        subject_id: Uuid,
    ) -> Result<Subscription, SubscribeError> {
        let gate = self.inner.store.job_gate(job_id, subject_id).await?;
        if gate.status.is_terminal() {
            return Err(SubscribeError::AlreadyTerminal(gate.status));
        }

        let registration = self.inner.next_registration.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.inner.buffer));
        self.inner
            .subscribers
            .entry(job_id)
            .or_default()
            .push((registration, queue.clone()));
        active_subscribers().inc();
        debug!(%job_id, registration, "subscriber registered");

        Ok(Subscription {
            job_id,
            registration,
            queue,
            hub: self.clone(),
        })
    }

    fn unsubscribe(&self, job_id: Uuid, registration: u64) {
        if let Some(mut entry) = self.inner.subscribers.get_mut(&job_id) {
            let before = entry.len();
            entry.retain(|(id, _)| *id != registration);
            if entry.len() < before {
                active_subscribers().dec();
            }
            let empty = entry.is_empty();
            drop(entry);
            if empty {
                self.inner
                    .subscribers
                    .remove_if(&job_id, |_, subs| subs.is_empty());
            }
        }
        debug!(%job_id, registration, "subscriber removed");
    }

    /// Number of live subscribers for a job.
    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.inner
            .subscribers
            .get(&job_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Deliver to local subscribers only. Never blocks.
    pub fn deliver_local(&self, event: &StatusEvent) {
        if let Some(subs) = self.inner.subscribers.get(&event.job_id) {
            for (_, queue) in subs.iter() {
                queue.push(event.clone());
            }
        }
        if event.status.is_terminal() {
            // Terminal event ends every stream for the job; close after
            // the event is queued so subscribers still see it.
            if let Some(subs) = self.inner.subscribers.get(&event.job_id) {
                for (_, queue) in subs.iter() {
                    queue.close();
                }
            }
        }
    }

    /// Entry point for broker deliveries.
    ///
    /// Terminal events are persisted first; an error here propagates to
    /// the caller so the delivery is dead-lettered instead of acked.
    /// Fan-out and relay republish happen only after persistence.
    pub async fn handle_broker_event(&self, event: StatusEvent) -> Result<(), String> {
        if event.status.is_terminal() {
            self.inner.store.apply_terminal(event.clone()).await?;
        }

        self.deliver_local(&event);

        let envelope = RelayEnvelope {
            origin: self.inner.instance_id,
            event,
        };
        if let Err(err) = self.inner.relay.publish(&envelope).await {
            // Cross-instance fan-out is best-effort; the authoritative row
            // is already updated.
            warn!(error = %err, "relay republish failed");
        }
        Ok(())
    }

    /// Announce an event this instance originated (e.g. a client-side
    /// cancellation already persisted through the repository): local
    /// fan-out plus relay republish, no persistence.
    pub async fn announce(&self, event: StatusEvent) {
        self.deliver_local(&event);
        let envelope = RelayEnvelope {
            origin: self.inner.instance_id,
            event,
        };
        if let Err(err) = self.inner.relay.publish(&envelope).await {
            warn!(error = %err, "relay announce failed");
        }
    }

    /// Start the relay listener: events republished by other instances
    /// are delivered to local subscribers.
    pub fn start_relay_listener(&self, cancel: CancellationToken) {
        let hub = self.clone();
        let relay = self.inner.relay.clone();
        let own_instance = self.inner.instance_id;
        tokio::spawn(async move {
            let sink: Arc<dyn Fn(RelayEnvelope) + Send + Sync> =
                Arc::new(move |envelope: RelayEnvelope| {
                    // Skip our own copies; those were delivered inline.
                    if envelope.origin != own_instance {
                        hub.deliver_local(&envelope.event);
                    }
                });
            if let Err(err) = relay.run(sink, cancel).await {
                warn!(error = %err, "relay listener stopped with error");
            }
        });
    }
}
