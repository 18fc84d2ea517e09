//! SSE framing over a hub subscription.
//!
//! Each status update becomes one `event:`/`data:`/`id:` frame with the
//! JSON-encoded event as data and a per-subscriber monotonic id. The
//! stream ends after the terminal event, at the configured max lifetime,
//! or when the subscription closes; an unexpected close emits a terminal
//! `event: error` frame first. Heartbeats are comment lines supplied by
//! axum's keep-alive.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::response::sse::Event as SseEvent;

use applygate_core::types::StatusEvent;

use crate::hub::Subscription;

pub struct StatusStream {
    subscription: Subscription,
    /// In-flight receive, held across polls so the waker it registers
    /// with the subscriber queue stays armed; re-created after each
    /// resolved event.
    recv: Pin<Box<dyn Future<Output = Option<StatusEvent>> + Send>>,
    next_id: u64,
    deadline: Pin<Box<tokio::time::Sleep>>,
    saw_terminal: bool,
    done: bool,
}

impl StatusStream {
    pub fn new(subscription: Subscription, max_life: Duration) -> Self {
        let recv = Box::pin(subscription.recv_owned());
        Self {
            subscription,
            recv,
            next_id: 1,
            deadline: Box::pin(tokio::time::sleep(max_life)),
            saw_terminal: false,
            done: false,
        }
    }

    fn frame(&mut self, event: &StatusEvent) -> SseEvent {
        let id = self.next_id;
        self.next_id += 1;
        SseEvent::default()
            .event("status")
            .id(id.to_string())
            .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".into()))
    }

    fn error_frame(&mut self, kind: &str) -> SseEvent {
        let id = self.next_id;
        self.next_id += 1;
        SseEvent::default()
            .event("error")
            .id(id.to_string())
            .data(format!("{{\"error\":\"{kind}\"}}"))
    }
}

impl futures_core::Stream for StatusStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        // Max lifetime: end the response cleanly.
        if this.deadline.as_mut().poll(cx).is_ready() {
            this.done = true;
            return Poll::Ready(None);
        }

        match this.recv.as_mut().poll(cx) {
            Poll::Ready(Some(event)) => {
                // Re-arm before returning so the next poll picks up where
                // this receive left off.
                this.recv = Box::pin(this.subscription.recv_owned());
                if event.status.is_terminal() {
                    this.saw_terminal = true;
                }
                let frame = this.frame(&event);
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(None) => {
                this.done = true;
                if this.saw_terminal {
                    Poll::Ready(None)
                } else {
                    // Closed without a terminal status: tell the client
                    // before the stream ends.
                    let frame = this.error_frame("internal");
                    Poll::Ready(Some(Ok(frame)))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
