//! The push-stream endpoint.
//!
//! Bearer auth, or a `?token=` fallback for client runtimes that cannot
//! set headers on an EventSource connection. An already-terminal job is
//! answered with a single terminal frame so late subscribers still see
//! the outcome; a live job gets the full hub subscription with
//! heartbeats, max-life, and drop-on-disconnect semantics.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::future::Either;
use serde::Deserialize;
use uuid::Uuid;

use applygate_auth::AuthContext;
use applygate_core::types::{StatusEvent, Subject};
use applygate_core::{ApiError, TraceContext};
use applygate_stream::{StatusStream, SubscribeError};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub token: Option<String>,
}

async fn resolve_subject(
    state: &AppState,
    ctx: Option<AuthContext>,
    params: &StreamParams,
) -> Result<Subject, ApiError> {
    if let Some(ctx) = ctx {
        return Ok(ctx.0);
    }
    let token = params
        .token
        .as_deref()
        .ok_or_else(|| ApiError::auth("authentication required"))?;
    Ok(state.tokens.verify(token).await?)
}

pub async fn stream(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    ctx: Option<AuthContext>,
    trace: TraceContext,
    Query(params): Query<StreamParams>,
) -> Result<Response, ApiError> {
    let subject = resolve_subject(&state, ctx, &params)
        .await
        .map_err(|err| err.with_correlation(trace.correlation_id.clone()))?;

    let keep_alive = KeepAlive::new()
        .interval(state.config.stream.heartbeat)
        .text("heartbeat");

    match state.hub.subscribe(job_id, subject.id).await {
        Ok(subscription) => {
            let stream = StatusStream::new(subscription, state.config.stream.max_life);
            type SingleFrameStream = futures_util::stream::Iter<
                std::vec::IntoIter<Result<SseEvent, Infallible>>,
            >;
            Ok(Sse::new(Either::<StatusStream, SingleFrameStream>::Left(stream))
                .keep_alive(keep_alive)
                .into_response())
        }
        Err(SubscribeError::AlreadyTerminal(_)) => {
            // Late subscriber: answer with the stored terminal state as a
            // single frame, then close. Carries the same payload a live
            // subscriber would have seen for either outcome.
            let job = state.jobs.get(job_id, subject.id).await?;
            let mut event = StatusEvent::new(job.id, job.status);
            event.timestamp = job.updated_at;
            event.artifact_ref = job.artifact_ref;
            if let Some(reason) = job.failure_reason {
                event.progress = Some(serde_json::json!({ "reason": reason }));
            }
            let frame = SseEvent::default()
                .event("status")
                .id("1")
                .data(serde_json::to_string(&event).unwrap_or_else(|_| "{}".into()));
            let single = futures_util::stream::iter(vec![Ok::<_, Infallible>(frame)]);
            Ok(Sse::new(Either::<StatusStream, _>::Right(single))
                .keep_alive(keep_alive)
                .into_response())
        }
        Err(SubscribeError::NotFound) => Err(ApiError::not_found("job not found")
            .with_correlation(trace.correlation_id.clone())),
        Err(SubscribeError::Store(reason)) => {
            Err(ApiError::internal(reason).with_correlation(trace.correlation_id.clone()))
        }
    }
}
