//! `GET /v1/thinking/{trace_id}` — the SSE progress stream, and its
//! cancel endpoint.
//!
//! Frames: `ping` every 15s, `thinking` per progress event (buffered
//! replay first, then live), one final `complete`, then the stream closes
//! after a 2s grace. A torn connection loses nothing: the response stays
//! retrievable via `/v1/response/{trace_id}`.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;

use pandora_domain::trace::TraceStatus;

use crate::runtime::scheduler;
use crate::runtime::trace::TraceSignal;
use crate::state::AppState;

const KEEPALIVE: Duration = Duration::from_secs(15);
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/thinking/:trace_id (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn thinking_sse(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> impl IntoResponse {
    let Some(subscription) = state.hub.subscribe(&trace_id) else {
        let stream = futures_util::stream::once(async {
            Ok::<_, std::convert::Infallible>(
                Event::default()
                    .event("complete")
                    .data(r#"{"status":"not_found"}"#),
            )
        });
        return Sse::new(stream).into_response();
    };

    let stream = make_thinking_stream(state, trace_id, subscription);
    Sse::new(stream).into_response()
}

fn make_thinking_stream(
    state: AppState,
    trace_id: String,
    subscription: crate::runtime::trace::Subscription,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let crate::runtime::trace::Subscription { replay, status, mut receiver } = subscription;

        // Replay the buffered prefix.
        for event in replay {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event("thinking").data(data));
        }

        // Already terminal: complete immediately.
        let terminal = if status.is_terminal() {
            Some(status)
        } else {
            None
        };

        let final_status = match terminal {
            Some(status) => status,
            None => {
                let mut keepalive = tokio::time::interval(KEEPALIVE);
                keepalive.reset();
                loop {
                    tokio::select! {
                        _ = keepalive.tick() => {
                            yield Ok(Event::default().event("ping").data("{}"));
                        }
                        signal = receiver.recv() => match signal {
                            Ok(TraceSignal::Event(event)) => {
                                let data = serde_json::to_string(&event).unwrap_or_default();
                                yield Ok(Event::default().event("thinking").data(data));
                            }
                            Ok(TraceSignal::Terminal(status)) => break status,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                tracing::debug!(%trace_id, missed = n, "SSE subscriber lagged");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                                // Producer gone without a terminal signal;
                                // report current hub status.
                                break state
                                    .hub
                                    .get(&trace_id)
                                    .map(|r| r.status)
                                    .unwrap_or(TraceStatus::Error);
                            }
                        }
                    }
                }
            }
        };

        // The response was set before the terminal signal, so this read is
        // guaranteed to observe it.
        let response = state
            .hub
            .get(&trace_id)
            .and_then(|r| r.response);
        let data = serde_json::json!({
            "trace_id": trace_id,
            "status": final_status,
            "response": response,
        });
        yield Ok(Event::default().event("complete").data(data.to_string()));
        state.hub.mark_sse_delivered(&trace_id);

        tokio::time::sleep(CLOSE_GRACE).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/thinking/:trace_id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> impl IntoResponse {
    let ok = scheduler::cancel_trace(&state, &trace_id, "cancelled via /v1/thinking");
    axum::Json(serde_json::json!({ "ok": ok }))
}
