//! `WS /ws/research/{session_id}` — the live research feed.
//!
//! The session id is the trace id of the research turn. The socket carries
//! the trace's feed events (`research_started`, `candidate_checking`,
//! `blocker_detected`, ...) and the intervention broker's events for the
//! same trace, as JSON text frames. Closes after the trace goes terminal.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::SinkExt;
use futures_util::StreamExt;

use crate::runtime::trace::TraceSignal;
use crate::state::AppState;

pub async fn research_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, trace_id: String) {
    let Some(subscription) = state.hub.subscribe(&trace_id) else {
        let (mut sink, _) = socket.split();
        let _ = sink
            .send(Message::Text(r#"{"type":"error","error":"not_found"}"#.into()))
            .await;
        let _ = sink.close().await;
        return;
    };
    let mut intervention_rx = state.interventions.subscribe(&trace_id);
    let (mut sink, mut incoming) = socket.split();

    // Replay buffered feed events so late-joining UIs see the history.
    for event in &subscription.replay {
        if let Some(details) = &event.details {
            if sink
                .send(Message::Text(details.to_string()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
    if subscription.status.is_terminal() {
        let _ = sink.close().await;
        return;
    }

    let mut trace_rx = subscription.receiver;
    loop {
        tokio::select! {
            signal = trace_rx.recv() => match signal {
                Ok(TraceSignal::Event(event)) => {
                    if let Some(details) = event.details {
                        if sink.send(Message::Text(details.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(TraceSignal::Terminal(status)) => {
                    let frame = serde_json::json!({
                        "type": "complete",
                        "trace_id": trace_id,
                        "status": status,
                    });
                    let _ = sink.send(Message::Text(frame.to_string())).await;
                    let _ = sink.close().await;
                    return;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(%trace_id, missed = n, "research WS lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    let _ = sink.close().await;
                    return;
                }
            },
            event = intervention_rx.recv() => {
                if let Ok(event) = event {
                    let frame = serde_json::to_string(&event).unwrap_or_default();
                    if sink.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
            }
            message = incoming.next() => match message {
                // Consumers are read-only; drop inbound frames, leave on close.
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(_)) => return,
            },
        }
    }
}
