//! The bidirectional multimodal stream's WebSocket transport binding
//! (spec §6 `StreamMultiModal`). Frames are JSON-encoded `ClientFrame`/
//! `ServerFrame` values exchanged over WebSocket text messages; audio
//! bytes travel base64-encoded inside a JSON `Audio` frame rather than as
//! raw binary WS messages, matching `sa_protocol`'s wire shapes.
//!
//! This module owns only the socket <-> channel translation. The actual
//! orchestration (STT session, LLM worker, ordering guarantees) lives in
//! [`crate::runtime::stream_handler::run`], which is transport-agnostic.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use sa_protocol::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;

use crate::runtime::stream_handler;
use crate::state::AppState;

/// `GET /api/v1/stream` — upgrade to WebSocket and drive one
/// `StreamMultiModal` session end to end.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (inbound_tx, inbound_rx) = mpsc::channel::<ClientFrame>(state.config.streaming.output_queue_capacity);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(state.config.streaming.output_queue_capacity);

    // Writer: the stream handler's single response sender (spec §4.6 role
    // 3) drains into this channel; this task is the only thing that ever
    // writes to the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Orchestration: runs until the client ends/cancels the stream or the
    // socket drops.
    let orchestrator = tokio::spawn(stream_handler::run(state, inbound_rx, outbound_tx));

    // Reader: forwards parsed client frames in; a close or malformed frame
    // ends the stream by dropping `inbound_tx`, which the handler observes
    // as a closed channel equivalent to END_AUDIO.
    while let Some(msg) = ws_stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        if inbound_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring unparseable client frame");
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    drop(inbound_tx);

    // `run` owns `outbound_tx` and drops it on every return path (normal
    // close, cancel, or error), which closes `outbound_rx` and lets the
    // writer's `recv()` loop end on its own once it has drained whatever was
    // still buffered. Awaiting (not aborting) the writer here is required:
    // `mpsc::Sender::send().await` only blocks for buffer space, not socket
    // delivery, so frames enqueued right before `run` returns — including
    // the terminal `Complete{finish_reason="stop"}` — can still be sitting
    // in the channel when `orchestrator.await` completes. Aborting the
    // writer at that point would drop them, breaking the "terminal Complete
    // is the last frame" guarantee and the client-observed FIFO invariant.
    let _ = orchestrator.await;
    let _ = writer.await;
}
