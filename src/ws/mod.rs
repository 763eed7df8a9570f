//! WebSocket live stream for the browser UI.
//!
//! A client connects once to `GET /ws` and subscribes to any number of
//! terminals. All messages are JSON objects.
//!
//! ## Client → server
//!
//! | Type          | Fields                  | Effect                           |
//! |---------------|-------------------------|----------------------------------|
//! | `subscribe`   | `terminalId`, `since?`  | Start streaming a terminal; missed output since the cursor is replayed first |
//! | `unsubscribe` | `terminalId`            | Stop streaming it                |
//! | `ping`        | —                       | `pong`                           |
//!
//! ## Server → client
//!
//! | Type           | Fields                               |
//! |----------------|--------------------------------------|
//! | `output`       | `terminalId`, `data`, `cursor`       |
//! | `exit`         | `terminalId`, `data.exitCode`, `data.status` |
//! | `session_mode` | `terminalId`, `data.sessionKind`, `data.sessionStackDepth`, `data.altScreen` |
//! | `created` / `destroyed` | `terminalId`, `data`        |
//! | `overflow`     | `terminalId` — this client fell behind; reconcile with a cursor read |
//! | `pong` / `error` | —                                  |
//!
//! One `output` message corresponds to one buffer append. A slow client's
//! queue overflows rather than stalling the PTY read loop: the stream for
//! that terminal ends with an `overflow` message and the client catches up
//! via `GET /api/terminals/{name}/output?since=`.
//!
//! Dropping the socket never touches the sessions themselves — they keep
//! running and buffering for the next subscriber.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::sessions::buffer::{BufferEvent, ReadLimits, ReadMode, SubscriberHandle};
use crate::sessions::session::Session;
use crate::state::AppState;

/// Outgoing queue per connection.
const OUTBOX_LEN: usize = 256;

/// `GET /ws` — upgrade to the live stream.
pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One terminal subscription held by a connection.
struct Subscription {
    session: Arc<Session>,
    handle: SubscriberHandle,
    forward_task: tokio::task::JoinHandle<()>,
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Outgoing messages funnel through a channel so subscription tasks can
    // send without sharing the sink.
    let (tx, mut rx) = mpsc::channel::<Value>(OUTBOX_LEN);

    let mut broadcast_rx = state.session_events.subscribe();
    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    error!("ws: failed to serialize message: {e}");
                    continue;
                }
            };
            if ws_sink
                .send(axum::extract::ws::Message::Text(text.into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            ws_msg = ws_stream.next() => {
                let Some(Ok(msg)) = ws_msg else { break };
                let axum::extract::ws::Message::Text(text) = msg else { continue };
                let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
                    let _ = tx.send(json!({
                        "type": "error",
                        "code": "INVALID_JSON",
                        "message": "failed to parse message",
                    })).await;
                    continue;
                };
                handle_client_message(&state, &tx, &mut subscriptions, &parsed).await;
            }
            event = broadcast_rx.recv() => {
                match event {
                    Ok(value) => {
                        if tx.send(value).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("ws: lagged {n} broadcast events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Tear down this client's subscriptions; the sessions live on.
    for (_, sub) in subscriptions.drain() {
        sub.forward_task.abort();
        sub.session.buffer.lock().await.unsubscribe(&sub.handle);
    }
    send_task.abort();
    debug!("ws: client disconnected");
}

async fn handle_client_message(
    state: &AppState,
    tx: &mpsc::Sender<Value>,
    subscriptions: &mut HashMap<String, Subscription>,
    parsed: &Value,
) {
    let msg_type = parsed["type"].as_str().unwrap_or("");
    match msg_type {
        "ping" => {
            let _ = tx.send(json!({ "type": "pong" })).await;
        }
        "subscribe" => {
            let Some(terminal_id) = parsed["terminalId"].as_str() else {
                let _ = send_error(tx, None, "MISSING_TERMINAL_ID").await;
                return;
            };
            if subscriptions.contains_key(terminal_id) {
                return; // already streaming
            }
            let since = parsed["since"].as_u64();
            match state.manager.resolve(terminal_id).await {
                Ok(session) => {
                    let sub = start_subscription(session, terminal_id, since, tx.clone()).await;
                    subscriptions.insert(terminal_id.to_string(), sub);
                }
                Err(_) => {
                    let _ = send_error(tx, Some(terminal_id), "TERMINAL_NOT_FOUND").await;
                }
            }
        }
        "unsubscribe" => {
            let Some(terminal_id) = parsed["terminalId"].as_str() else {
                return;
            };
            if let Some(sub) = subscriptions.remove(terminal_id) {
                sub.forward_task.abort();
                sub.session.buffer.lock().await.unsubscribe(&sub.handle);
            }
        }
        other => {
            let _ = tx
                .send(json!({
                    "type": "error",
                    "code": "UNKNOWN_TYPE",
                    "message": format!("unknown message type: {other}"),
                }))
                .await;
        }
    }
}

async fn send_error(
    tx: &mpsc::Sender<Value>,
    terminal_id: Option<&str>,
    code: &str,
) -> Result<(), mpsc::error::SendError<Value>> {
    let mut msg = json!({ "type": "error", "code": code });
    if let Some(id) = terminal_id {
        msg["terminalId"] = json!(id);
    }
    tx.send(msg).await
}

/// Register a buffer subscriber and spawn the forwarding task. Missed
/// output since the client's cursor is replayed before live data.
async fn start_subscription(
    session: Arc<Session>,
    terminal_id: &str,
    since: Option<u64>,
    tx: mpsc::Sender<Value>,
) -> Subscription {
    let (handle, mut rx, catch_up) = {
        let mut buf = session.buffer.lock().await;
        let catch_up = since.map(|cursor| {
            buf.read(
                cursor,
                ReadMode::Full { backward: false },
                ReadLimits {
                    max_lines: 0,
                    max_bytes: 0,
                },
            )
        });
        let (handle, rx) = buf.subscribe();
        (handle, rx, catch_up)
    };

    let terminal_id = terminal_id.to_string();
    let forward_handle = handle.clone();
    let forward_task = tokio::spawn(async move {
        if let Some(read) = catch_up {
            if !read.bytes.is_empty() || read.dropped_bytes > 0 {
                let msg = json!({
                    "terminalId": terminal_id,
                    "type": "output",
                    "data": String::from_utf8_lossy(&read.bytes),
                    "cursor": read.next_cursor,
                    "droppedBefore": read.dropped_lines,
                });
                if tx.send(msg).await.is_err() {
                    return;
                }
            }
        }
        while let Some(event) = rx.recv().await {
            let BufferEvent::Data { seq, bytes } = event;
            let msg = json!({
                "terminalId": terminal_id,
                "type": "output",
                "data": String::from_utf8_lossy(&bytes),
                "cursor": seq + bytes.len() as u64,
            });
            if tx.send(msg).await.is_err() {
                return;
            }
        }
        // Stream ended: either the session wound down or we overflowed
        if forward_handle.overflowed.load(Ordering::SeqCst) {
            let _ = tx
                .send(json!({ "terminalId": terminal_id, "type": "overflow" }))
                .await;
        }
    });

    Subscription {
        session,
        handle,
        forward_task,
    }
}
