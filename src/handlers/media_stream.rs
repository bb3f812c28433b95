//! Telephony media-stream WebSocket handler.
//!
//! Accepts the provider's WebSocket upgrade and wires the socket to a
//! [`CallSession`]: a sender task drains outbound frames, a reader task
//! parses inbound frames onto the session's event queue, and the session
//! reactor runs in this handler's task until the call is fully torn down.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::session::{CallSession, SessionEvent};
use crate::core::telephony::{TelephonyInbound, TelephonyRoute};
use crate::state::AppState;

/// Channel buffer size for audio workloads.
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Media-stream WebSocket handler.
///
/// Upgrades the HTTP connection; one [`CallSession`] lives for the duration
/// of the socket.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("Media-stream WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_media_stream(socket, state))
}

async fn handle_media_stream(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4();
    info!(conn_id = %conn_id, "Media-stream connection established");

    let (mut sender, mut receiver) = socket.split();
    let (route_tx, mut route_rx) = mpsc::channel::<TelephonyRoute>(CHANNEL_BUFFER_SIZE);
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing frames.
    let sender_task = tokio::spawn(async move {
        while let Some(route) = route_rx.recv().await {
            let result = match route {
                TelephonyRoute::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        warn!("Failed to serialize outbound frame: {e}");
                        continue;
                    }
                },
                TelephonyRoute::Close => {
                    debug!("Closing media-stream WebSocket");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                warn!("Failed to send media-stream frame: {e}");
                break;
            }
        }
    });

    // Reader task: parse frames onto the session queue, in arrival order.
    let read_tx = event_tx.clone();
    let read_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<TelephonyInbound>(&text) {
                        Ok(frame) => {
                            if read_tx.send(SessionEvent::Telephony(frame)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            // Malformed frames are noise, not fatal.
                            debug!("Discarding unparsed telephony frame: {e}");
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    let _ = read_tx
                        .send(SessionEvent::TelephonyClosed { error: false })
                        .await;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Media-stream socket error: {e}");
                    let _ = read_tx
                        .send(SessionEvent::TelephonyClosed { error: true })
                        .await;
                    return;
                }
            }
        }
        let _ = read_tx
            .send(SessionEvent::TelephonyClosed { error: false })
            .await;
    });

    let session = CallSession::new(
        state.config.clone(),
        state.connector.clone(),
        state.notifier.clone(),
        state.summarizer.clone(),
        route_tx,
        event_tx,
    );
    session.run(event_rx).await;

    read_task.abort();
    sender_task.abort();
    info!(conn_id = %conn_id, "Media-stream connection terminated");
}
