//! Dialogue-service WebSocket client.
//!
//! Owns the outbound connection to the realtime dialogue service for one call.
//! The connection is opened once per call session and never reopened: when the
//! socket closes for any reason the owning session tears the call down.
//!
//! The socket is driven by a spawned task that multiplexes an outbound command
//! channel with the inbound stream; parsed server events are mapped to
//! [`DialogueEvent`]s and forwarded to the session's event queue.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::config::DialogueConfig;
use super::messages::{ClientEvent, ServerEvent};
use super::{DialogueError, DialogueEvent, DialogueTransport, TranscriptRole};

/// Channel capacity for outbound WebSocket commands.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// WebSocket client for the dialogue service.
pub struct DialogueClient {
    cmd_tx: mpsc::Sender<ClientEvent>,
    open: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl DialogueClient {
    /// Connect to the dialogue service and start the socket task.
    ///
    /// Server events are mapped to [`DialogueEvent`]s and sent on `events`;
    /// a final `DialogueEvent::Closed` is always emitted when the socket ends.
    pub async fn connect(
        config: &DialogueConfig,
        events: mpsc::Sender<DialogueEvent>,
    ) -> Result<Self, DialogueError> {
        if config.api_key.is_empty() {
            return Err(DialogueError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let ws_url = config.ws_url();
        let host = Url::parse(&ws_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| {
                DialogueError::ConnectionFailed(format!("invalid endpoint: {ws_url}"))
            })?;

        let request = http::Request::builder()
            .uri(&ws_url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| DialogueError::ConnectionFailed(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| DialogueError::ConnectionFailed(e.to_string()))?;

        tracing::info!(model = %config.model, "Connected to dialogue service");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientEvent>(COMMAND_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));

        let task_open = open.clone();
        let task = tokio::spawn(async move {
            let closed_with_error = loop {
                tokio::select! {
                    // Outbound commands from the session
                    maybe_cmd = cmd_rx.recv() => {
                        let Some(cmd) = maybe_cmd else { break false };
                        let json = match serde_json::to_string(&cmd) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize client event: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::warn!("Failed to send to dialogue service: {e}");
                            break true;
                        }
                    }

                    // Inbound server events
                    maybe_msg = ws_stream.next() => {
                        match maybe_msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if let Some(mapped) = map_server_event(event)
                                            && events.send(mapped).await.is_err()
                                        {
                                            // Session is gone; stop reading.
                                            break false;
                                        }
                                    }
                                    Err(e) => {
                                        // Unknown or malformed events are noise, not fatal.
                                        tracing::trace!("Discarding unparsed server event: {e}");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::warn!("Failed to send pong: {e}");
                                    break true;
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                tracing::info!("Dialogue service closed the connection");
                                break false;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!("Dialogue socket error: {e}");
                                break true;
                            }
                            None => break false,
                        }
                    }
                }
            };

            task_open.store(false, Ordering::SeqCst);
            let _ = events
                .send(DialogueEvent::Closed {
                    error: closed_with_error,
                })
                .await;
        });

        Ok(Self {
            cmd_tx,
            open,
            task: Some(task),
        })
    }
}

#[async_trait]
impl DialogueTransport for DialogueClient {
    async fn send(&self, event: ClientEvent) -> Result<(), DialogueError> {
        if !self.is_open() {
            return Err(DialogueError::NotConnected);
        }
        self.cmd_tx
            .send(event)
            .await
            .map_err(|_| DialogueError::NotConnected)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DialogueClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Map a wire-level server event to the session-facing event vocabulary.
///
/// Returns `None` for events the session does not react to.
fn map_server_event(event: ServerEvent) -> Option<DialogueEvent> {
    match event {
        ServerEvent::SessionCreated { session } => Some(DialogueEvent::Opened {
            service_session_id: session.id,
        }),
        ServerEvent::SessionUpdated { session } => {
            tracing::debug!(service_session_id = %session.id, "Dialogue session configured");
            None
        }
        ServerEvent::AudioDelta { delta, .. } => Some(DialogueEvent::Audio { payload: delta }),
        ServerEvent::SpeechStarted { audio_start_ms, .. } => {
            tracing::debug!("Caller speech started at {audio_start_ms}ms");
            Some(DialogueEvent::SpeechStarted)
        }
        ServerEvent::SpeechStopped { .. } => None,
        ServerEvent::ResponseCreated { response } => Some(DialogueEvent::ResponseStarted {
            response_id: response.id,
        }),
        ServerEvent::ResponseDone { response } => Some(DialogueEvent::ResponseCompleted {
            response_id: response.id,
        }),
        ServerEvent::TranscriptionCompleted { transcript, .. } => {
            Some(DialogueEvent::Transcript {
                role: TranscriptRole::Caller,
                text: transcript,
            })
        }
        ServerEvent::AudioTranscriptDone { transcript, .. } => Some(DialogueEvent::Transcript {
            role: TranscriptRole::Agent,
            text: transcript,
        }),
        ServerEvent::AudioTranscriptDelta { .. } | ServerEvent::AudioDone { .. } => None,
        ServerEvent::Error { error } => {
            tracing::warn!(
                error_type = %error.error_type,
                "Dialogue service error: {}",
                error.message
            );
            Some(DialogueEvent::ServiceError {
                message: error.message,
            })
        }
    }
}
