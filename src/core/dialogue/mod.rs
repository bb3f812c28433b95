//! Dialogue-service connection module.
//!
//! The dialogue side of the bridge: a WebSocket client for the OpenAI
//! Realtime API, the wire message types it speaks, and the session-facing
//! event vocabulary the call session reacts to.
//!
//! The [`DialogueTransport`]/[`DialogueConnector`] traits are the seam between
//! the session state machine and the real socket, so the state machine can be
//! exercised without a network.

mod client;
pub mod config;
pub mod messages;

pub use client::DialogueClient;
pub use config::{AudioFormat, DialogueConfig, REALTIME_URL, RealtimeModel, RealtimeVoice};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use messages::ClientEvent;

/// Errors from the dialogue-service connection.
#[derive(Debug, Error)]
pub enum DialogueError {
    /// Connection to the service failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// The human on the call
    Caller,
    /// The voice agent
    Agent,
}

impl std::fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptRole::Caller => write!(f, "caller"),
            TranscriptRole::Agent => write!(f, "agent"),
        }
    }
}

/// Session-facing events from the dialogue service.
///
/// The connection task maps wire events into this vocabulary; the session
/// never sees raw server events.
#[derive(Debug, Clone)]
pub enum DialogueEvent {
    /// Connection-open acknowledgment (service session created)
    Opened {
        /// Service-assigned session ID
        service_session_id: String,
    },
    /// Agent audio chunk; opaque base64 payload, passed through verbatim
    Audio {
        /// Base64 payload exactly as received
        payload: String,
    },
    /// The human started talking
    SpeechStarted,
    /// The service started streaming a spoken response
    ResponseStarted {
        /// Response ID
        response_id: String,
    },
    /// The in-flight response finished
    ResponseCompleted {
        /// Response ID
        response_id: String,
    },
    /// A final transcript line from either side of the conversation
    Transcript {
        /// Who spoke
        role: TranscriptRole,
        /// Transcript text
        text: String,
    },
    /// In-band error from the service; the connection may still be usable
    ServiceError {
        /// Error message
        message: String,
    },
    /// The socket closed; always the last event for a connection
    Closed {
        /// Whether closure was caused by a transport error
        error: bool,
    },
}

/// Handle to an open dialogue-service connection.
#[async_trait]
pub trait DialogueTransport: Send {
    /// Send a client event; fire-and-forget with respect to delivery.
    async fn send(&self, event: ClientEvent) -> Result<(), DialogueError>;

    /// Whether the connection is still open.
    fn is_open(&self) -> bool;

    /// Close the connection. Best-effort and idempotent.
    async fn close(&mut self);
}

/// Opens dialogue-service connections for call sessions.
#[async_trait]
pub trait DialogueConnector: Send + Sync {
    /// Open a connection; events are delivered on `events` until the
    /// terminal `DialogueEvent::Closed`.
    async fn connect(
        &self,
        config: &DialogueConfig,
        events: mpsc::Sender<DialogueEvent>,
    ) -> Result<Box<dyn DialogueTransport>, DialogueError>;
}

/// Production connector backed by [`DialogueClient`].
pub struct RealtimeConnector;

#[async_trait]
impl DialogueConnector for RealtimeConnector {
    async fn connect(
        &self,
        config: &DialogueConfig,
        events: mpsc::Sender<DialogueEvent>,
    ) -> Result<Box<dyn DialogueTransport>, DialogueError> {
        let client = DialogueClient::connect(config, events).await?;
        Ok(Box::new(client))
    }
}
