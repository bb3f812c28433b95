//! Core bridge logic.
//!
//! - `telephony` - media-stream wire types and the call-setup document
//! - `dialogue` - realtime dialogue-service client and wire types
//! - `session` - the per-call state machine composing the two
//! - `notify` - lifecycle status payloads and fire-and-forget delivery
//! - `summary` - post-call transcript summarization and call log

pub mod dialogue;
pub mod notify;
pub mod session;
pub mod summary;
pub mod telephony;

// Re-export commonly used types for convenience
pub use dialogue::{
    DialogueClient, DialogueConfig, DialogueConnector, DialogueError, DialogueEvent,
    DialogueTransport, RealtimeConnector, TranscriptRole,
};
pub use notify::{CallIdentity, LifecycleEvent, NotifySink, WebhookNotifier};
pub use session::{CallSession, CloseReason, SessionEvent, SessionState};
pub use summary::{CallRecord, CallSummarizer, TranscriptLine};
pub use telephony::{TelephonyInbound, TelephonyOutbound, TelephonyRoute};
