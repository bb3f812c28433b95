//! Telephony provider module.
//!
//! Wire types for the provider's media-stream WebSocket and the call-setup
//! document generator that points the provider at this server.

pub mod messages;
pub mod setup;

pub use messages::{
    MediaMeta, OutboundMedia, StartMeta, TelephonyInbound, TelephonyOutbound, TelephonyRoute,
};
pub use setup::{SetupParams, call_setup_document, stream_url};
