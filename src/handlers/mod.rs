//! HTTP and WebSocket request handlers.
//!
//! - `api` - health check and call-setup document
//! - `media_stream` - telephony media-stream WebSocket

pub mod api;
pub mod media_stream;

// Re-export commonly used handlers for convenient access
pub use media_stream::media_stream_handler;
