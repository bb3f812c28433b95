//! Media-stream WebSocket route configuration.

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::media_stream::media_stream_handler;
use crate::state::AppState;

/// Create the media-stream WebSocket router.
///
/// # Endpoint
///
/// `GET /twilio-media-stream` - WebSocket upgrade for the provider's
/// bidirectional media stream.
///
/// # Protocol
///
/// After the upgrade the provider sends `connected`, then `start` with the
/// stream/call identifiers and custom parameters, then a stream of `media`
/// frames carrying base64 caller audio, and finally `stop`. The bridge sends
/// back `media` frames with agent audio and `clear` on barge-in.
pub fn create_media_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/twilio-media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
