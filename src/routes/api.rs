//! Plain HTTP route configuration.

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::api::{call_setup, health_check};
use crate::state::AppState;

/// Create the HTTP router.
///
/// # Endpoints
///
/// - `GET /` - liveness check
/// - `GET /twiml` - call-setup document pointing the provider at the
///   media-stream endpoint (`?to=` and `?campaign=` become stream parameters)
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check))
        .route("/twiml", get(call_setup))
        .layer(TraceLayer::new_for_http())
}
