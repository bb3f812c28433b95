//! Plain HTTP handlers: health check and the call-setup document.

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::telephony::{SetupParams, call_setup_document, stream_url};
use crate::state::AppState;

/// Liveness check.
pub async fn health_check() -> &'static str {
    "callbridge outbound is alive"
}

/// Query parameters for the call-setup document.
#[derive(Debug, Deserialize, Default)]
pub struct SetupQuery {
    /// Callee identity to attach to the stream
    pub to: Option<String>,
    /// Campaign tag to attach to the stream
    pub campaign: Option<String>,
}

/// Serve the call-setup document that points the provider at the
/// media-stream endpoint, with the requested custom parameters attached.
pub async fn call_setup(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SetupQuery>,
) -> impl IntoResponse {
    let params = SetupParams {
        callee: query.to,
        campaign: query.campaign,
    };
    let document = call_setup_document(&stream_url(&state.config.public_base()), &params);
    ([(header::CONTENT_TYPE, "text/xml")], document)
}
