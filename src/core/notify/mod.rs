//! Lifecycle notifications.
//!
//! Decides which lifecycle transitions produce an outbound status payload and
//! builds that payload; delivery is fire-and-forget over HTTP. Failure to
//! deliver never affects call teardown and is never retried here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::session::CloseReason;

/// Delivery timeout for a single webhook attempt.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifiers shared by every lifecycle payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CallIdentity {
    /// Bridge session ID (provider stream identifier)
    pub session_id: String,
    /// Provider call identifier
    pub call_id: String,
    /// Callee identity supplied at call setup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callee: Option<String>,
    /// Campaign correlation tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    /// Call direction; always "outbound" for this system
    pub direction: &'static str,
}

/// A lifecycle transition worth telling the outside world about.
///
/// Exactly one `CallStarted` and at most one `CallEnded` is produced per
/// session.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Negotiation completed; the agent is live on the call
    CallStarted {
        /// Call identifiers
        #[serde(flatten)]
        call: CallIdentity,
        /// When the transition happened
        timestamp: DateTime<Utc>,
    },
    /// The session reached terminal close
    CallEnded {
        /// Call identifiers
        #[serde(flatten)]
        call: CallIdentity,
        /// When the transition happened
        timestamp: DateTime<Utc>,
        /// Total call duration
        duration_ms: u64,
        /// Why the call ended
        reason: CloseReason,
    },
}

impl LifecycleEvent {
    /// Build a "call started" payload stamped now.
    pub fn started(call: CallIdentity) -> Self {
        LifecycleEvent::CallStarted {
            call,
            timestamp: Utc::now(),
        }
    }

    /// Build a "call ended" payload stamped now.
    pub fn ended(call: CallIdentity, duration_ms: u64, reason: CloseReason) -> Self {
        LifecycleEvent::CallEnded {
            call,
            timestamp: Utc::now(),
            duration_ms,
            reason,
        }
    }
}

/// Accepts lifecycle payloads for out-of-band delivery.
///
/// Implementations must not block the caller on delivery and must swallow
/// delivery failures.
#[async_trait]
pub trait NotifySink: Send + Sync {
    /// Dispatch one payload, fire-and-forget.
    async fn notify(&self, event: LifecycleEvent);
}

/// Fire-and-forget webhook delivery of lifecycle payloads.
pub struct WebhookNotifier {
    url: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`; with `None`, every payload is
    /// dropped after logging.
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotifySink for WebhookNotifier {
    async fn notify(&self, event: LifecycleEvent) {
        let Some(url) = self.url.clone() else {
            debug!("No status webhook configured, dropping lifecycle payload");
            return;
        };

        let request = self
            .client
            .post(&url)
            .timeout(WEBHOOK_TIMEOUT)
            .header("Content-Type", "application/json")
            .json(&event);

        // Spawn and don't wait: delivery is invisible to the session.
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) => {
                    if !response.status().is_success() {
                        warn!(
                            url = %url,
                            status = %response.status(),
                            "Status webhook returned non-success status"
                        );
                    }
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Status webhook request failed");
                }
            }
        });
    }
}
