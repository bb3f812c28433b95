//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::dialogue::{DialogueConnector, RealtimeConnector};
use crate::core::notify::{NotifySink, WebhookNotifier};
use crate::core::summary::CallSummarizer;

/// State shared by all handlers. Sessions only ever read from it; each call
/// exclusively owns its own connections and timers.
pub struct AppState {
    /// Resolved configuration
    pub config: Arc<ServerConfig>,
    /// Opens dialogue-service connections
    pub connector: Arc<dyn DialogueConnector>,
    /// Lifecycle notification sink
    pub notifier: Arc<dyn NotifySink>,
    /// Post-call summarizer
    pub summarizer: Arc<CallSummarizer>,
}

impl AppState {
    /// Build production state from configuration.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let notifier = WebhookNotifier::new(config.status_webhook_url.clone());
        let summarizer = CallSummarizer::from_config(&config);
        Arc::new(Self {
            config: Arc::new(config),
            connector: Arc::new(RealtimeConnector),
            notifier: Arc::new(notifier),
            summarizer: Arc::new(summarizer),
        })
    }
}
