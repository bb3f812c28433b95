//! Post-call summarization and call log delivery.
//!
//! After a session reaches terminal close, the transcript is summarized with
//! a one-shot completion request and posted to the call-log webhook. All of
//! this runs outside the bridge's critical path; failures are logged and
//! dropped.

use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::ServerConfig;
use crate::core::dialogue::TranscriptRole;
use crate::core::notify::CallIdentity;
use crate::core::session::CloseReason;

/// Completions endpoint for the one-shot summary request.
const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Model used for summarization.
const SUMMARY_MODEL: &str = "gpt-4o-mini";

/// Timeout for the summary request and the call-log post.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// One line of conversation, as transcribed by the dialogue service.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TranscriptLine {
    /// Who spoke
    pub role: TranscriptRole,
    /// What they said
    pub text: String,
}

/// Everything the call log needs about a finished call.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    /// Call identifiers
    #[serde(flatten)]
    pub identity: CallIdentity,
    /// Why the call ended
    pub reason: CloseReason,
    /// Total call duration
    pub duration_ms: u64,
    /// Conversation transcript in arrival order
    pub transcript: Vec<TranscriptLine>,
}

/// Summarization errors; only ever logged.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// HTTP request failed
    #[error("summary request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response did not contain a summary
    #[error("summary response missing content")]
    MissingContent,
}

/// Post-call summarizer.
pub struct CallSummarizer {
    client: reqwest::Client,
    api_key: String,
    completions_url: String,
    call_log_url: Option<String>,
}

impl CallSummarizer {
    /// Build from server configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.openai_api_key.clone(),
            completions_url: COMPLETIONS_URL.to_string(),
            call_log_url: config.call_log_webhook_url.clone(),
        }
    }

    /// Whether a call log destination is configured.
    pub fn is_enabled(&self) -> bool {
        self.call_log_url.is_some()
    }

    /// Summarize the call and post the record to the call-log webhook.
    ///
    /// Runs after the session is already closed; every failure is logged and
    /// swallowed.
    pub async fn summarize_and_log(&self, record: CallRecord) {
        let Some(url) = self.call_log_url.clone() else {
            return;
        };

        let summary = match self.summarize(&record).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(
                    session_id = %record.identity.session_id,
                    error = %e,
                    "Post-call summary failed"
                );
                String::new()
            }
        };

        let payload = json!({
            "record": record,
            "summary": summary,
        });

        match self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    url = %url,
                    status = %response.status(),
                    "Call log webhook returned non-success status"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(url = %url, error = %e, "Call log webhook request failed");
            }
        }
    }

    async fn summarize(&self, record: &CallRecord) -> Result<String, SummaryError> {
        if record.transcript.is_empty() {
            return Ok(String::new());
        }

        let conversation = record
            .transcript
            .iter()
            .map(|line| format!("{}: {}", line.role, line.text))
            .collect::<Vec<_>>()
            .join("\n");

        let body = json!({
            "model": SUMMARY_MODEL,
            "messages": [
                {
                    "role": "system",
                    "content": "Summarize this outbound phone call in a few sentences: \
                                what was discussed, how the callee responded, and how the \
                                call ended."
                },
                { "role": "user", "content": conversation }
            ],
        });

        let response = self
            .client
            .post(&self.completions_url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: serde_json::Value = response.json().await?;
        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or(SummaryError::MissingContent)
    }
}
