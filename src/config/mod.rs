//! Configuration module for the call bridge.
//!
//! All tunables come from environment variables, resolved once at startup
//! before any session is created. A `.env` file is loaded in `main` if
//! present; the deployment platform otherwise provides the environment.
//!
//! Required: `OPENAI_API_KEY`, `OUTBOUND_OPENING_SCRIPT`. Everything else
//! has a default or is optional.

use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::core::dialogue::{
    AudioFormat, DialogueConfig, REALTIME_URL, RealtimeModel, RealtimeVoice,
};

/// Configuration loading errors. All of these are fatal: the process must
/// not accept any session with an incomplete configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is absent or empty
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    /// A variable is present but cannot be parsed
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },

    /// Cross-field validation failed
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Scripts and prompts assembled into the agent's instructions.
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    /// Opening line spoken when the call connects; may contain a `{name}`
    /// placeholder for the callee identity
    pub opening_script: String,
    /// General knowledge prompt
    pub general_prompt: Option<String>,
    /// Business-specific prompt
    pub business_prompt: Option<String>,
    /// Closing line spoken before hangup, if configured
    pub closing_script: Option<String>,
    /// Languages the agent may speak
    pub languages: Vec<String>,
}

/// Voice-activity-detection tunables passed to the dialogue service.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Activation threshold (0.0 to 1.0)
    pub threshold: f32,
    /// Leading-silence padding in ms
    pub prefix_padding_ms: u32,
    /// Trailing-silence duration in ms
    pub silence_duration_ms: u32,
}

/// Call-lifecycle timing tunables, all in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    /// Silence before the agent checks in
    pub idle_warning_ms: u64,
    /// Further silence beyond the warning before hangup
    pub idle_hangup_ms: u64,
    /// Call duration before the agent is told to wrap up
    pub max_call_warning_ms: u64,
    /// Hard ceiling on call duration
    pub max_call_ms: u64,
    /// Grace period for the closing line before connections close
    pub closing_grace_ms: u64,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Public base URL of this server, used in the call-setup document
    pub public_url: Option<String>,

    /// OpenAI API key for the realtime dialogue service and the summarizer
    pub openai_api_key: String,
    /// Realtime model
    pub realtime_model: RealtimeModel,
    /// Agent voice
    pub realtime_voice: RealtimeVoice,
    /// Realtime endpoint override, `REALTIME_URL` unless set
    pub realtime_endpoint: String,

    /// Scripts and prompts
    pub scripts: ScriptConfig,
    /// Voice-activity-detection tunables
    pub vad: VadConfig,
    /// Lifecycle timing tunables
    pub timers: TimerConfig,
    /// Whether the caller may interrupt the agent mid-response
    pub barge_in_enabled: bool,

    /// Webhook for call-started / call-ended status payloads
    pub status_webhook_url: Option<String>,
    /// Webhook for the post-call log (transcript + summary)
    pub call_log_webhook_url: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 3000)?,
            public_url: env_opt("PUBLIC_URL"),

            openai_api_key: env_required("OPENAI_API_KEY")?,
            realtime_model: RealtimeModel::from_str_or_default(&env_or(
                "REALTIME_MODEL",
                "gpt-4o-realtime-preview",
            )),
            realtime_voice: RealtimeVoice::from_str_or_default(&env_or("REALTIME_VOICE", "alloy")),
            realtime_endpoint: env_or("REALTIME_ENDPOINT", REALTIME_URL),

            scripts: ScriptConfig {
                opening_script: env_required("OUTBOUND_OPENING_SCRIPT")?,
                general_prompt: env_opt("OUTBOUND_GENERAL_PROMPT"),
                business_prompt: env_opt("OUTBOUND_BUSINESS_PROMPT"),
                closing_script: env_opt("OUTBOUND_CLOSING_SCRIPT"),
                languages: env_opt("MB_LANGUAGES")
                    .map(|v| {
                        v.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_else(|| vec!["en".to_string()]),
            },

            vad: VadConfig {
                threshold: env_parse("VAD_THRESHOLD", 0.5)?,
                prefix_padding_ms: env_parse("VAD_PREFIX_PADDING_MS", 300)?,
                silence_duration_ms: env_parse("VAD_SILENCE_DURATION_MS", 500)?,
            },

            timers: TimerConfig {
                idle_warning_ms: env_parse("IDLE_WARNING_MS", 15_000)?,
                idle_hangup_ms: env_parse("IDLE_HANGUP_MS", 10_000)?,
                max_call_warning_ms: env_parse("MAX_CALL_WARNING_MS", 240_000)?,
                max_call_ms: env_parse("MAX_CALL_MS", 300_000)?,
                closing_grace_ms: env_parse("CLOSING_GRACE_MS", 4_000)?,
            },

            barge_in_enabled: env_parse("BARGE_IN_ENABLED", true)?,

            status_webhook_url: env_opt("OUTBOUND_STATUS_WEBHOOK_URL"),
            call_log_webhook_url: env_opt("MB_CALL_LOG_WEBHOOK_URL"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Get the server address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Public base URL, falling back to the bind address.
    pub fn public_base(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.address()))
    }

    /// Connection settings for one dialogue-service session.
    pub fn dialogue_config(&self) -> DialogueConfig {
        DialogueConfig {
            api_key: self.openai_api_key.clone(),
            model: self.realtime_model,
            voice: self.realtime_voice,
            audio_format: AudioFormat::G711Ulaw,
            endpoint: self.realtime_endpoint.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timers.max_call_ms <= self.timers.max_call_warning_ms {
            return Err(ConfigError::Invalid(format!(
                "MAX_CALL_MS ({}) must exceed MAX_CALL_WARNING_MS ({})",
                self.timers.max_call_ms, self.timers.max_call_warning_ms
            )));
        }
        if self.timers.idle_warning_ms == 0 || self.timers.idle_hangup_ms == 0 {
            return Err(ConfigError::Invalid(
                "idle timer durations must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(ConfigError::InvalidValue {
                var: "VAD_THRESHOLD",
                value: self.vad.threshold.to_string(),
            });
        }
        Ok(())
    }
}

fn env_opt(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(name: &'static str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_required(name: &'static str) -> Result<String, ConfigError> {
    env_opt(name).ok_or(ConfigError::MissingVar(name))
}

fn env_parse<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env_opt(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            var: name,
            value: raw,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: &[&str] = &[
        "HOST",
        "PORT",
        "PUBLIC_URL",
        "OPENAI_API_KEY",
        "REALTIME_MODEL",
        "REALTIME_VOICE",
        "REALTIME_ENDPOINT",
        "OUTBOUND_OPENING_SCRIPT",
        "OUTBOUND_GENERAL_PROMPT",
        "OUTBOUND_BUSINESS_PROMPT",
        "OUTBOUND_CLOSING_SCRIPT",
        "MB_LANGUAGES",
        "VAD_THRESHOLD",
        "VAD_PREFIX_PADDING_MS",
        "VAD_SILENCE_DURATION_MS",
        "IDLE_WARNING_MS",
        "IDLE_HANGUP_MS",
        "MAX_CALL_WARNING_MS",
        "MAX_CALL_MS",
        "CLOSING_GRACE_MS",
        "BARGE_IN_ENABLED",
        "OUTBOUND_STATUS_WEBHOOK_URL",
        "MB_CALL_LOG_WEBHOOK_URL",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            unsafe { env::remove_var(var) };
        }
    }

    fn set_minimal_env() {
        clear_env();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-test");
            env::set_var("OUTBOUND_OPENING_SCRIPT", "Hi {name}, this is a test call.");
        }
    }

    #[test]
    #[serial]
    fn test_minimal_env_loads_with_defaults() {
        set_minimal_env();
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.timers.idle_warning_ms, 15_000);
        assert_eq!(config.timers.max_call_ms, 300_000);
        assert!(config.barge_in_enabled);
        assert_eq!(config.scripts.languages, vec!["en".to_string()]);
        assert!(config.scripts.closing_script.is_none());
        assert_eq!(config.realtime_model, RealtimeModel::Gpt4oRealtimePreview);
    }

    #[test]
    #[serial]
    fn test_missing_api_key_is_fatal() {
        clear_env();
        unsafe { env::set_var("OUTBOUND_OPENING_SCRIPT", "Hi.") };
        match ServerConfig::from_env() {
            Err(ConfigError::MissingVar(var)) => assert_eq!(var, "OPENAI_API_KEY"),
            other => panic!("Expected MissingVar, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_missing_opening_script_is_fatal() {
        clear_env();
        unsafe { env::set_var("OPENAI_API_KEY", "sk-test") };
        match ServerConfig::from_env() {
            Err(ConfigError::MissingVar(var)) => assert_eq!(var, "OUTBOUND_OPENING_SCRIPT"),
            other => panic!("Expected MissingVar, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_languages_parsed_from_csv() {
        set_minimal_env();
        unsafe { env::set_var("MB_LANGUAGES", "he, en ,fr") };
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.scripts.languages, vec!["he", "en", "fr"]);
    }

    #[test]
    #[serial]
    fn test_invalid_port_is_rejected() {
        set_minimal_env();
        unsafe { env::set_var("PORT", "not-a-port") };
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::InvalidValue { var: "PORT", .. })
        ));
    }

    #[test]
    #[serial]
    fn test_max_call_must_exceed_warning() {
        set_minimal_env();
        unsafe {
            env::set_var("MAX_CALL_WARNING_MS", "300000");
            env::set_var("MAX_CALL_MS", "200000");
        }
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    #[serial]
    fn test_dialogue_config_uses_ulaw() {
        set_minimal_env();
        let config = ServerConfig::from_env().unwrap();
        let dialogue = config.dialogue_config();
        assert_eq!(dialogue.audio_format, AudioFormat::G711Ulaw);
        assert_eq!(dialogue.api_key, "sk-test");
    }

    #[test]
    #[serial]
    fn test_barge_in_can_be_disabled() {
        set_minimal_env();
        unsafe { env::set_var("BARGE_IN_ENABLED", "false") };
        let config = ServerConfig::from_env().unwrap();
        assert!(!config.barge_in_enabled);
    }
}
