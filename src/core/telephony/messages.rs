//! Telephony media-stream message types.
//!
//! JSON frames exchanged with the Twilio Media Streams WebSocket. Inbound
//! frames are `event`-tagged; audio payloads are opaque base64 blobs that the
//! bridge forwards without decoding.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Custom parameter carrying the callee identity (phone number / name).
pub const PARAM_CALLEE: &str = "to";

/// Custom parameter carrying the campaign correlation tag.
pub const PARAM_CAMPAIGN: &str = "campaign";

// =============================================================================
// Inbound Frames (provider -> bridge)
// =============================================================================

/// Inbound frames from the telephony media stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyInbound {
    /// Sent once when the WebSocket is established
    Connected {
        /// Protocol name
        #[serde(default)]
        protocol: Option<String>,
        /// Protocol version
        #[serde(default)]
        version: Option<String>,
    },

    /// Stream metadata; first meaningful frame of every call
    Start {
        /// Stream metadata
        start: StartMeta,
    },

    /// A chunk of caller audio
    Media {
        /// Media payload
        media: MediaMeta,
    },

    /// The call ended on the provider side
    Stop {
        /// Stop metadata
        #[serde(default)]
        stop: Option<StopMeta>,
    },

    /// Acknowledgment of a mark frame we sent earlier
    Mark {
        /// Mark metadata
        #[serde(default)]
        mark: Option<MarkMeta>,
    },
}

/// Metadata from the `start` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct StartMeta {
    /// Provider stream identifier; doubles as the bridge session ID
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    /// Provider call identifier
    #[serde(rename = "callSid")]
    pub call_sid: String,
    /// Provider account identifier
    #[serde(rename = "accountSid", default)]
    pub account_sid: Option<String>,
    /// Tracks carried on the stream
    #[serde(default)]
    pub tracks: Vec<String>,
    /// Parameters attached by the call-setup document
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
    /// Wire audio format
    #[serde(rename = "mediaFormat", default)]
    pub media_format: Option<MediaFormat>,
}

impl StartMeta {
    /// Callee identity attached at call setup, if any.
    pub fn callee_identity(&self) -> Option<&str> {
        self.custom_parameters.get(PARAM_CALLEE).map(String::as_str)
    }

    /// Campaign correlation tag attached at call setup, if any.
    pub fn campaign_tag(&self) -> Option<&str> {
        self.custom_parameters
            .get(PARAM_CAMPAIGN)
            .map(String::as_str)
    }
}

/// Wire audio format advertised in the `start` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    /// Encoding name (e.g., "audio/x-mulaw")
    #[serde(default)]
    pub encoding: Option<String>,
    /// Sample rate in Hz
    #[serde(rename = "sampleRate", default)]
    pub sample_rate: Option<u32>,
    /// Channel count
    #[serde(default)]
    pub channels: Option<u32>,
}

/// Payload of a `media` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaMeta {
    /// Track the audio belongs to ("inbound" for caller audio)
    #[serde(default)]
    pub track: Option<String>,
    /// Monotonic chunk counter
    #[serde(default)]
    pub chunk: Option<String>,
    /// Milliseconds since stream start
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Opaque base64 audio blob
    pub payload: String,
}

/// Metadata from the `stop` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct StopMeta {
    /// Provider call identifier
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
}

/// Metadata from a `mark` acknowledgment.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkMeta {
    /// Name of the acknowledged mark
    #[serde(default)]
    pub name: Option<String>,
}

// =============================================================================
// Outbound Frames (bridge -> provider)
// =============================================================================

/// Outbound frames to the telephony media stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutbound {
    /// Agent audio for playback to the caller
    Media {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Media payload
        media: OutboundMedia,
    },

    /// Flush the provider's playback buffer (barge-in)
    Clear {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Payload of an outbound `media` frame.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    /// Opaque base64 audio blob, forwarded verbatim
    pub payload: String,
}

/// Routing for the telephony sender task.
pub enum TelephonyRoute {
    /// JSON frame to serialize and send
    Frame(TelephonyOutbound),
    /// Close the WebSocket
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_frame_deserialization() {
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": "MZ1234",
                "callSid": "CA5678",
                "accountSid": "AC9999",
                "tracks": ["inbound"],
                "customParameters": {
                    "to": "Dana",
                    "campaign": "summer-24",
                    "direction": "outbound"
                },
                "mediaFormat": {
                    "encoding": "audio/x-mulaw",
                    "sampleRate": 8000,
                    "channels": 1
                }
            }
        }"#;

        let frame: TelephonyInbound = serde_json::from_str(json).unwrap();
        match frame {
            TelephonyInbound::Start { start } => {
                assert_eq!(start.stream_sid, "MZ1234");
                assert_eq!(start.call_sid, "CA5678");
                assert_eq!(start.callee_identity(), Some("Dana"));
                assert_eq!(start.campaign_tag(), Some("summer-24"));
                assert_eq!(
                    start.media_format.unwrap().encoding.as_deref(),
                    Some("audio/x-mulaw")
                );
            }
            _ => panic!("Expected Start frame"),
        }
    }

    #[test]
    fn test_media_frame_deserialization() {
        let json = r#"{
            "event": "media",
            "media": {
                "track": "inbound",
                "chunk": "3",
                "timestamp": "160",
                "payload": "fn9+fn5+"
            }
        }"#;

        let frame: TelephonyInbound = serde_json::from_str(json).unwrap();
        match frame {
            TelephonyInbound::Media { media } => {
                assert_eq!(media.payload, "fn9+fn5+");
                assert_eq!(media.track.as_deref(), Some("inbound"));
            }
            _ => panic!("Expected Media frame"),
        }
    }

    #[test]
    fn test_stop_frame_deserialization() {
        let json = r#"{"event": "stop", "stop": {"callSid": "CA5678"}}"#;
        let frame: TelephonyInbound = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, TelephonyInbound::Stop { .. }));

        // stop body may be absent entirely
        let json = r#"{"event": "stop"}"#;
        let frame: TelephonyInbound = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, TelephonyInbound::Stop { stop: None }));
    }

    #[test]
    fn test_missing_custom_parameters_default_empty() {
        let json = r#"{
            "event": "start",
            "start": {"streamSid": "MZ1", "callSid": "CA1"}
        }"#;
        let frame: TelephonyInbound = serde_json::from_str(json).unwrap();
        match frame {
            TelephonyInbound::Start { start } => {
                assert!(start.callee_identity().is_none());
                assert!(start.campaign_tag().is_none());
            }
            _ => panic!("Expected Start frame"),
        }
    }

    #[test]
    fn test_outbound_media_serialization() {
        let frame = TelephonyOutbound::Media {
            stream_sid: "MZ1234".to_string(),
            media: OutboundMedia {
                payload: "fn9+fn5+".to_string(),
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""event":"media""#));
        assert!(json.contains(r#""streamSid":"MZ1234""#));
        assert!(json.contains(r#""payload":"fn9+fn5+""#));
    }

    #[test]
    fn test_outbound_clear_serialization() {
        let frame = TelephonyOutbound::Clear {
            stream_sid: "MZ1234".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""event":"clear""#));
        assert!(json.contains("MZ1234"));
    }

    #[test]
    fn test_malformed_frame_is_parse_error() {
        assert!(serde_json::from_str::<TelephonyInbound>(r#"{"event": "dtmf"}"#).is_err());
        assert!(serde_json::from_str::<TelephonyInbound>("not json").is_err());
    }
}
