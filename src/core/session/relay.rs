//! Audio pass-through between the two peers.
//!
//! Stateless: each inbound payload is reframed for the other side exactly
//! once, in arrival order, with the base64 blob untouched. No buffering,
//! reordering, or re-encoding.

use crate::core::dialogue::messages::ClientEvent;
use crate::core::telephony::{OutboundMedia, TelephonyOutbound};

/// Stateless audio relay.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioRelay;

impl AudioRelay {
    /// Frame a chunk of caller audio for the dialogue service.
    pub fn caller_audio(&self, payload: String) -> ClientEvent {
        ClientEvent::InputAudioBufferAppend { audio: payload }
    }

    /// Frame a chunk of agent audio for the telephony provider.
    pub fn agent_audio(&self, stream_sid: &str, payload: String) -> TelephonyOutbound {
        TelephonyOutbound::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }
}
