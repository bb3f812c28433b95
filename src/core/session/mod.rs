//! Call session: the per-call bridge state machine.
//!
//! One `CallSession` per accepted telephony connection. The session owns the
//! telephony sender channel and the dialogue-service connection, and reacts
//! to a single queue of inbound events (telephony frames, dialogue events,
//! timer firings) processed strictly in arrival order. State transitions
//! never run concurrently within one session, so no locks guard session
//! state; concurrency exists only across sessions.
//!
//! States: AwaitingStart → Negotiating → Active → Closing → Closed.

pub mod barge_in;
pub mod instructions;
pub mod relay;
pub mod timers;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::core::dialogue::messages::{
    ClientEvent, ConversationItem, InputAudioTranscription, SessionConfig, TurnDetection,
};
use crate::core::dialogue::{DialogueConnector, DialogueEvent, DialogueTransport};
use crate::core::notify::{CallIdentity, LifecycleEvent, NotifySink};
use crate::core::summary::{CallRecord, CallSummarizer, TranscriptLine};
use crate::core::telephony::{StartMeta, TelephonyInbound, TelephonyOutbound, TelephonyRoute};

use barge_in::BargeInController;
use relay::AudioRelay;
use timers::{TimerFire, TimerKind, TimerSet};

/// Capacity of the per-session dialogue event channel.
const DIALOGUE_CHANNEL_CAPACITY: usize = 256;

/// Why a session closed. Write-once; the first trigger wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The caller hung up (telephony stop or clean socket close)
    CallerHangup,
    /// The caller was silent past the idle deadline
    CallerIdle,
    /// The call hit its maximum duration
    MaxDuration,
    /// The dialogue service closed its connection
    DialogueClosed,
    /// The dialogue service connection failed
    DialogueError,
    /// The telephony transport errored
    TelephonyError,
}

impl CloseReason {
    /// Stable string form used in payloads and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::CallerHangup => "caller_hangup",
            CloseReason::CallerIdle => "caller_idle",
            CloseReason::MaxDuration => "max_duration",
            CloseReason::DialogueClosed => "dialogue_closed",
            CloseReason::DialogueError => "dialogue_error",
            CloseReason::TelephonyError => "telephony_error",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Telephony socket open, no start frame yet
    AwaitingStart,
    /// Start received; dialogue connection opening/configuring
    Negotiating,
    /// Both legs live; audio and control routing
    Active,
    /// Teardown in progress
    Closing,
    /// Terminal; all resources released
    Closed,
}

/// Everything the session reacts to, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    /// A parsed frame from the telephony socket
    Telephony(TelephonyInbound),
    /// The telephony socket ended
    TelephonyClosed {
        /// Whether it ended with a transport error
        error: bool,
    },
    /// An event from the dialogue service
    Dialogue(DialogueEvent),
    /// A lifecycle deadline fired
    Timer(TimerFire),
    /// The closing-line grace period elapsed
    GraceElapsed,
}

/// The per-call bridge state machine.
pub struct CallSession {
    config: Arc<ServerConfig>,
    connector: Arc<dyn DialogueConnector>,
    notifier: Arc<dyn NotifySink>,
    summarizer: Arc<CallSummarizer>,

    state: SessionState,
    session_id: Option<String>,
    call_id: Option<String>,
    callee_identity: Option<String>,
    campaign_tag: Option<String>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,

    dialogue: Option<Box<dyn DialogueTransport>>,
    dialogue_ready: bool,
    pending_response_active: bool,

    relay: AudioRelay,
    barge_in: BargeInController,
    timers: TimerSet,

    close_reason: Option<CloseReason>,
    teardown_done: bool,

    transcript: Vec<TranscriptLine>,

    events_tx: mpsc::Sender<SessionEvent>,
    telephony_tx: mpsc::Sender<TelephonyRoute>,
}

impl CallSession {
    /// Build a session for one accepted telephony connection.
    ///
    /// `events_tx` is the sending side of the queue later passed to [`run`];
    /// the session hands clones to its timers, its grace task, and the
    /// dialogue event forwarder.
    ///
    /// [`run`]: CallSession::run
    pub fn new(
        config: Arc<ServerConfig>,
        connector: Arc<dyn DialogueConnector>,
        notifier: Arc<dyn NotifySink>,
        summarizer: Arc<CallSummarizer>,
        telephony_tx: mpsc::Sender<TelephonyRoute>,
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let timers = TimerSet::new(&config.timers, events_tx.clone());
        let barge_in = BargeInController::new(config.barge_in_enabled);
        Self {
            config,
            connector,
            notifier,
            summarizer,
            state: SessionState::AwaitingStart,
            session_id: None,
            call_id: None,
            callee_identity: None,
            campaign_tag: None,
            started_at: None,
            dialogue: None,
            dialogue_ready: false,
            pending_response_active: false,
            relay: AudioRelay,
            barge_in,
            timers,
            close_reason: None,
            teardown_done: false,
            transcript: Vec::new(),
            events_tx,
            telephony_tx,
        }
    }

    /// Drive the session to completion, consuming its event queue.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
            if self.state == SessionState::Closed {
                break;
            }
        }

        // The queue can only drain before Closed if every sender vanished,
        // which means the telephony socket task died; close out regardless.
        if self.state != SessionState::Closed {
            self.begin_close(CloseReason::TelephonyError).await;
            self.finish_teardown().await;
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Telephony(frame) => self.on_telephony(frame).await,
            SessionEvent::TelephonyClosed { error } => self.on_telephony_closed(error).await,
            SessionEvent::Dialogue(event) => self.on_dialogue(event).await,
            SessionEvent::Timer(fire) => self.on_timer(fire).await,
            SessionEvent::GraceElapsed => {
                if self.state == SessionState::Closing {
                    self.finish_teardown().await;
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Telephony events
    // -------------------------------------------------------------------------

    async fn on_telephony(&mut self, frame: TelephonyInbound) {
        // Any telephony activity rearms the idle pair.
        if matches!(
            self.state,
            SessionState::Negotiating | SessionState::Active
        ) {
            self.timers.reset_idle();
        }

        match frame {
            TelephonyInbound::Connected { protocol, .. } => {
                debug!(protocol = ?protocol, "Telephony stream connected");
            }
            TelephonyInbound::Start { start } => self.on_start(start).await,
            TelephonyInbound::Media { media } => {
                if self.state == SessionState::Active {
                    if let Some(dialogue) = &self.dialogue
                        && dialogue.is_open()
                        && let Err(e) = dialogue.send(self.relay.caller_audio(media.payload)).await
                    {
                        warn!("Failed to forward caller audio: {e}");
                    }
                } else {
                    // Audio before negotiation completes is lost by design.
                    debug!("Dropping caller audio outside ACTIVE");
                }
            }
            TelephonyInbound::Stop { .. } => {
                info!(session_id = ?self.session_id, "Telephony stop received");
                self.begin_close(CloseReason::CallerHangup).await;
            }
            TelephonyInbound::Mark { mark } => {
                debug!(mark = ?mark.and_then(|m| m.name), "Mark acknowledged");
            }
        }
    }

    async fn on_start(&mut self, start: StartMeta) {
        if self.state != SessionState::AwaitingStart {
            warn!(
                stream_sid = %start.stream_sid,
                "Duplicate start frame ignored"
            );
            return;
        }

        info!(
            stream_sid = %start.stream_sid,
            call_sid = %start.call_sid,
            callee = ?start.callee_identity(),
            campaign = ?start.campaign_tag(),
            "Call session starting"
        );

        self.callee_identity = start.callee_identity().map(str::to_string);
        self.campaign_tag = start.campaign_tag().map(str::to_string);
        self.session_id = Some(start.stream_sid);
        self.call_id = Some(start.call_sid);
        self.started_at = Some(chrono::Utc::now());
        self.state = SessionState::Negotiating;
        self.timers.arm();

        // The only operation the session waits on before becoming ACTIVE.
        let (dialogue_tx, mut dialogue_rx) =
            mpsc::channel::<DialogueEvent>(DIALOGUE_CHANNEL_CAPACITY);
        let dialogue_config = self.config.dialogue_config();
        let connected = self.connector.connect(&dialogue_config, dialogue_tx).await;
        match connected {
            Ok(transport) => {
                self.dialogue = Some(transport);
                let forward = self.events_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = dialogue_rx.recv().await {
                        if forward.send(SessionEvent::Dialogue(event)).await.is_err() {
                            break;
                        }
                    }
                });
            }
            Err(e) => {
                warn!("Failed to open dialogue connection: {e}");
                self.begin_close(CloseReason::DialogueError).await;
            }
        }
    }

    async fn on_telephony_closed(&mut self, error: bool) {
        match self.state {
            SessionState::Closing => {
                // Nobody left to hear the closing line; finish now.
                self.finish_teardown().await;
            }
            SessionState::Closed => {}
            _ => {
                let reason = if error {
                    CloseReason::TelephonyError
                } else {
                    CloseReason::CallerHangup
                };
                self.begin_close(reason).await;
                self.finish_teardown().await;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Dialogue events
    // -------------------------------------------------------------------------

    async fn on_dialogue(&mut self, event: DialogueEvent) {
        match event {
            DialogueEvent::Opened { service_session_id } => {
                self.on_dialogue_opened(service_session_id).await;
            }
            DialogueEvent::Audio { payload } => {
                // Forwarded while ACTIVE and during the closing grace window
                // so the closing line is heard.
                if matches!(self.state, SessionState::Active | SessionState::Closing)
                    && let Some(stream_sid) = self.session_id.as_deref()
                {
                    let frame = self.relay.agent_audio(stream_sid, payload);
                    if self
                        .telephony_tx
                        .send(TelephonyRoute::Frame(frame))
                        .await
                        .is_err()
                    {
                        debug!("Telephony sender gone, dropping agent audio");
                    }
                }
            }
            DialogueEvent::SpeechStarted => {
                if self.state == SessionState::Active
                    && self.barge_in.should_cancel(self.pending_response_active)
                {
                    info!(session_id = ?self.session_id, "Barge-in: cancelling response");
                    self.pending_response_active = false;
                    self.send_dialogue(ClientEvent::ResponseCancel).await;
                    // Flush audio the provider already buffered for playback.
                    if let Some(stream_sid) = self.session_id.clone() {
                        let _ = self
                            .telephony_tx
                            .send(TelephonyRoute::Frame(TelephonyOutbound::Clear {
                                stream_sid,
                            }))
                            .await;
                    }
                }
            }
            DialogueEvent::ResponseStarted { response_id } => {
                debug!(response_id = %response_id, "Response streaming");
                self.pending_response_active = true;
            }
            DialogueEvent::ResponseCompleted { response_id } => {
                debug!(response_id = %response_id, "Response completed");
                self.pending_response_active = false;
            }
            DialogueEvent::Transcript { role, text } => {
                if !text.trim().is_empty() {
                    self.transcript.push(TranscriptLine { role, text });
                }
            }
            DialogueEvent::ServiceError { message } => {
                // In-band errors are noise; the socket closing is what ends
                // the call.
                warn!(session_id = ?self.session_id, "Dialogue service error: {message}");
            }
            DialogueEvent::Closed { error } => {
                if matches!(self.state, SessionState::Closing | SessionState::Closed) {
                    if self.state == SessionState::Closing {
                        self.finish_teardown().await;
                    }
                } else {
                    let reason = if error {
                        CloseReason::DialogueError
                    } else {
                        CloseReason::DialogueClosed
                    };
                    self.begin_close(reason).await;
                    self.finish_teardown().await;
                }
            }
        }
    }

    async fn on_dialogue_opened(&mut self, service_session_id: String) {
        if self.state != SessionState::Negotiating {
            debug!("Dialogue opened outside NEGOTIATING, ignoring");
            return;
        }

        info!(
            session_id = ?self.session_id,
            service_session_id = %service_session_id,
            "Dialogue session open, configuring"
        );

        let callee = self.callee_identity.clone();
        let session_config = self.build_session_config(callee.as_deref());
        self.send_dialogue(ClientEvent::SessionUpdate {
            session: session_config,
        })
        .await;

        // Inject the opening utterance as the first turn and ask the service
        // to speak it.
        let opening = instructions::opening_turn(&self.config.scripts, callee.as_deref());
        self.speak(opening).await;

        self.dialogue_ready = true;
        self.state = SessionState::Active;

        if let Some(identity) = self.identity() {
            self.notifier.notify(LifecycleEvent::started(identity)).await;
        }
    }

    // -------------------------------------------------------------------------
    // Timer events
    // -------------------------------------------------------------------------

    async fn on_timer(&mut self, fire: TimerFire) {
        if !matches!(
            self.state,
            SessionState::Negotiating | SessionState::Active
        ) || !self.timers.is_current(&fire)
        {
            return;
        }

        match fire.kind {
            TimerKind::IdleWarning => {
                info!(session_id = ?self.session_id, "Idle warning, checking in");
                self.speak(instructions::check_in_turn()).await;
            }
            TimerKind::IdleHangup => {
                info!(session_id = ?self.session_id, "Idle hangup");
                self.begin_close(CloseReason::CallerIdle).await;
            }
            TimerKind::MaxDurationWarning => {
                info!(session_id = ?self.session_id, "Max duration warning, wrapping up");
                self.speak(instructions::wrap_up_turn()).await;
            }
            TimerKind::MaxDurationHangup => {
                info!(session_id = ?self.session_id, "Max duration reached");
                self.begin_close(CloseReason::MaxDuration).await;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Record the close cause and enter CLOSING. The first caller wins;
    /// every later trigger is a no-op.
    async fn begin_close(&mut self, reason: CloseReason) {
        if self.close_reason.is_some() {
            return;
        }
        self.close_reason = Some(reason);
        self.state = SessionState::Closing;
        self.timers.cancel_all();

        info!(session_id = ?self.session_id, reason = %reason, "Session closing");

        // On the hangup deadlines, speak the closing line first and give it a
        // grace period so it is not truncated.
        let closing = self.config.scripts.closing_script.clone();
        if matches!(reason, CloseReason::CallerIdle | CloseReason::MaxDuration)
            && self.dialogue_ready
            && let Some(closing_script) = closing
        {
            if self.pending_response_active {
                self.send_dialogue(ClientEvent::ResponseCancel).await;
                self.pending_response_active = false;
            }
            self.speak(instructions::closing_turn(&closing_script)).await;

            let grace = Duration::from_millis(self.config.timers.closing_grace_ms);
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = tx.send(SessionEvent::GraceElapsed).await;
            });
        } else {
            self.finish_teardown().await;
        }
    }

    /// Close both connections, dispatch the terminal notification, and enter
    /// CLOSED. Runs at most once regardless of how many triggers race.
    async fn finish_teardown(&mut self) {
        if self.teardown_done {
            return;
        }
        self.teardown_done = true;
        self.timers.cancel_all();

        // Each close is attempted independently; neither blocks the other.
        if let Some(mut dialogue) = self.dialogue.take() {
            dialogue.close().await;
        }
        let _ = self.telephony_tx.send(TelephonyRoute::Close).await;

        let reason = self.close_reason.unwrap_or(CloseReason::TelephonyError);
        let duration_ms = self
            .started_at
            .map(|t| (chrono::Utc::now() - t).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        if let Some(identity) = self.identity() {
            info!(
                session_id = %identity.session_id,
                reason = %reason,
                duration_ms,
                "Call ended"
            );
            self.notifier
                .notify(LifecycleEvent::ended(identity.clone(), duration_ms, reason))
                .await;

            // Post-call summary, outside the teardown path.
            if self.summarizer.is_enabled() {
                let record = CallRecord {
                    identity,
                    reason,
                    duration_ms,
                    transcript: std::mem::take(&mut self.transcript),
                };
                let summarizer = self.summarizer.clone();
                tokio::spawn(async move {
                    summarizer.summarize_and_log(record).await;
                });
            }
        } else {
            debug!(reason = %reason, "Session closed before start frame; nothing to report");
        }

        self.state = SessionState::Closed;
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn identity(&self) -> Option<CallIdentity> {
        Some(CallIdentity {
            session_id: self.session_id.clone()?,
            call_id: self.call_id.clone()?,
            callee: self.callee_identity.clone(),
            campaign: self.campaign_tag.clone(),
            direction: "outbound",
        })
    }

    fn build_session_config(&self, callee: Option<&str>) -> SessionConfig {
        let dialogue = self.config.dialogue_config();
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(instructions::build_instructions(
                &self.config.scripts,
                callee,
            )),
            voice: Some(dialogue.voice.as_str().to_string()),
            input_audio_format: Some(dialogue.audio_format.as_str().to_string()),
            output_audio_format: Some(dialogue.audio_format.as_str().to_string()),
            input_audio_transcription: Some(InputAudioTranscription {
                model: "whisper-1".to_string(),
            }),
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: Some(self.config.vad.threshold),
                prefix_padding_ms: Some(self.config.vad.prefix_padding_ms),
                silence_duration_ms: Some(self.config.vad.silence_duration_ms),
            }),
        }
    }

    /// Inject a text turn and ask the service to speak.
    async fn speak(&mut self, turn: String) {
        self.send_dialogue(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(turn),
        })
        .await;
        self.send_dialogue(ClientEvent::ResponseCreate).await;
    }

    /// Best-effort send to the dialogue service.
    async fn send_dialogue(&mut self, event: ClientEvent) {
        if let Some(dialogue) = &self.dialogue
            && let Err(e) = dialogue.send(event).await
        {
            debug!("Dialogue send failed: {e}");
        }
    }
}
