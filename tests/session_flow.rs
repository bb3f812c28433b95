//! Integration tests for the call session state machine.
//!
//! The dialogue service is replaced with an in-process fake behind the
//! `DialogueConnector` seam, so these tests drive the whole reactor
//! (telephony frames in, dialogue control messages and lifecycle
//! notifications out) without a network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use callbridge::config::{ScriptConfig, ServerConfig, TimerConfig, VadConfig};
use callbridge::core::dialogue::messages::ClientEvent;
use callbridge::core::dialogue::{
    DialogueConfig, DialogueConnector, DialogueError, DialogueEvent, DialogueTransport,
    REALTIME_URL, RealtimeModel, RealtimeVoice,
};
use callbridge::core::notify::{LifecycleEvent, NotifySink};
use callbridge::core::summary::CallSummarizer;
use callbridge::core::telephony::messages::{MediaMeta, StartMeta, TelephonyInbound};
use callbridge::core::telephony::{TelephonyOutbound, TelephonyRoute};
use callbridge::{CallSession, CloseReason, SessionEvent};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

struct FakeTransport {
    sent: mpsc::UnboundedSender<ClientEvent>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl DialogueTransport for FakeTransport {
    async fn send(&self, event: ClientEvent) -> Result<(), DialogueError> {
        self.sent.send(event).map_err(|_| DialogueError::NotConnected)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

struct FakeConnector {
    sent: mpsc::UnboundedSender<ClientEvent>,
    open: Arc<AtomicBool>,
    fail: bool,
}

#[async_trait]
impl DialogueConnector for FakeConnector {
    async fn connect(
        &self,
        _config: &DialogueConfig,
        _events: mpsc::Sender<DialogueEvent>,
    ) -> Result<Box<dyn DialogueTransport>, DialogueError> {
        if self.fail {
            return Err(DialogueError::ConnectionFailed("refused".to_string()));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeTransport {
            sent: self.sent.clone(),
            open: self.open.clone(),
        }))
    }
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

#[async_trait]
impl NotifySink for ChannelSink {
    async fn notify(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_url: None,
        openai_api_key: "sk-test".to_string(),
        realtime_model: RealtimeModel::default(),
        realtime_voice: RealtimeVoice::default(),
        realtime_endpoint: REALTIME_URL.to_string(),
        scripts: ScriptConfig {
            opening_script: "Hi {name}, this is Alex from Acme.".to_string(),
            general_prompt: Some("You are a polite phone agent.".to_string()),
            business_prompt: None,
            closing_script: Some("Thanks for your time, goodbye!".to_string()),
            languages: vec!["en".to_string()],
        },
        vad: VadConfig {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        },
        // Long enough that no deadline fires in tests that run on real time.
        timers: TimerConfig {
            idle_warning_ms: 60_000,
            idle_hangup_ms: 60_000,
            max_call_warning_ms: 240_000,
            max_call_ms: 300_000,
            closing_grace_ms: 200,
        },
        barge_in_enabled: true,
        status_webhook_url: None,
        call_log_webhook_url: None,
    }
}

struct Harness {
    event_tx: mpsc::Sender<SessionEvent>,
    route_rx: mpsc::Receiver<TelephonyRoute>,
    sent_rx: mpsc::UnboundedReceiver<ClientEvent>,
    notify_rx: mpsc::UnboundedReceiver<LifecycleEvent>,
    dialogue_open: Arc<AtomicBool>,
    session: JoinHandle<()>,
}

fn start_session(config: ServerConfig, connect_fails: bool) -> Harness {
    let (event_tx, event_rx) = mpsc::channel(256);
    let (route_tx, route_rx) = mpsc::channel(256);
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let dialogue_open = Arc::new(AtomicBool::new(false));

    let summarizer = Arc::new(CallSummarizer::from_config(&config));
    let session = CallSession::new(
        Arc::new(config),
        Arc::new(FakeConnector {
            sent: sent_tx,
            open: dialogue_open.clone(),
            fail: connect_fails,
        }),
        Arc::new(ChannelSink { tx: notify_tx }),
        summarizer,
        route_tx,
        event_tx.clone(),
    );
    let session = tokio::spawn(session.run(event_rx));

    Harness {
        event_tx,
        route_rx,
        sent_rx,
        notify_rx,
        dialogue_open,
        session,
    }
}

fn start_frame(callee: Option<&str>) -> SessionEvent {
    let mut custom_parameters = HashMap::new();
    if let Some(callee) = callee {
        custom_parameters.insert("to".to_string(), callee.to_string());
    }
    custom_parameters.insert("campaign".to_string(), "summer-24".to_string());
    SessionEvent::Telephony(TelephonyInbound::Start {
        start: StartMeta {
            stream_sid: "MZ1234".to_string(),
            call_sid: "CA5678".to_string(),
            account_sid: None,
            tracks: vec!["inbound".to_string()],
            custom_parameters,
            media_format: None,
        },
    })
}

fn media_frame(payload: &str) -> SessionEvent {
    SessionEvent::Telephony(TelephonyInbound::Media {
        media: MediaMeta {
            track: Some("inbound".to_string()),
            chunk: None,
            timestamp: None,
            payload: payload.to_string(),
        },
    })
}

fn stop_frame() -> SessionEvent {
    SessionEvent::Telephony(TelephonyInbound::Stop { stop: None })
}

fn dialogue(event: DialogueEvent) -> SessionEvent {
    SessionEvent::Dialogue(event)
}

fn opened() -> SessionEvent {
    dialogue(DialogueEvent::Opened {
        service_session_id: "sess_1".to_string(),
    })
}

fn response_started() -> SessionEvent {
    dialogue(DialogueEvent::ResponseStarted {
        response_id: "resp_1".to_string(),
    })
}

/// Drain everything the session sent to the dialogue service so far.
fn drain_sent(harness: &mut Harness) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = harness.sent_rx.try_recv() {
        events.push(event);
    }
    events
}

/// Texts of injected conversation turns, in send order.
fn injected_turns(events: &[ClientEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::ConversationItemCreate { item } => item
                .content
                .as_ref()
                .and_then(|parts| parts.first())
                .and_then(|part| part.text.clone()),
            _ => None,
        })
        .collect()
}

fn appended_audio(events: &[ClientEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::InputAudioBufferAppend { audio } => Some(audio.clone()),
            _ => None,
        })
        .collect()
}

fn cancel_count(events: &[ClientEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ClientEvent::ResponseCancel))
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_call_produces_one_started_and_one_ended() {
    let mut harness = start_session(test_config(), false);

    harness.event_tx.send(start_frame(Some("Dana"))).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();
    harness.event_tx.send(response_started()).await.unwrap();

    // Concurrent close triggers racing into the session queue: telephony
    // stop, then socket close, then the dialogue socket going away.
    harness.event_tx.send(stop_frame()).await.unwrap();
    harness
        .event_tx
        .send(SessionEvent::TelephonyClosed { error: false })
        .await
        .unwrap();
    harness
        .event_tx
        .send(dialogue(DialogueEvent::Closed { error: false }))
        .await
        .unwrap();

    match harness.notify_rx.recv().await {
        Some(LifecycleEvent::CallStarted { call, .. }) => {
            assert_eq!(call.session_id, "MZ1234");
            assert_eq!(call.call_id, "CA5678");
            assert_eq!(call.callee.as_deref(), Some("Dana"));
            assert_eq!(call.campaign.as_deref(), Some("summer-24"));
            assert_eq!(call.direction, "outbound");
        }
        other => panic!("Expected CallStarted, got {other:?}"),
    }

    match harness.notify_rx.recv().await {
        Some(LifecycleEvent::CallEnded { reason, .. }) => {
            assert_eq!(reason, CloseReason::CallerHangup);
        }
        other => panic!("Expected CallEnded, got {other:?}"),
    }

    (&mut harness.session).await.unwrap();

    // Teardown ran exactly once: no further notifications exist.
    assert!(harness.notify_rx.recv().await.is_none());
    assert!(!harness.dialogue_open.load(Ordering::SeqCst));

    // The telephony socket was asked to close.
    let mut saw_close = false;
    while let Ok(route) = harness.route_rx.try_recv() {
        if matches!(route, TelephonyRoute::Close) {
            saw_close = true;
        }
    }
    assert!(saw_close);
}

#[tokio::test]
async fn test_caller_audio_forwarded_in_order_byte_identical() {
    let mut harness = start_session(test_config(), false);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();

    let payloads = ["fn9+AA==", "AQID", "BAUG", "BwgJ"];
    for payload in payloads {
        harness.event_tx.send(media_frame(payload)).await.unwrap();
    }
    harness.event_tx.send(stop_frame()).await.unwrap();
    (&mut harness.session).await.unwrap();

    let sent = drain_sent(&mut harness);
    assert_eq!(appended_audio(&sent), payloads);
}

#[tokio::test]
async fn test_audio_before_negotiation_is_dropped() {
    let mut harness = start_session(test_config(), false);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    // Dialogue not open yet: this chunk must be lost, not queued.
    harness.event_tx.send(media_frame("ZWFybHk=")).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();
    harness.event_tx.send(media_frame("bGF0ZQ==")).await.unwrap();
    harness.event_tx.send(stop_frame()).await.unwrap();
    (&mut harness.session).await.unwrap();

    let sent = drain_sent(&mut harness);
    assert_eq!(appended_audio(&sent), ["bGF0ZQ=="]);
}

#[tokio::test]
async fn test_agent_audio_framed_with_stream_sid_in_order() {
    let mut harness = start_session(test_config(), false);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();

    let payloads = ["AAA=", "BBB=", "CCC="];
    for payload in payloads {
        harness
            .event_tx
            .send(dialogue(DialogueEvent::Audio {
                payload: payload.to_string(),
            }))
            .await
            .unwrap();
    }
    harness.event_tx.send(stop_frame()).await.unwrap();
    (&mut harness.session).await.unwrap();

    let mut forwarded = Vec::new();
    while let Ok(route) = harness.route_rx.try_recv() {
        if let TelephonyRoute::Frame(TelephonyOutbound::Media { stream_sid, media }) = route {
            assert_eq!(stream_sid, "MZ1234");
            forwarded.push(media.payload);
        }
    }
    assert_eq!(forwarded, payloads);
}

#[tokio::test]
async fn test_barge_in_cancels_exactly_once() {
    let mut harness = start_session(test_config(), false);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();
    harness.event_tx.send(response_started()).await.unwrap();

    // Two speech-started signals for the same in-flight response.
    harness
        .event_tx
        .send(dialogue(DialogueEvent::SpeechStarted))
        .await
        .unwrap();
    harness
        .event_tx
        .send(dialogue(DialogueEvent::SpeechStarted))
        .await
        .unwrap();
    harness.event_tx.send(stop_frame()).await.unwrap();
    (&mut harness.session).await.unwrap();

    let sent = drain_sent(&mut harness);
    assert_eq!(cancel_count(&sent), 1);

    // The provider playback buffer was flushed.
    let mut saw_clear = false;
    while let Ok(route) = harness.route_rx.try_recv() {
        if matches!(
            route,
            TelephonyRoute::Frame(TelephonyOutbound::Clear { .. })
        ) {
            saw_clear = true;
        }
    }
    assert!(saw_clear);
}

#[tokio::test]
async fn test_speech_started_without_pending_response_is_ignored() {
    let mut harness = start_session(test_config(), false);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();
    harness
        .event_tx
        .send(dialogue(DialogueEvent::SpeechStarted))
        .await
        .unwrap();
    harness.event_tx.send(stop_frame()).await.unwrap();
    (&mut harness.session).await.unwrap();

    let sent = drain_sent(&mut harness);
    assert_eq!(cancel_count(&sent), 0);
}

#[tokio::test]
async fn test_barge_in_disabled_never_cancels() {
    let mut config = test_config();
    config.barge_in_enabled = false;
    let mut harness = start_session(config, false);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();
    harness.event_tx.send(response_started()).await.unwrap();
    harness
        .event_tx
        .send(dialogue(DialogueEvent::SpeechStarted))
        .await
        .unwrap();
    harness.event_tx.send(stop_frame()).await.unwrap();
    (&mut harness.session).await.unwrap();

    let sent = drain_sent(&mut harness);
    assert_eq!(cancel_count(&sent), 0);
}

#[tokio::test]
async fn test_opening_turn_uses_callee_identity() {
    let mut harness = start_session(test_config(), false);

    harness.event_tx.send(start_frame(Some("Dana"))).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();
    harness.event_tx.send(stop_frame()).await.unwrap();
    (&mut harness.session).await.unwrap();

    let sent = drain_sent(&mut harness);

    // The session was configured before anything was spoken.
    assert!(matches!(sent[0], ClientEvent::SessionUpdate { .. }));
    if let ClientEvent::SessionUpdate { session } = &sent[0] {
        let instructions = session.instructions.as_deref().unwrap();
        assert!(instructions.contains("Hi Dana, this is Alex from Acme."));
        assert_eq!(session.input_audio_format.as_deref(), Some("g711_ulaw"));
        assert_eq!(session.output_audio_format.as_deref(), Some("g711_ulaw"));
    }

    let turns = injected_turns(&sent);
    assert!(turns[0].contains("Hi Dana, this is Alex from Acme."));
    assert!(!turns[0].contains("{name}"));
}

#[tokio::test]
async fn test_opening_turn_uses_neutral_filler_without_identity() {
    let mut harness = start_session(test_config(), false);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();
    harness.event_tx.send(stop_frame()).await.unwrap();
    (&mut harness.session).await.unwrap();

    let turns = injected_turns(&drain_sent(&mut harness));
    assert!(turns[0].contains("Hi there, this is Alex from Acme."));
    assert!(!turns[0].contains("{name}"));
}

#[tokio::test]
async fn test_dialogue_connect_failure_closes_with_dialogue_error() {
    let mut harness = start_session(test_config(), true);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    (&mut harness.session).await.unwrap();

    // No "call started": the first and only notification is the close.
    match harness.notify_rx.recv().await {
        Some(LifecycleEvent::CallEnded { reason, .. }) => {
            assert_eq!(reason, CloseReason::DialogueError);
        }
        other => panic!("Expected CallEnded, got {other:?}"),
    }
    assert!(harness.notify_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_dialogue_socket_close_ends_call() {
    let mut harness = start_session(test_config(), false);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();
    harness
        .event_tx
        .send(dialogue(DialogueEvent::Closed { error: false }))
        .await
        .unwrap();
    (&mut harness.session).await.unwrap();

    assert!(matches!(
        harness.notify_rx.recv().await,
        Some(LifecycleEvent::CallStarted { .. })
    ));
    match harness.notify_rx.recv().await {
        Some(LifecycleEvent::CallEnded { reason, .. }) => {
            assert_eq!(reason, CloseReason::DialogueClosed);
        }
        other => panic!("Expected CallEnded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_session_without_start_closes_silently() {
    let mut harness = start_session(test_config(), false);

    harness
        .event_tx
        .send(SessionEvent::TelephonyClosed { error: false })
        .await
        .unwrap();
    (&mut harness.session).await.unwrap();

    // Nothing to report: no identifiers were ever captured.
    assert!(harness.notify_rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_idle_timers_check_in_then_hang_up_with_closing_script() {
    let mut config = test_config();
    config.timers = TimerConfig {
        idle_warning_ms: 1_000,
        idle_hangup_ms: 1_000,
        max_call_warning_ms: 600_000,
        max_call_ms: 900_000,
        closing_grace_ms: 300,
    };
    let mut harness = start_session(config, false);

    harness.event_tx.send(start_frame(Some("Dana"))).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();

    assert!(matches!(
        harness.notify_rx.recv().await,
        Some(LifecycleEvent::CallStarted { .. })
    ));

    // No further telephony activity: the paused clock auto-advances through
    // the idle warning, the idle hangup, and the closing grace period.
    match harness.notify_rx.recv().await {
        Some(LifecycleEvent::CallEnded { reason, .. }) => {
            assert_eq!(reason, CloseReason::CallerIdle);
        }
        other => panic!("Expected CallEnded, got {other:?}"),
    }
    (&mut harness.session).await.unwrap();

    let sent = drain_sent(&mut harness);
    let turns = injected_turns(&sent);
    assert_eq!(turns.len(), 3, "opening, check-in, closing: {turns:?}");
    assert!(turns[1].contains("check in"));
    assert!(turns[2].contains("Thanks for your time, goodbye!"));
}

#[tokio::test(start_paused = true)]
async fn test_max_duration_forces_close_with_closing_script() {
    let mut config = test_config();
    config.timers = TimerConfig {
        idle_warning_ms: 600_000,
        idle_hangup_ms: 600_000,
        max_call_warning_ms: 1_000,
        max_call_ms: 2_000,
        closing_grace_ms: 300,
    };
    let mut harness = start_session(config, false);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();

    assert!(matches!(
        harness.notify_rx.recv().await,
        Some(LifecycleEvent::CallStarted { .. })
    ));
    match harness.notify_rx.recv().await {
        Some(LifecycleEvent::CallEnded { reason, .. }) => {
            assert_eq!(reason, CloseReason::MaxDuration);
        }
        other => panic!("Expected CallEnded, got {other:?}"),
    }
    (&mut harness.session).await.unwrap();

    let turns = injected_turns(&drain_sent(&mut harness));
    assert_eq!(turns.len(), 3, "opening, wrap-up, closing: {turns:?}");
    assert!(turns[1].contains("wrapping up"));
    assert!(turns[2].contains("Thanks for your time, goodbye!"));
}

#[tokio::test(start_paused = true)]
async fn test_hangup_without_closing_script_skips_grace() {
    let mut config = test_config();
    config.scripts.closing_script = None;
    config.timers = TimerConfig {
        idle_warning_ms: 1_000,
        idle_hangup_ms: 1_000,
        max_call_warning_ms: 600_000,
        max_call_ms: 900_000,
        closing_grace_ms: 300,
    };
    let mut harness = start_session(config, false);

    harness.event_tx.send(start_frame(None)).await.unwrap();
    harness.event_tx.send(opened()).await.unwrap();

    assert!(matches!(
        harness.notify_rx.recv().await,
        Some(LifecycleEvent::CallStarted { .. })
    ));
    match harness.notify_rx.recv().await {
        Some(LifecycleEvent::CallEnded { reason, .. }) => {
            assert_eq!(reason, CloseReason::CallerIdle);
        }
        other => panic!("Expected CallEnded, got {other:?}"),
    }
    (&mut harness.session).await.unwrap();

    // Opening + check-in only; nothing injected at close.
    let turns = injected_turns(&drain_sent(&mut harness));
    assert_eq!(turns.len(), 2, "{turns:?}");
}
