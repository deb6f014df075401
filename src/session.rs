//! Voice session orchestrator
//!
//! Owns the microphone, the playback scheduler and the remote session for one
//! conversation at a time and moves between
//! `Idle -> Connecting -> Active -> Closing -> Idle`.
//!
//! All mutable state (timeline cursor, transcript) is touched only through
//! `&mut self`, so the session is driven by a single owner task; see
//! `runner::run`.

use crate::audio::{AudioCapture, AudioFrame, AudioPlayer, CaptureError, PlaybackError, PlaybackId};
use crate::codec::{self, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::gemini::GeminiError;
use crate::live::{LiveConnector, LiveEvent, LiveSession};
use crate::playback::PlaybackScheduler;
use crate::recorder::SessionRecorder;
use crate::transcript::{Speaker, Transcript};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Captured frames buffered between the device and the session
const FRAME_QUEUE: usize = 32;

/// Channel count of model audio
const OUTPUT_CHANNELS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closing,
}

/// User-visible status line
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Connecting,
    Listening,
    PermissionDenied,
    Error(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => f.write_str("idle"),
            Status::Connecting => f.write_str("connecting"),
            Status::Listening => f.write_str("listening"),
            Status::PermissionDenied => f.write_str("Mic permission denied"),
            Status::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Why a session could not be started
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Microphone(#[from] CaptureError),

    #[error(transparent)]
    Output(#[from] PlaybackError),

    #[error("failed to open live session: {0}")]
    Connection(#[from] GeminiError),
}

impl StartupError {
    fn status(&self) -> Status {
        match self {
            StartupError::Microphone(_) => Status::PermissionDenied,
            other => Status::Error(other.to_string()),
        }
    }
}

/// Everything that can wake the session up
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Frame(AudioFrame),
    Remote(LiveEvent),
    PlaybackEnded(PlaybackId),
    /// The capture device stopped delivering frames on its own
    CaptureEnded,
}

pub struct VoiceSession<C, P, R> {
    capture: C,
    scheduler: PlaybackScheduler<P>,
    connector: R,

    state: SessionState,
    status: Status,
    transcript: Transcript,

    capturing: bool,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    ended: Option<mpsc::UnboundedReceiver<PlaybackId>>,
    live: Option<LiveSession>,

    record_dir: Option<PathBuf>,
    recorder: Option<SessionRecorder>,
    frames_sent: u64,
    /// Conversations started so far
    conversations: u64,
}

impl<C, P, R> VoiceSession<C, P, R>
where
    C: AudioCapture,
    P: AudioPlayer,
    R: LiveConnector,
{
    pub fn new(capture: C, player: P, connector: R) -> Self {
        Self {
            capture,
            scheduler: PlaybackScheduler::new(player),
            connector,
            state: SessionState::Idle,
            status: Status::Idle,
            transcript: Transcript::new(),
            capturing: false,
            frames: None,
            ended: None,
            live: None,
            record_dir: None,
            recorder: None,
            frames_sent: 0,
            conversations: 0,
        }
    }

    /// Record every conversation's audio under `dir`.
    pub fn with_recording(mut self, dir: Option<PathBuf>) -> Self {
        self.record_dir = dir;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Number of conversations successfully started; identifies the current one.
    pub fn conversation(&self) -> u64 {
        self.conversations
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<P> {
        &self.scheduler
    }

    /// Begin a new conversation. A running one is torn down first.
    ///
    /// On failure everything acquired so far is released, the state is
    /// `Idle` and the status describes the failure.
    pub fn start(&mut self) -> Result<(), StartupError> {
        if !self.is_idle() {
            info!("Restarting: tearing down the current session first");
            self.teardown();
        }

        match self.acquire() {
            Ok(()) => {
                self.conversations += 1;
                self.status = Status::Connecting;
                info!("🎤 Session connecting");
                Ok(())
            }
            Err(e) => {
                error!("Failed to start conversation: {}", e);
                self.teardown();
                self.status = e.status();
                Err(e)
            }
        }
    }

    fn acquire(&mut self) -> Result<(), StartupError> {
        self.state = SessionState::Connecting;
        self.transcript.clear();
        self.frames_sent = 0;

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        self.capture.start(frame_tx)?;
        self.capturing = true;
        self.frames = Some(frame_rx);

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        self.scheduler.open(ended_tx)?;
        self.ended = Some(ended_rx);

        self.live = Some(self.connector.connect()?);

        if let Some(base) = &self.record_dir {
            match SessionRecorder::create(base) {
                Ok(recorder) => self.recorder = Some(recorder),
                Err(e) => warn!("Recording disabled for this session: {:#}", e),
            }
        }
        Ok(())
    }

    /// End the conversation. Does nothing when already idle.
    pub fn stop(&mut self) {
        if self.is_idle() {
            debug!("Stop requested while idle");
            return;
        }
        info!("Stopping conversation");
        self.teardown();
        self.status = Status::Idle;
    }

    /// Release every resource the session holds.
    fn teardown(&mut self) {
        if self.is_idle() {
            return;
        }
        self.state = SessionState::Closing;

        if self.capturing {
            self.capture.stop();
            self.capturing = false;
        }
        // Frames still queued are dropped, not sent
        self.frames = None;

        self.scheduler.close();
        self.ended = None;

        if let Some(live) = self.live.take() {
            live.close();
        }

        if let Some(recorder) = self.recorder.take() {
            match recorder.finish() {
                Ok(dir) => info!("Conversation saved to {:?}", dir),
                Err(e) => warn!("Failed to finalize recording: {:#}", e),
            }
        }

        debug!("Session closed after {} frames", self.frames_sent);
        self.state = SessionState::Idle;
    }

    /// Wait for the next event. Returns `None` immediately when idle.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.is_idle() {
            return None;
        }

        tokio::select! {
            biased;
            event = next_live(&mut self.live) => Some(SessionEvent::Remote(event)),
            id = next_ended(&mut self.ended) => Some(SessionEvent::PlaybackEnded(id)),
            frame = next_frame(&mut self.frames) => Some(match frame {
                Some(frame) => SessionEvent::Frame(frame),
                None => SessionEvent::CaptureEnded,
            }),
        }
    }

    /// Apply one event.
    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Frame(frame) => self.on_frame(frame),
            SessionEvent::Remote(event) => self.on_remote(event),
            SessionEvent::PlaybackEnded(id) => self.scheduler.on_ended(id),
            SessionEvent::CaptureEnded => {
                if !self.is_idle() {
                    error!("Microphone stream ended unexpectedly");
                    self.teardown();
                    self.status = Status::Error("microphone disconnected".to_string());
                }
            }
        }
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        if self.state != SessionState::Active {
            trace!("Dropping frame captured while {:?}", self.state);
            return;
        }
        let Some(live) = &self.live else {
            return;
        };

        let blob = codec::encode_blob(&frame.samples, INPUT_SAMPLE_RATE);
        if !live.send_audio(blob) {
            warn!("Live transport gone, frame not sent");
            return;
        }
        self.frames_sent += 1;

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write_input(&frame.samples) {
                warn!("Failed to record input frame: {}", e);
            }
        }
    }

    fn on_remote(&mut self, event: LiveEvent) {
        if self.is_idle() {
            trace!("Ignoring stale remote event {:?}", event);
            return;
        }

        match event {
            LiveEvent::Open => {
                if self.state == SessionState::Connecting {
                    self.state = SessionState::Active;
                    self.status = Status::Listening;
                    info!("🟢 Session open, streaming microphone");
                }
            }
            LiveEvent::InputTranscript(text) => self.transcript.push_delta(Speaker::User, &text),
            LiveEvent::OutputTranscript(text) => self.transcript.push_delta(Speaker::Model, &text),
            LiveEvent::Audio(data) => self.on_audio(&data),
            LiveEvent::Interrupted => {
                self.scheduler.interrupt();
                self.transcript.mark_interrupted();
            }
            LiveEvent::TurnComplete => debug!("Model turn complete"),
            LiveEvent::Error(msg) => {
                error!("Live API error: {}", msg);
                self.teardown();
                self.status = Status::Error(msg);
            }
            LiveEvent::Closed => {
                info!("Remote closed the session");
                self.teardown();
                self.status = Status::Idle;
            }
        }
    }

    fn on_audio(&mut self, data: &str) {
        let buffer = match codec::decode_audio(data, OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Dropping undecodable audio fragment: {}", e);
                return;
            }
        };

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write_output(&buffer) {
                warn!("Failed to record output fragment: {}", e);
            }
        }

        if let Err(e) = self.scheduler.schedule(buffer) {
            warn!("Failed to schedule audio fragment: {}", e);
        }
    }
}

async fn next_live(live: &mut Option<LiveSession>) -> LiveEvent {
    match live {
        // A vanished transport is a close without a goodbye
        Some(session) => session.next_event().await.unwrap_or(LiveEvent::Closed),
        None => std::future::pending().await,
    }
}

async fn next_ended(ended: &mut Option<mpsc::UnboundedReceiver<PlaybackId>>) -> PlaybackId {
    loop {
        match ended {
            Some(rx) => match rx.recv().await {
                Some(id) => return id,
                None => *ended = None,
            },
            None => std::future::pending::<()>().await,
        }
    }
}

async fn next_frame(frames: &mut Option<mpsc::Receiver<AudioFrame>>) -> Option<AudioFrame> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeCapture, FakeConnector, FakePlayer};
    use crate::live::{LiveCommand, LiveEndpoint};
    use base64::engine::general_purpose;
    use base64::Engine;
    use std::time::Duration;

    type TestSession = VoiceSession<FakeCapture, FakePlayer, FakeConnector>;

    struct Harness {
        session: TestSession,
        capture: FakeCapture,
        player: FakePlayer,
        connector: FakeConnector,
    }

    fn harness() -> Harness {
        let capture = FakeCapture::new();
        let player = FakePlayer::new();
        let connector = FakeConnector::new();
        let session = VoiceSession::new(capture.clone(), player.clone(), connector.clone());
        Harness {
            session,
            capture,
            player,
            connector,
        }
    }

    /// Start and acknowledge a session, returning the remote endpoint.
    fn open(h: &mut Harness) -> LiveEndpoint {
        h.session.start().unwrap();
        h.session.handle(SessionEvent::Remote(LiveEvent::Open));
        h.connector.take_endpoint()
    }

    fn fragment(seconds: f64) -> LiveEvent {
        let samples = (seconds * OUTPUT_SAMPLE_RATE as f64) as usize;
        LiveEvent::Audio(general_purpose::STANDARD.encode(vec![0u8; samples * 2]))
    }

    fn frame(value: f32) -> AudioFrame {
        AudioFrame::new(vec![value; 8], INPUT_SAMPLE_RATE)
    }

    #[test]
    fn test_start_then_open() {
        let mut h = harness();
        h.session.start().unwrap();
        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(h.session.status().to_string(), "connecting");
        assert!(h.capture.is_capturing());
        assert_eq!(h.player.open_calls(), 1);

        h.session.handle(SessionEvent::Remote(LiveEvent::Open));
        assert_eq!(h.session.state(), SessionState::Active);
        assert_eq!(h.session.status().to_string(), "listening");
    }

    #[test]
    fn test_permission_denied_then_retry() {
        let mut h = harness();
        h.capture.deny(true);

        let err = h.session.start().unwrap_err();
        assert!(matches!(err, StartupError::Microphone(CaptureError::PermissionDenied(_))));
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.status(), &Status::PermissionDenied);
        assert_eq!(h.session.status().to_string(), "Mic permission denied");
        assert_eq!(h.connector.connects(), 0);
        assert_eq!(h.player.open_calls(), 0);
        assert_eq!(h.capture.stops(), 0);

        h.capture.deny(false);
        h.session.start().unwrap();
        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(h.capture.starts(), 1);
        assert_eq!(h.connector.connects(), 1);
    }

    #[test]
    fn test_connection_failure_releases_devices() {
        let mut h = harness();
        h.connector.fail(true);

        let err = h.session.start().unwrap_err();
        assert!(matches!(err, StartupError::Connection(_)));
        assert!(h.session.is_idle());
        assert!(matches!(h.session.status(), Status::Error(_)));
        assert_eq!(h.capture.stops(), 1);
        assert!(!h.capture.is_capturing());
        assert_eq!(h.player.close_calls(), 1);
    }

    #[test]
    fn test_output_failure_releases_microphone() {
        let mut h = harness();
        h.player.fail_open(true);

        assert!(matches!(h.session.start(), Err(StartupError::Output(_))));
        assert!(h.session.is_idle());
        assert_eq!(h.capture.stops(), 1);
        assert_eq!(h.connector.connects(), 0);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut h = harness();
        h.session.stop();
        h.session.stop();

        assert!(h.session.is_idle());
        assert_eq!(h.session.status(), &Status::Idle);
        assert_eq!(h.capture.stops(), 0);
        assert_eq!(h.player.close_calls(), 0);
    }

    #[test]
    fn test_stop_tears_down_once() {
        let mut h = harness();
        let mut endpoint = open(&mut h);

        h.session.stop();
        h.session.stop();

        assert!(h.session.is_idle());
        assert_eq!(h.capture.stops(), 1);
        assert_eq!(h.player.close_calls(), 1);
        assert_eq!(endpoint.commands.try_recv().unwrap(), LiveCommand::Close);
        assert!(endpoint.commands.try_recv().is_err());
    }

    #[test]
    fn test_frames_sent_only_when_active() {
        let mut h = harness();
        h.session.start().unwrap();
        let mut endpoint = h.connector.take_endpoint();

        h.session.handle(SessionEvent::Frame(frame(0.1)));
        assert!(endpoint.commands.try_recv().is_err());

        h.session.handle(SessionEvent::Remote(LiveEvent::Open));
        h.session.handle(SessionEvent::Frame(frame(0.5)));
        h.session.handle(SessionEvent::Frame(frame(-0.5)));

        let expected = [
            codec::encode_blob(&[0.5; 8], INPUT_SAMPLE_RATE),
            codec::encode_blob(&[-0.5; 8], INPUT_SAMPLE_RATE),
        ];
        for blob in expected {
            assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
            assert_eq!(endpoint.commands.try_recv().unwrap(), LiveCommand::Audio(blob));
        }
    }

    #[test]
    fn test_fragments_play_back_to_back() {
        let mut h = harness();
        let _endpoint = open(&mut h);

        for _ in 0..3 {
            h.session.handle(SessionEvent::Remote(fragment(1.0)));
        }

        assert_eq!(h.player.start_times(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_interruption_restarts_at_clock() {
        let mut h = harness();
        let _endpoint = open(&mut h);

        h.session.handle(SessionEvent::Remote(fragment(1.0)));
        h.player.set_clock(0.3);
        h.session.handle(SessionEvent::Remote(LiveEvent::Interrupted));
        h.session.handle(SessionEvent::Remote(fragment(1.0)));

        let started = h.player.started();
        assert_eq!(h.player.stopped(), vec![started[0].0]);
        assert_eq!(started[1].1, 0.3);
    }

    #[test]
    fn test_transcript_coalescing() {
        let mut h = harness();
        let _endpoint = open(&mut h);

        for event in [
            LiveEvent::InputTranscript("Hi ".to_string()),
            LiveEvent::InputTranscript("there".to_string()),
            LiveEvent::OutputTranscript("Hello".to_string()),
        ] {
            h.session.handle(SessionEvent::Remote(event));
        }

        let entries = h.session.transcript().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].speaker, entries[0].text.as_str()), (Speaker::User, "Hi there"));
        assert_eq!((entries[1].speaker, entries[1].text.as_str()), (Speaker::Model, "Hello"));
    }

    #[test]
    fn test_barge_in_flags_cut_off_model_entry() {
        let mut h = harness();
        let _endpoint = open(&mut h);

        for event in [
            LiveEvent::OutputTranscript("The price of millet is".to_string()),
            LiveEvent::InputTranscript("wait".to_string()),
            LiveEvent::Interrupted,
            LiveEvent::OutputTranscript("Yes?".to_string()),
        ] {
            h.session.handle(SessionEvent::Remote(event));
        }

        let entries = h.session.transcript().entries();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].interrupted);
        assert_eq!(entries[0].text, "The price of millet is");
        assert!(!entries[1].interrupted);
        assert_eq!((entries[2].speaker, entries[2].text.as_str()), (Speaker::Model, "Yes?"));
    }

    #[test]
    fn test_transcript_cleared_on_new_start() {
        let mut h = harness();
        let _endpoint = open(&mut h);
        h.session.handle(SessionEvent::Remote(LiveEvent::InputTranscript("hello".to_string())));
        h.session.stop();
        assert_eq!(h.session.transcript().len(), 1);

        h.session.start().unwrap();
        assert!(h.session.transcript().is_empty());
    }

    #[test]
    fn test_remote_error_tears_down() {
        let mut h = harness();
        let _endpoint = open(&mut h);
        h.session.handle(SessionEvent::Remote(fragment(1.0)));

        h.session.handle(SessionEvent::Remote(LiveEvent::Error("quota exceeded".to_string())));

        assert!(h.session.is_idle());
        assert_eq!(h.session.status().to_string(), "Error: quota exceeded");
        assert_eq!(h.capture.stops(), 1);
        assert_eq!(h.player.close_calls(), 1);
        assert_eq!(h.player.stopped().len(), 1);
    }

    #[test]
    fn test_remote_close_is_not_an_error() {
        let mut h = harness();
        let _endpoint = open(&mut h);

        h.session.handle(SessionEvent::Remote(LiveEvent::Closed));
        assert!(h.session.is_idle());
        assert_eq!(h.session.status(), &Status::Idle);

        // Late events from the old session change nothing
        h.session.handle(SessionEvent::Remote(fragment(1.0)));
        h.session.handle(SessionEvent::Remote(LiveEvent::Closed));
        assert!(h.player.started().is_empty());
        assert_eq!(h.capture.stops(), 1);
    }

    #[test]
    fn test_restart_while_active_tears_down_first() {
        let mut h = harness();
        let mut first = open(&mut h);
        h.session.handle(SessionEvent::Remote(fragment(2.0)));

        h.session.start().unwrap();

        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(first.commands.try_recv().unwrap(), LiveCommand::Close);
        assert_eq!(h.capture.starts(), 2);
        assert_eq!(h.capture.stops(), 1);
        assert_eq!(h.player.close_calls(), 1);
        assert_eq!(h.player.open_calls(), 2);
        assert_eq!(h.connector.connects(), 2);
        assert_eq!(h.session.scheduler().next_start(), 0.0);
    }

    #[test]
    fn test_bad_audio_is_dropped() {
        let mut h = harness();
        let _endpoint = open(&mut h);

        h.session.handle(SessionEvent::Remote(LiveEvent::Audio("@@@".to_string())));
        h.session.handle(SessionEvent::Remote(LiveEvent::Audio("AAE=".to_string())));

        assert_eq!(h.player.started().len(), 1);
        assert_eq!(h.session.state(), SessionState::Active);
    }

    #[test]
    fn test_capture_ended_tears_down() {
        let mut h = harness();
        let _endpoint = open(&mut h);

        h.session.handle(SessionEvent::CaptureEnded);
        assert!(h.session.is_idle());
        assert!(matches!(h.session.status(), Status::Error(_)));
    }

    #[tokio::test]
    async fn test_next_event_sources() {
        let mut h = harness();
        assert!(h.session.next_event().await.is_none());

        let endpoint = open(&mut h);

        endpoint.events.send(LiveEvent::TurnComplete).unwrap();
        assert_eq!(
            h.session.next_event().await,
            Some(SessionEvent::Remote(LiveEvent::TurnComplete))
        );

        assert!(h.capture.push(frame(0.2)));
        assert_eq!(h.session.next_event().await, Some(SessionEvent::Frame(frame(0.2))));

        h.session.handle(SessionEvent::Remote(fragment(0.1)));
        let (id, _, _) = h.player.started()[0];
        h.player.finish(id);
        assert_eq!(h.session.next_event().await, Some(SessionEvent::PlaybackEnded(id)));
        h.session.handle(SessionEvent::PlaybackEnded(id));
        assert_eq!(h.session.scheduler().active_count(), 0);

        drop(endpoint);
        let event = tokio::time::timeout(Duration::from_secs(1), h.session.next_event())
            .await
            .unwrap();
        assert_eq!(event, Some(SessionEvent::Remote(LiveEvent::Closed)));
    }

    #[tokio::test]
    async fn test_unplugged_microphone_surfaces_capture_ended() {
        let mut h = harness();
        let _endpoint = open(&mut h);

        h.capture.unplug();
        let event = tokio::time::timeout(Duration::from_secs(1), h.session.next_event())
            .await
            .unwrap();
        assert_eq!(event, Some(SessionEvent::CaptureEnded));
    }
}
