//! Test doubles for the device and remote-session capabilities.
//!
//! Each fake is a cheap clonable handle over shared state, so a test can
//! move one clone into the code under test and inspect the other.

use crate::audio::{AudioCapture, AudioFrame, AudioPlayer, CaptureError, PlaybackError, PlaybackId};
use crate::codec::AudioBuffer;
use crate::gemini::GeminiError;
use crate::live::{LiveConnector, LiveEndpoint, LiveSession};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

fn lock<T>(state: &Arc<Mutex<T>>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct CaptureState {
    deny: bool,
    starts: usize,
    stops: usize,
    frames: Option<mpsc::Sender<AudioFrame>>,
}

#[derive(Clone, Default)]
pub struct FakeCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent starts fail as if the user declined access.
    pub fn deny(&self, deny: bool) {
        lock(&self.state).deny = deny;
    }

    /// Deliver a frame as the hardware would. Returns false when nobody is listening.
    pub fn push(&self, frame: AudioFrame) -> bool {
        match &lock(&self.state).frames {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Simulate the device going away.
    pub fn unplug(&self) {
        lock(&self.state).frames = None;
    }

    pub fn starts(&self) -> usize {
        lock(&self.state).starts
    }

    pub fn stops(&self) -> usize {
        lock(&self.state).stops
    }

    pub fn is_capturing(&self) -> bool {
        lock(&self.state).frames.is_some()
    }
}

impl AudioCapture for FakeCapture {
    fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<(), CaptureError> {
        let mut state = lock(&self.state);
        if state.deny {
            return Err(CaptureError::PermissionDenied("denied by test".to_string()));
        }
        state.starts += 1;
        state.frames = Some(frames);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        state.stops += 1;
        state.frames = None;
    }
}

#[derive(Default)]
struct PlayerState {
    fail_open: bool,
    clock: f64,
    next_id: u64,
    open_calls: usize,
    close_calls: usize,
    started: Vec<(PlaybackId, f64, f64)>,
    stopped: Vec<PlaybackId>,
    ended: Option<mpsc::UnboundedSender<PlaybackId>>,
}

#[derive(Clone, Default)]
pub struct FakePlayer {
    state: Arc<Mutex<PlayerState>>,
}

impl FakePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn set_clock(&self, seconds: f64) {
        lock(&self.state).clock = seconds;
    }

    /// Report a fragment as finished through the `ended` channel.
    pub fn finish(&self, id: PlaybackId) {
        if let Some(tx) = &lock(&self.state).ended {
            let _ = tx.send(id);
        }
    }

    /// `(id, start, duration)` for every fragment started, in order.
    pub fn started(&self) -> Vec<(PlaybackId, f64, f64)> {
        lock(&self.state).started.clone()
    }

    pub fn start_times(&self) -> Vec<f64> {
        lock(&self.state).started.iter().map(|(_, at, _)| *at).collect()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        lock(&self.state).stopped.clone()
    }

    pub fn open_calls(&self) -> usize {
        lock(&self.state).open_calls
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }
}

impl AudioPlayer for FakePlayer {
    fn open(&mut self, ended: mpsc::UnboundedSender<PlaybackId>) -> Result<(), PlaybackError> {
        let mut state = lock(&self.state);
        if state.fail_open {
            return Err(PlaybackError::Unavailable("no output in test".to_string()));
        }
        state.open_calls += 1;
        state.ended = Some(ended);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).clock
    }

    fn start(&mut self, buffer: AudioBuffer, at: f64) -> Result<PlaybackId, PlaybackError> {
        let mut state = lock(&self.state);
        let id = PlaybackId(state.next_id);
        state.next_id += 1;
        state.started.push((id, at, buffer.duration()));
        Ok(id)
    }

    fn stop(&mut self, id: PlaybackId) {
        lock(&self.state).stopped.push(id);
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.close_calls += 1;
        state.ended = None;
    }
}

#[derive(Default)]
struct ConnectorState {
    fail: bool,
    connects: usize,
    endpoints: Vec<LiveEndpoint>,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        lock(&self.state).fail = fail;
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    /// Take the transport side of the most recent session.
    pub fn take_endpoint(&self) -> LiveEndpoint {
        lock(&self.state)
            .endpoints
            .pop()
            .expect("no session was opened")
    }
}

impl LiveConnector for FakeConnector {
    fn connect(&mut self) -> Result<LiveSession, GeminiError> {
        let mut state = lock(&self.state);
        if state.fail {
            return Err(GeminiError::ConnectionClosed);
        }
        state.connects += 1;
        let (session, endpoint) = LiveSession::pair();
        state.endpoints.push(endpoint);
        Ok(session)
    }
}
