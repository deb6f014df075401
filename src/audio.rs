//! Audio device capabilities
//!
//! The session orchestrator only talks to sound hardware through these two
//! traits, so it can run against PulseAudio (see `device`) or against fakes
//! that replay fixed frame and fragment sequences.

use crate::codec::AudioBuffer;
use tokio::sync::mpsc;

/// Samples per captured frame
pub const FRAME_SIZE: usize = 4096;

/// A fixed-size block of captured mono audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// Identifies one fragment handed to an [`AudioPlayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(pub u64);

/// Microphone acquisition failures
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The user declined access or there is no usable input device
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("capture device error: {0}")]
    Device(String),
}

/// Audio output failures
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    Unavailable(String),

    #[error("audio output is not open")]
    NotOpen,

    #[error("unsupported buffer: {0}")]
    Unsupported(String),
}

/// Source of microphone frames.
pub trait AudioCapture: Send {
    /// Acquire the device and begin delivering frames on `frames`, in
    /// capture order, until [`AudioCapture::stop`] is called.
    fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<(), CaptureError>;

    /// Disconnect from the device. No frame is delivered afterwards.
    /// Calling this when not capturing does nothing.
    fn stop(&mut self);
}

/// Sink for decoded fragments, scheduled on the output device clock.
pub trait AudioPlayer: Send {
    /// Acquire the output device. Naturally finished fragments are
    /// reported on `ended`.
    fn open(&mut self, ended: mpsc::UnboundedSender<PlaybackId>) -> Result<(), PlaybackError>;

    /// Output clock in seconds, 0.0 when the device was opened.
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at clock time `at`.
    fn start(&mut self, buffer: AudioBuffer, at: f64) -> Result<PlaybackId, PlaybackError>;

    /// Silence a scheduled or playing fragment. Unknown ids are ignored.
    fn stop(&mut self, id: PlaybackId);

    /// Release the output device.
    fn close(&mut self);
}
