//! Baaylive - spoken conversations with the Gemini Live API
//!
//! Streams the microphone to a live model session and plays the spoken reply
//! back gaplessly, keeping a running transcript of both sides.

pub mod audio;
pub mod codec;
pub mod config;
#[cfg(feature = "pulse")]
pub mod device;
pub mod gemini;
pub mod gemini_client;
pub mod live;
pub mod playback;
pub mod recorder;
pub mod runner;
pub mod session;
pub mod transcript;

#[cfg(test)]
pub(crate) mod fakes;

pub use config::Config;
pub use gemini_client::GeminiConnector;
pub use runner::{Command, Snapshot};
pub use session::{SessionState, Status, VoiceSession};
