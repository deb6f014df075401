//! Remote conversational session handle
//!
//! A [`LiveConnector`] opens a session and hands back a [`LiveSession`]
//! immediately; the connection is established in the background and
//! reports progress as [`LiveEvent`]s, starting with `Open`.

use crate::codec::Blob;
use crate::gemini::GeminiError;
use tokio::sync::mpsc;
use tracing::debug;

/// Inbound events from the remote agent, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// Session accepted, audio may flow
    Open,
    /// Recognized user speech (delta)
    InputTranscript(String),
    /// Text of the model's spoken output (delta)
    OutputTranscript(String),
    /// Base64 PCM at 24 kHz
    Audio(String),
    /// The user talked over the model
    Interrupted,
    TurnComplete,
    Error(String),
    /// Graceful remote close
    Closed,
}

/// Outbound requests from the session handle to the transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveCommand {
    Audio(Blob),
    Close,
}

/// Client side of an open (or opening) remote session.
#[derive(Debug)]
pub struct LiveSession {
    commands: mpsc::UnboundedSender<LiveCommand>,
    events: mpsc::UnboundedReceiver<LiveEvent>,
}

/// Transport side of a session, owned by the connector's task.
#[derive(Debug)]
pub struct LiveEndpoint {
    pub commands: mpsc::UnboundedReceiver<LiveCommand>,
    pub events: mpsc::UnboundedSender<LiveEvent>,
}

impl LiveSession {
    /// Create a connected session/endpoint pair.
    pub fn pair() -> (LiveSession, LiveEndpoint) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            LiveSession {
                commands: command_tx,
                events: event_rx,
            },
            LiveEndpoint {
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    /// Queue one audio chunk. Returns false if the transport is gone.
    pub fn send_audio(&self, blob: Blob) -> bool {
        self.commands.send(LiveCommand::Audio(blob)).is_ok()
    }

    /// Next inbound event; `None` once the transport has shut down.
    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }

    /// Ask the transport to close. Does not wait for it.
    pub fn close(self) {
        if self.commands.send(LiveCommand::Close).is_err() {
            debug!("Live transport already gone at close");
        }
    }
}

/// Opens remote sessions.
pub trait LiveConnector: Send {
    fn connect(&mut self) -> Result<LiveSession, GeminiError>;
}
