//! Session actor loop
//!
//! Owns a [`VoiceSession`] and serializes user commands with device and
//! remote events, publishing a [`Snapshot`] for the UI after every step.

use crate::audio::{AudioCapture, AudioPlayer};
use crate::live::LiveConnector;
use crate::session::{SessionState, Status, VoiceSession};
use crate::transcript::TranscriptEntry;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// User intents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Start when idle, stop otherwise
    Toggle,
    Shutdown,
}

/// What the UI renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Changes whenever a new conversation starts
    pub conversation: u64,
    pub state: SessionState,
    pub status: Status,
    pub transcript: Vec<TranscriptEntry>,
}

impl<C, P, R> VoiceSession<C, P, R>
where
    C: AudioCapture,
    P: AudioPlayer,
    R: LiveConnector,
{
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            conversation: self.conversation(),
            state: self.state(),
            status: self.status().clone(),
            transcript: self.transcript().entries().to_vec(),
        }
    }
}

/// Turns a stream of snapshots into transcript lines, each printed once.
///
/// An entry is emitted when it can no longer grow: a later entry exists or
/// the session is idle. Snapshots may be skipped, so a new conversation is
/// detected by its number rather than by the transcript shrinking.
#[derive(Debug, Default)]
pub struct TranscriptFeed {
    conversation: u64,
    printed: usize,
}

impl TranscriptFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settled_lines(&mut self, snapshot: &Snapshot) -> Vec<String> {
        if snapshot.conversation != self.conversation {
            self.conversation = snapshot.conversation;
            self.printed = 0;
        }

        let settled = match snapshot.state {
            SessionState::Idle => snapshot.transcript.len(),
            _ => snapshot.transcript.len().saturating_sub(1),
        };
        let start = self.printed.min(settled);
        self.printed = self.printed.max(settled);

        snapshot.transcript[start..settled]
            .iter()
            .map(|entry| {
                let suffix = if entry.interrupted { " [interrupted]" } else { "" };
                format!("{}: {}{}", entry.speaker, entry.text.trim(), suffix)
            })
            .collect()
    }
}

/// Drive `session` until `Shutdown` or until every command sender is gone.
/// The session is stopped and handed back.
pub async fn run<C, P, R>(
    mut session: VoiceSession<C, P, R>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    updates: watch::Sender<Snapshot>,
) -> VoiceSession<C, P, R>
where
    C: AudioCapture,
    P: AudioPlayer,
    R: LiveConnector,
{
    publish(&session, &updates);

    loop {
        let idle = session.is_idle();
        tokio::select! {
            command = commands.recv() => {
                let command = command.unwrap_or(Command::Shutdown);
                debug!("Command: {:?}", command);
                match command {
                    Command::Start => start(&mut session),
                    Command::Stop => session.stop(),
                    Command::Toggle if idle => start(&mut session),
                    Command::Toggle => session.stop(),
                    Command::Shutdown => break,
                }
            }
            Some(event) = session.next_event(), if !idle => session.handle(event),
        }
        publish(&session, &updates);
    }

    info!("Session loop shutting down");
    session.stop();
    publish(&session, &updates);
    session
}

fn start<C, P, R>(session: &mut VoiceSession<C, P, R>)
where
    C: AudioCapture,
    P: AudioPlayer,
    R: LiveConnector,
{
    // The failure is already reflected in the status
    let _ = session.start();
}

fn publish<C, P, R>(session: &VoiceSession<C, P, R>, updates: &watch::Sender<Snapshot>)
where
    C: AudioCapture,
    P: AudioPlayer,
    R: LiveConnector,
{
    let snapshot = session.snapshot();
    updates.send_if_modified(|current| {
        if *current == snapshot {
            false
        } else {
            *current = snapshot;
            true
        }
    });
}
