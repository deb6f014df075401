//! Playback scheduler
//!
//! Fragments from the model arrive one by one; each is placed on the output
//! clock at `max(next_start, now)` so playback is gapless, never overlaps and
//! never starts in the past. An interruption silences everything and rewinds
//! the cursor so the next reply starts immediately.

use crate::audio::{AudioPlayer, PlaybackError, PlaybackId};
use crate::codec::AudioBuffer;
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Where a fragment landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFragment {
    pub id: PlaybackId,
    pub start: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler<P> {
    player: P,
    next_start: f64,
    active: BTreeSet<PlaybackId>,
    open: bool,
}

impl<P: AudioPlayer> PlaybackScheduler<P> {
    pub fn new(player: P) -> Self {
        Self {
            player,
            next_start: 0.0,
            active: BTreeSet::new(),
            open: false,
        }
    }

    /// Open the output device with a fresh timeline.
    pub fn open(&mut self, ended: mpsc::UnboundedSender<PlaybackId>) -> Result<(), PlaybackError> {
        if self.open {
            self.close();
        }
        self.next_start = 0.0;
        self.player.open(ended)?;
        self.open = true;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Queue a fragment behind everything already scheduled.
    pub fn schedule(&mut self, buffer: AudioBuffer) -> Result<ScheduledFragment, PlaybackError> {
        if !self.open {
            return Err(PlaybackError::NotOpen);
        }

        let start = self.next_start.max(self.player.current_time());
        let duration = buffer.duration();
        let id = self.player.start(buffer, start)?;

        self.next_start = start + duration;
        self.active.insert(id);
        debug!(
            "Scheduled fragment {:?} at {:.3}s for {:.3}s ({} active)",
            id,
            start,
            duration,
            self.active.len()
        );

        Ok(ScheduledFragment { id, start, duration })
    }

    /// The player finished a fragment on its own.
    pub fn on_ended(&mut self, id: PlaybackId) {
        self.active.remove(&id);
    }

    /// Barge-in: stop every fragment and rewind the cursor.
    pub fn interrupt(&mut self) {
        if !self.active.is_empty() {
            info!("🔇 Interrupted, stopping {} fragment(s)", self.active.len());
        }
        self.stop_all();
        self.next_start = 0.0;
    }

    /// Stop everything and release the output device. Idempotent.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.stop_all();
        self.next_start = 0.0;
        self.player.close();
        self.open = false;
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn stop_all(&mut self) {
        for id in std::mem::take(&mut self.active) {
            self.player.stop(id);
        }
    }
}
