//! Running conversation transcript
//!
//! Transcription deltas arrive as many small fragments. Consecutive deltas
//! from the same speaker are folded into one growing entry so the log reads
//! as a back-and-forth rather than a stream of word pieces.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Model,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Model => "Model",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    /// The model was cut off while this entry was being spoken
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta, extending the last entry when the speaker matches.
    /// Empty deltas are ignored.
    pub fn push_delta(&mut self, speaker: Speaker, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.entries.last_mut() {
            Some(last) if last.speaker == speaker && !last.interrupted => {
                last.text.push_str(text);
            }
            _ => self.entries.push(TranscriptEntry {
                speaker,
                text: text.to_string(),
                interrupted: false,
            }),
        }
    }

    /// Flag the model's current entry as cut off. Its text is kept; the
    /// next model delta opens a new entry.
    ///
    /// The user's own words usually arrive before the interruption, so the
    /// model's entry need not be the last one.
    pub fn mark_interrupted(&mut self) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.speaker == Speaker::Model)
        {
            entry.interrupted = true;
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "{}: {}", entry.speaker, entry.text)?;
            if entry.interrupted {
                f.write_str(" [interrupted]")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
