//! Speaker output with a sample-accurate software mixer
//!
//! The mixer thread writes fixed blocks to a PulseAudio playback stream kept
//! at a short target latency. The index of the next frame to be mixed is the
//! output clock; each scheduled fragment is mixed in from its start frame
//! until it runs out. Stopping a fragment that has already been handed to the
//! server flushes the server buffer so it goes silent at once.

use super::{run_blocking, APP_NAME};
use crate::audio::{AudioPlayer, PlaybackError, PlaybackId};
use crate::codec::{AudioBuffer, OUTPUT_SAMPLE_RATE};
use libpulse_binding::def::BufferAttr;
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Frames rendered per write (20 ms)
const BLOCK_FRAMES: usize = 480;

/// Audio the server may hold ahead of the speaker (60 ms)
const TARGET_LATENCY_FRAMES: usize = 1440;

struct Voice {
    id: PlaybackId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Default)]
struct Mixer {
    voices: Vec<Voice>,
    /// First frame not yet mixed
    next_frame: u64,
    /// Audio already written must be discarded
    flush: bool,
}

impl Mixer {
    /// Queue a voice. Starts never fall behind the mixer.
    fn add(&mut self, id: PlaybackId, start_frame: u64, samples: Vec<f32>) {
        self.voices.push(Voice {
            id,
            start_frame: start_frame.max(self.next_frame),
            samples,
        });
    }

    fn remove(&mut self, id: PlaybackId) {
        let Some(index) = self.voices.iter().position(|v| v.id == id) else {
            return;
        };
        let voice = self.voices.swap_remove(index);
        if voice.start_frame < self.next_frame {
            self.flush = true;
        }
    }

    /// Mix the next block. Returns the voices that ran out within it.
    fn render(&mut self, block: &mut [f32]) -> Vec<PlaybackId> {
        mix_block(&self.voices, self.next_frame, block);
        let block_end = self.next_frame + block.len() as u64;

        let mut finished = Vec::new();
        self.voices.retain(|voice| {
            if voice.end_frame() <= block_end {
                finished.push(voice.id);
                false
            } else {
                true
            }
        });
        self.next_frame = block_end;
        finished
    }
}

struct Output {
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

fn lock(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn playback_spec() -> Spec {
    Spec {
        format: Format::F32le,
        channels: 1,
        rate: OUTPUT_SAMPLE_RATE,
    }
}

fn playback_buffer() -> BufferAttr {
    BufferAttr {
        maxlength: u32::MAX,
        tlength: (TARGET_LATENCY_FRAMES * std::mem::size_of::<f32>()) as u32,
        prebuf: u32::MAX,
        minreq: u32::MAX,
        fragsize: u32::MAX,
    }
}

/// Plays mono f32 at 24 kHz on the default (or a named) sink.
pub struct PulsePlayer {
    device: Option<String>,
    output: Option<Output>,
    next_id: u64,
}

impl PulsePlayer {
    pub fn new(device: Option<String>) -> Self {
        Self {
            device,
            output: None,
            next_id: 0,
        }
    }
}

impl AudioPlayer for PulsePlayer {
    fn open(&mut self, ended: mpsc::UnboundedSender<PlaybackId>) -> Result<(), PlaybackError> {
        self.close();

        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let clock = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));
        let device = self.device.clone();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        let thread_mixer = mixer.clone();
        let thread_clock = clock.clone();
        let thread_shutdown = shutdown.clone();
        let handle = thread::Builder::new()
            .name("pulse-playback".to_string())
            .spawn(move || {
                let simple = match Simple::new(
                    None,
                    APP_NAME,
                    Direction::Playback,
                    device.as_deref(),
                    "assistant voice",
                    &playback_spec(),
                    None,
                    Some(&playback_buffer()),
                ) {
                    Ok(simple) => {
                        let _ = ready_tx.send(Ok(()));
                        simple
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{}", e)));
                        return;
                    }
                };
                run_mixer(simple, thread_mixer, thread_clock, thread_shutdown, ended);
            })
            .map_err(|e| PlaybackError::Unavailable(e.to_string()))?;

        match run_blocking(|| ready_rx.recv()) {
            Ok(Ok(())) => {
                info!("🔊 Audio output open");
                self.output = Some(Output {
                    mixer,
                    clock,
                    shutdown,
                    handle,
                });
                Ok(())
            }
            Ok(Err(msg)) => Err(PlaybackError::Unavailable(msg)),
            Err(_) => Err(PlaybackError::Unavailable(
                "playback thread exited during startup".to_string(),
            )),
        }
    }

    fn current_time(&self) -> f64 {
        match &self.output {
            Some(output) => output.clock.load(Ordering::Relaxed) as f64 / OUTPUT_SAMPLE_RATE as f64,
            None => 0.0,
        }
    }

    fn start(&mut self, buffer: AudioBuffer, at: f64) -> Result<PlaybackId, PlaybackError> {
        let output = self.output.as_ref().ok_or(PlaybackError::NotOpen)?;
        if buffer.sample_rate() != OUTPUT_SAMPLE_RATE {
            return Err(PlaybackError::Unsupported(format!(
                "expected {} Hz, got {} Hz",
                OUTPUT_SAMPLE_RATE,
                buffer.sample_rate()
            )));
        }

        let id = PlaybackId(self.next_id);
        self.next_id += 1;
        let start_frame = (at.max(0.0) * OUTPUT_SAMPLE_RATE as f64).round() as u64;
        lock(&output.mixer).add(id, start_frame, buffer.downmix());
        Ok(id)
    }

    fn stop(&mut self, id: PlaybackId) {
        if let Some(output) = &self.output {
            lock(&output.mixer).remove(id);
        }
    }

    fn close(&mut self) {
        if let Some(output) = self.output.take() {
            output.shutdown.store(true, Ordering::Relaxed);
            lock(&output.mixer).voices.clear();
            if run_blocking(|| output.handle.join()).is_err() {
                warn!("Playback thread panicked");
            }
            debug!("Audio output released");
        }
    }
}

impl Drop for PulsePlayer {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_mixer(
    simple: Simple,
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    ended: mpsc::UnboundedSender<PlaybackId>,
) {
    let mut block = vec![0.0f32; BLOCK_FRAMES];

    while !shutdown.load(Ordering::Relaxed) {
        let (finished, flush) = {
            let mut mixer = lock(&mixer);
            let flush = std::mem::take(&mut mixer.flush);
            let finished = mixer.render(&mut block);
            clock.store(mixer.next_frame, Ordering::Relaxed);
            (finished, flush)
        };

        if flush {
            if let Err(e) = simple.flush() {
                warn!("Audio output flush failed: {}", e);
            }
        }
        for id in finished {
            let _ = ended.send(id);
        }

        if let Err(e) = simple.write(bytemuck::cast_slice(&block)) {
            error!("Audio output write failed: {}", e);
            break;
        }
    }

    // Closing mid-sentence must not play out the buffered tail
    if let Err(e) = simple.flush() {
        debug!("Flush on close failed: {}", e);
    }
    debug!("Mixer thread exiting");
}

/// Sum every voice overlapping `[clock, clock + block.len())` into `block`.
fn mix_block(voices: &[Voice], clock: u64, block: &mut [f32]) {
    block.fill(0.0);
    let block_end = clock + block.len() as u64;

    for voice in voices {
        if voice.start_frame >= block_end || voice.end_frame() <= clock {
            continue;
        }
        let from = voice.start_frame.max(clock);
        let to = voice.end_frame().min(block_end);
        for frame in from..to {
            block[(frame - clock) as usize] += voice.samples[(frame - voice.start_frame) as usize];
        }
    }

    for sample in block.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}
