//! Microphone capture on a dedicated OS thread

use super::{run_blocking, APP_NAME};
use crate::audio::{AudioCapture, AudioFrame, CaptureError, FRAME_SIZE};
use crate::codec::INPUT_SAMPLE_RATE;
use libpulse_binding::def::BufferAttr;
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

/// Samples per device read (100 ms); bounds how long `stop` waits
const READ_SAMPLES: usize = 1600;

const SEND_RETRY: Duration = Duration::from_millis(5);

struct Worker {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Records mono f32 at 16 kHz from the default (or a named) source.
pub struct PulseCapture {
    device: Option<String>,
    worker: Option<Worker>,
}

impl PulseCapture {
    pub fn new(device: Option<String>) -> Self {
        Self {
            device,
            worker: None,
        }
    }
}

fn record_spec() -> Spec {
    Spec {
        format: Format::F32le,
        channels: 1,
        rate: INPUT_SAMPLE_RATE,
    }
}

fn record_buffer() -> BufferAttr {
    BufferAttr {
        maxlength: u32::MAX,
        tlength: u32::MAX,
        prebuf: u32::MAX,
        minreq: u32::MAX,
        fragsize: (READ_SAMPLES * std::mem::size_of::<f32>()) as u32,
    }
}

impl AudioCapture for PulseCapture {
    fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<(), CaptureError> {
        self.stop();

        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let device = self.device.clone();
        let flag = shutdown.clone();

        let handle = thread::Builder::new()
            .name("pulse-capture".to_string())
            .spawn(move || {
                let simple = match Simple::new(
                    None,
                    APP_NAME,
                    Direction::Record,
                    device.as_deref(),
                    "microphone",
                    &record_spec(),
                    None,
                    Some(&record_buffer()),
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
                run_capture(simple, frames, flag);
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        match run_blocking(|| ready_rx.recv()) {
            Ok(Ok(())) => {
                info!("🎙️ Microphone open ({})", self.device.as_deref().unwrap_or("default source"));
                self.worker = Some(Worker { shutdown, handle });
                Ok(())
            }
            Ok(Err(msg)) => Err(CaptureError::PermissionDenied(msg)),
            Err(_) => Err(CaptureError::Device("capture thread exited during startup".to_string())),
        }
    }

    /// Signal the record thread and wait for it to close the stream, so no
    /// frame is delivered once this returns.
    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown.store(true, Ordering::Relaxed);
            if run_blocking(|| worker.handle.join()).is_err() {
                warn!("Capture thread panicked");
            }
            debug!("Microphone released");
        }
    }
}

impl Drop for PulseCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Regroups device reads into fixed-size frames.
#[derive(Debug, Default)]
struct FrameAssembler {
    pending: Vec<f32>,
}

impl FrameAssembler {
    fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= FRAME_SIZE {
            let rest = self.pending.split_off(FRAME_SIZE);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }
}

fn run_capture(simple: Simple, frames: mpsc::Sender<AudioFrame>, shutdown: Arc<AtomicBool>) {
    let mut chunk = vec![0.0f32; READ_SAMPLES];
    let mut assembler = FrameAssembler::default();

    'read: while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = simple.read(bytemuck::cast_slice_mut(&mut chunk)) {
            error!("Microphone read failed: {}", e);
            break;
        }
        for samples in assembler.push(&chunk) {
            let mut frame = AudioFrame::new(samples, INPUT_SAMPLE_RATE);
            // Poll rather than block so `stop` can always join us
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    break 'read;
                }
                match frames.try_send(frame) {
                    Ok(()) => break,
                    Err(TrySendError::Full(returned)) => {
                        frame = returned;
                        thread::sleep(SEND_RETRY);
                    }
                    // Receiver gone means the session let go of us
                    Err(TrySendError::Closed(_)) => break 'read,
                }
            }
        }
    }
    debug!("Capture thread exiting");
}
