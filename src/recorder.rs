//! Conversation recorder - saves both audio directions as WAV files

use crate::codec::{quantize, AudioBuffer, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use anyhow::{Context, Result};
use chrono::Local;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

type Writer = WavWriter<BufWriter<File>>;

pub struct SessionRecorder {
    dir: PathBuf,      // <base>/20250603_153055/
    input: Writer,     // what was transmitted, 16 kHz
    output: Writer,    // every received fragment, 24 kHz
}

fn mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

impl SessionRecorder {
    /// Create a timestamped directory under `base` and open both files.
    pub fn create(base: &Path) -> Result<Self> {
        let ts = Local::now().format("%Y%m%d_%H%M%S%.3f").to_string();
        let dir = base.join(ts);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create recording directory {:?}", dir))?;

        let input = WavWriter::create(dir.join("input.wav"), mono_spec(INPUT_SAMPLE_RATE))
            .context("Failed to create input.wav")?;
        let output = WavWriter::create(dir.join("output.wav"), mono_spec(OUTPUT_SAMPLE_RATE))
            .context("Failed to create output.wav")?;

        info!("Recording conversation to {:?}", dir);
        Ok(Self { dir, input, output })
    }

    /// Append a transmitted frame.
    pub fn write_input(&mut self, samples: &[f32]) -> Result<()> {
        for &sample in samples {
            self.input.write_sample(quantize(sample))?;
        }
        Ok(())
    }

    /// Append a received fragment, downmixed to mono.
    pub fn write_output(&mut self, buffer: &AudioBuffer) -> Result<()> {
        for sample in buffer.downmix() {
            self.output.write_sample(quantize(sample))?;
        }
        Ok(())
    }

    /// Flush headers and close both files.
    pub fn finish(self) -> Result<PathBuf> {
        self.input.finalize().context("Failed to finalize input.wav")?;
        self.output.finalize().context("Failed to finalize output.wav")?;
        debug!("Recording finalized in {:?}", self.dir);
        Ok(self.dir)
    }
}
