//! PulseAudio backends for the audio capabilities
//!
//! Capture and playback each run on a dedicated OS thread using PulseAudio's
//! simple API; the session talks to them only through the traits in `audio`.

mod capture;
mod playback;

pub use capture::PulseCapture;
pub use playback::PulsePlayer;

use crate::audio::CaptureError;
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use libpulse_binding::def::Retval;
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::proplist::{properties, Proplist};
use std::sync::{Arc, Mutex};
use tokio::runtime::RuntimeFlavor;
use tracing::error;

/// Application name reported to the sound server
pub const APP_NAME: &str = "baaylive";

/// An input source known to the sound server
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub name: String,
    pub description: String,
    pub sample_rate: u32,
    pub channels: u8,
    /// Monitor of an output sink rather than a microphone
    pub is_monitor: bool,
}

/// Run a blocking device call without starving the async runtime.
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn device_error(msg: impl Into<String>) -> CaptureError {
    CaptureError::Device(msg.into())
}

/// Drive the mainloop once, failing if it has stopped.
fn iterate(mainloop: &mut Mainloop) -> Result<(), CaptureError> {
    match mainloop.iterate(false) {
        IterateResult::Success(_) => Ok(()),
        IterateResult::Quit(_) | IterateResult::Err(_) => Err(device_error("mainloop iterate failed")),
    }
}

/// List the input sources, microphones first.
pub fn list_sources() -> Result<Vec<SourceInfo>, CaptureError> {
    let mut proplist = Proplist::new().ok_or_else(|| device_error("failed to create proplist"))?;
    proplist
        .set_str(properties::APPLICATION_NAME, APP_NAME)
        .map_err(|_| device_error("failed to set application name"))?;

    let mut mainloop = Mainloop::new().ok_or_else(|| device_error("failed to create mainloop"))?;
    let mut context = Context::new_with_proplist(&mainloop, "baaylive-lister", &proplist)
        .ok_or_else(|| device_error("failed to create context"))?;

    context
        .connect(None, ContextFlagSet::NOFLAGS, None)
        .map_err(|e| device_error(format!("failed to connect to sound server: {}", e)))?;

    loop {
        iterate(&mut mainloop)?;
        match context.get_state() {
            ContextState::Ready => break,
            ContextState::Failed | ContextState::Terminated => {
                return Err(device_error("sound server connection failed"));
            }
            _ => {}
        }
    }

    let sources = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(Mutex::new(false));

    let collected = sources.clone();
    let finished = done.clone();
    let _op = context.introspect().get_source_info_list(move |result| match result {
        ListResult::Item(info) => {
            let name = info.name.as_ref().map(|s| s.to_string());
            let description = info.description.as_ref().map(|s| s.to_string());
            if let (Some(name), Some(description)) = (name, description) {
                let is_monitor = info.monitor_of_sink.is_some() || name.contains("monitor");
                if let Ok(mut sources) = collected.lock() {
                    sources.push(SourceInfo {
                        name,
                        description,
                        sample_rate: info.sample_spec.rate,
                        channels: info.sample_spec.channels,
                        is_monitor,
                    });
                }
            }
        }
        ListResult::End => {
            if let Ok(mut done) = finished.lock() {
                *done = true;
            }
        }
        ListResult::Error => {
            error!("Error listing audio sources");
            if let Ok(mut done) = finished.lock() {
                *done = true;
            }
        }
    });

    loop {
        iterate(&mut mainloop)?;
        if done.lock().map(|d| *d).unwrap_or(true) {
            break;
        }
    }

    context.disconnect();
    mainloop.quit(Retval(0));

    let mut sources = sources
        .lock()
        .map_err(|_| device_error("source list poisoned"))?
        .clone();
    sources.sort_by_key(|s| s.is_monitor);
    Ok(sources)
}
