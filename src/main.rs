//! Baaylive - talk to Gemini from the terminal
//!
//! Press Enter to start or stop a conversation, `q` then Enter to quit.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use baaylive::device::{PulseCapture, PulsePlayer};
use baaylive::runner::{self, Command, Snapshot, TranscriptFeed};
use baaylive::{Config, GeminiConnector, VoiceSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("baaylive=info")),
        )
        .init();

    let config = Config::from_env().context("Cannot start without credentials")?;
    info!("Starting baaylive with {}", config.model);

    let session = VoiceSession::new(
        PulseCapture::new(None),
        PulsePlayer::new(None),
        GeminiConnector::new(config.client_config()),
    )
    .with_recording(config.record_dir.clone());

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = watch::channel(Snapshot::default());
    let runner = tokio::spawn(runner::run(session, command_rx, update_tx));
    let printer = tokio::spawn(print_updates(update_rx));

    println!("🎤 Press Enter to start or stop talking, q to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let command = match line {
                    Ok(Some(line)) if line.trim().eq_ignore_ascii_case("q") => Command::Shutdown,
                    Ok(Some(_)) => Command::Toggle,
                    Ok(None) => Command::Shutdown,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        Command::Shutdown
                    }
                };
                let shutdown = command == Command::Shutdown;
                if command_tx.send(command).is_err() || shutdown {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
                let _ = command_tx.send(Command::Shutdown);
                break;
            }
        }
    }

    runner.await.context("Session task panicked")?;
    printer.await.context("Printer task panicked")?;
    Ok(())
}

/// Print status changes and finished transcript lines until the runner exits.
async fn print_updates(mut updates: watch::Receiver<Snapshot>) {
    let mut feed = TranscriptFeed::new();
    let mut status = String::new();

    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();

        for line in feed.settled_lines(&snapshot) {
            println!("{}", line);
        }

        let current = snapshot.status.to_string();
        if current != status {
            println!("[{}]", current);
            status = current;
        }
    }
}
