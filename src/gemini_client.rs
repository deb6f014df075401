//! Gemini Live API client
//!
//! Opens the WebSocket, performs the setup handshake and then pumps audio
//! out and server events in from a single background task. The socket is
//! split into sink and stream halves so reads and writes interleave freely.

use crate::gemini::{
    ClientMessage, GeminiClientConfig, GeminiError, RealtimeInput, Result, ServerContent,
    ServerMessage,
};
use crate::live::{LiveCommand, LiveConnector, LiveEndpoint, LiveEvent, LiveSession};

use futures_util::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Maximum number of messages to skip while waiting for `setupComplete`
const SETUP_MESSAGE_LIMIT: usize = 10;

/// Opens Live API sessions from a fixed configuration.
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    config: GeminiClientConfig,
}

impl GeminiConnector {
    pub fn new(config: GeminiClientConfig) -> Self {
        Self { config }
    }
}

impl LiveConnector for GeminiConnector {
    fn connect(&mut self) -> Result<LiveSession> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| GeminiError::NoRuntime)?;
        let (session, endpoint) = LiveSession::pair();
        let config = self.config.clone();

        runtime.spawn(async move {
            let events = endpoint.events.clone();
            if let Err(e) = run_connection(config, endpoint).await {
                error!("Live session failed: {}", e);
                let _ = events.send(LiveEvent::Error(e.to_string()));
            }
        });

        Ok(session)
    }
}

/// Drive one session until either side closes it.
async fn run_connection(config: GeminiClientConfig, endpoint: LiveEndpoint) -> Result<()> {
    let LiveEndpoint {
        mut commands,
        events,
    } = endpoint;

    info!("Connecting to Gemini Live API ({})", config.model);
    let (ws_stream, resp) = connect_async(&config.url).await?;
    debug!("WebSocket connection response: {:?}", resp.status());

    let (mut sink, mut stream) = ws_stream.split();

    let setup = ClientMessage::Setup(config.setup_message());
    sink.send(Message::text(serde_json::to_string(&setup)?)).await?;
    info!("Setup message sent, waiting for acknowledgment");

    tokio::time::timeout(config.setup_timeout, wait_for_setup_complete(&mut stream))
        .await
        .map_err(|_| {
            error!("Timeout waiting for setup complete message");
            GeminiError::Timeout
        })??;

    info!("Gemini session setup complete");
    if events.send(LiveEvent::Open).is_err() {
        // Session handle dropped while connecting
        let _ = sink.send(Message::Close(None)).await;
        return Ok(());
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LiveCommand::Audio(blob)) => {
                    let msg = ClientMessage::RealtimeInput(RealtimeInput::audio(blob));
                    sink.send(Message::text(serde_json::to_string(&msg)?)).await?;
                }
                Some(LiveCommand::Close) | None => {
                    info!("Closing Gemini session");
                    let end = ClientMessage::RealtimeInput(RealtimeInput::stream_end());
                    if let Err(e) = sink.send(Message::text(serde_json::to_string(&end)?)).await {
                        debug!("Audio stream end not delivered: {}", e);
                    }
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!("Close frame not delivered: {}", e);
                    }
                    return Ok(());
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    debug!("Received text message ({} bytes)", text.len());
                    forward(text.as_str(), &events);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    // The server sends JSON in binary frames as well
                    match std::str::from_utf8(&bytes) {
                        Ok(text) => forward(text, &events),
                        Err(_) => debug!("Ignoring non-UTF-8 binary message ({} bytes)", bytes.len()),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed by server: {:?}", frame);
                    let _ = events.send(LiveEvent::Closed);
                    return Ok(());
                }
                Some(Ok(_)) => {
                    // ping/pong
                }
                Some(Err(e)) => return Err(GeminiError::WebSocket(e)),
                None => {
                    info!("WebSocket stream ended");
                    let _ = events.send(LiveEvent::Closed);
                    return Ok(());
                }
            },
        }
    }
}

/// Read until the server acknowledges the setup message.
async fn wait_for_setup_complete<S>(stream: &mut S) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut skipped = 0;
    while skipped < SETUP_MESSAGE_LIMIT {
        let text = match stream.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().to_string(),
            Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
            Some(Ok(Message::Close(frame))) => {
                warn!("Server closed during setup: {:?}", frame);
                return Err(GeminiError::ConnectionClosed);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(GeminiError::WebSocket(e)),
            None => return Err(GeminiError::ConnectionClosed),
        };

        match serde_json::from_str::<ServerMessage>(&text) {
            Ok(msg) if msg.setup_complete.is_some() => return Ok(()),
            Ok(_) => debug!("Ignoring message received before setup complete"),
            Err(e) => warn!("Unparseable message during setup: {}", e),
        }
        skipped += 1;
    }
    Err(GeminiError::SetupNotComplete)
}

/// Parse one server message and push the resulting events.
fn forward(text: &str, events: &tokio::sync::mpsc::UnboundedSender<LiveEvent>) {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => {
            for event in server_events(msg) {
                if events.send(event).is_err() {
                    debug!("Session handle dropped, discarding event");
                    return;
                }
            }
        }
        Err(e) => {
            error!("Failed to parse server message: {}", e);
            debug!("Raw message: {}", text);
        }
    }
}

/// Translate a server message into session events, in the order the
/// orchestrator should see them.
pub fn server_events(msg: ServerMessage) -> Vec<LiveEvent> {
    let mut out = Vec::new();

    if let Some(content) = msg.server_content {
        push_content_events(content, &mut out);
    }
    if msg.tool_call.is_some() {
        warn!("Ignoring tool call, no tools are declared");
    }
    if let Some(update) = msg.session_resumption_update {
        debug!("Session resumption update: {}", update);
    }
    if let Some(go_away) = msg.go_away {
        info!("Server requested disconnection: {}", go_away);
        out.push(LiveEvent::Closed);
    }

    out
}

fn push_content_events(content: ServerContent, out: &mut Vec<LiveEvent>) {
    if let Some(text) = content.input_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            out.push(LiveEvent::InputTranscript(text));
        }
    }
    if let Some(text) = content.output_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            out.push(LiveEvent::OutputTranscript(text));
        }
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(inline) = part.inline_data {
                if !inline.data.is_empty() {
                    out.push(LiveEvent::Audio(inline.data));
                }
            } else if let Some(text) = part.text {
                debug!("Ignoring text part in audio session: {}", text);
            }
        }
    }

    if content.interrupted {
        out.push(LiveEvent::Interrupted);
    }
    if content.turn_complete {
        out.push(LiveEvent::TurnComplete);
    }
}
