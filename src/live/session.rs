//! Live session lifecycle and event dispatch
//!
//! # Connection flow
//!
//! 1. Acquire the microphone (fails cleanly if access is denied)
//! 2. Connect the WebSocket and send `setup` (retries with backoff)
//! 3. Wait for `setupComplete`
//! 4. Open the speaker sink
//! 5. Spawn the send / receive / dispatch tasks
//!
//! Server events flow through a single mpsc queue consumed strictly in
//! arrival order, so playback scheduling, transcript accumulation, and turn
//! boundaries never race each other.
//!
//! Mid-session disconnects do not reconnect; the session tears down and the
//! failure is surfaced as a notice on the update channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use super::protocol::{ClientMessage, ServerContent, ServerEvent, LIVE_API_URL};
use super::transcript::TurnTranscripts;
use super::LiveError;
use crate::audio::{
    codec, AudioSink, CapturePipeline, MediaChunk, PlaybackScheduler, SpeakerSink,
};
use crate::messages::Message;
use crate::settings::AppSettings;

/// Connection timeout for the initial WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the setupComplete acknowledgement
const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum attempts for the initial connection
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Only one live session may be open per process.
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Open,
    Closing,
}

/// Updates the session pushes to the UI layer.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Accumulated user-side caption for the current turn
    UserTranscript(String),
    /// Accumulated model-side caption for the current turn
    ModelTranscript(String),
    /// Messages flushed at a turn boundary, user first
    Turn(Vec<Message>),
    /// User-visible notification (transport failures, provider errors)
    Notice(String),
    /// The session is fully torn down
    Closed,
}

/// Items on the internal event queue, consumed in arrival order.
enum QueueItem {
    Event(ServerEvent),
    TransportError(String),
    Closed,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to the one active live session.
///
/// Constructed by [`LiveSession::start`], destroyed by [`LiveSession::stop`]
/// or a transport failure. Dropping the handle also tears the session down.
pub struct LiveSession {
    capture: Arc<Mutex<Option<CapturePipeline>>>,
    stop_tx: Option<oneshot::Sender<()>>,
    recv_task: tokio::task::JoinHandle<()>,
    dispatch_task: tokio::task::JoinHandle<()>,
    stopped: bool,
}

impl LiveSession {
    /// Open a live session: microphone, WebSocket, speaker, and the three
    /// pump tasks. Valid only while no other session is active; a second
    /// call is rejected with [`LiveError::SessionActive`] rather than
    /// stopping the first.
    ///
    /// On any failure every partially acquired resource is released before
    /// the error is returned.
    pub async fn start(
        settings: &AppSettings,
        api_key: &str,
        system_prompt: &str,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Result<Self, LiveError> {
        if api_key.is_empty() {
            return Err(LiveError::MissingApiKey);
        }

        if SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LiveError::SessionActive);
        }

        info!("Live session: {:?} -> {:?}", SessionState::Idle, SessionState::Opening);

        // Microphone first: if access is denied nothing else gets opened.
        let (chunk_tx, chunk_rx) = mpsc::channel::<MediaChunk>(64);
        let capture = match CapturePipeline::start(
            chunk_tx,
            settings.input_sample_rate,
            settings.capture_frame_size,
        ) {
            Ok(c) => c,
            Err(e) => {
                SESSION_ACTIVE.store(false, Ordering::SeqCst);
                return Err(LiveError::Audio(e));
            }
        };
        let capture = Arc::new(Mutex::new(Some(capture)));

        let setup = ClientMessage::setup(&settings.live_model, &settings.voice, system_prompt);
        let ws = match connect_with_backoff(api_key, &setup).await {
            Ok(ws) => ws,
            Err(e) => {
                stop_capture(&capture);
                SESSION_ACTIVE.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let sink = match SpeakerSink::open(settings.output_sample_rate) {
            Ok(s) => s,
            Err(e) => {
                stop_capture(&capture);
                SESSION_ACTIVE.store(false, Ordering::SeqCst);
                return Err(LiveError::Audio(e));
            }
        };
        let scheduler = PlaybackScheduler::new(sink, settings.output_sample_rate);

        let (mut write, mut read) = ws.split();
        let (event_tx, event_rx) = mpsc::channel::<QueueItem>(100);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        // Receive pump: socket -> event queue, preserving arrival order.
        let recv_task = tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(WsMessage::Text(text)) => {
                        forward_event(&event_tx, text.as_bytes()).await;
                    }
                    Ok(WsMessage::Binary(bytes)) => {
                        // The endpoint delivers JSON in binary frames too
                        forward_event(&event_tx, &bytes).await;
                    }
                    Ok(WsMessage::Close(_)) => {
                        info!("Live endpoint closed the session");
                        let _ = event_tx.send(QueueItem::Closed).await;
                        return;
                    }
                    Err(e) => {
                        let _ = event_tx.send(QueueItem::TransportError(e.to_string())).await;
                        return;
                    }
                    _ => {} // ping/pong
                }
            }
            let _ = event_tx.send(QueueItem::Closed).await;
        });

        // Send pump: capture chunks -> socket. Ends when capture stops,
        // then closes the socket gracefully.
        tokio::spawn(async move {
            let mut chunk_rx = chunk_rx;
            while let Some(chunk) = chunk_rx.recv().await {
                let msg = ClientMessage::media(chunk);
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("Failed to serialize media chunk: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(WsMessage::Text(json)).await {
                    warn!("Live send failed: {}", e);
                    return;
                }
            }
            debug!("Capture channel closed, closing socket");
            let _ = write.close().await;
        });

        // Dispatch: event queue -> playback / transcripts / UI updates.
        // Owns the teardown and releases the single-session guard.
        //
        // Update delivery must never park this task: `stop()` awaits it, and
        // the update consumer may be busy elsewhere at that moment. The
        // updates channel is unbounded for exactly that reason.
        let capture_for_dispatch = Arc::clone(&capture);
        let dispatch_task = tokio::spawn(async move {
            let mut dispatcher = Dispatcher::new(scheduler);
            let mut event_rx = event_rx;
            let mut stop_rx = stop_rx;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    item = event_rx.recv() => match item {
                        None => break,
                        Some(QueueItem::Closed) => break,
                        Some(QueueItem::TransportError(e)) => {
                            warn!("Live transport error: {}", e);
                            let _ = updates.send(SessionUpdate::Notice(format!(
                                "Live session connection lost: {}",
                                e
                            )));
                            break;
                        }
                        Some(QueueItem::Event(event)) => {
                            if let Some(error) = event.error {
                                warn!("Live endpoint error: {}", error.message);
                                let _ = updates.send(SessionUpdate::Notice(error.message));
                                break;
                            }
                            if let Some(content) = event.server_content {
                                for update in dispatcher.handle_content(content) {
                                    let _ = updates.send(update);
                                }
                            }
                        }
                    }
                }
            }

            info!(
                "Live session: {:?} -> {:?}",
                SessionState::Closing,
                SessionState::Idle
            );
            dispatcher.scheduler.teardown();
            dispatcher.transcripts.clear();
            stop_capture(&capture_for_dispatch);
            SESSION_ACTIVE.store(false, Ordering::SeqCst);
            let _ = updates.send(SessionUpdate::Closed);
        });

        info!("Live session: {:?} -> {:?}", SessionState::Opening, SessionState::Open);

        Ok(Self {
            capture,
            stop_tx: Some(stop_tx),
            recv_task,
            dispatch_task,
            stopped: false,
        })
    }

    pub fn state(&self) -> SessionState {
        if self.stopped {
            SessionState::Closing
        } else {
            SessionState::Open
        }
    }

    /// Tear the session down: stop capture, close the socket, flush
    /// playback, clear transcripts. Safe to call repeatedly and safe even if
    /// `start()` only partially succeeded (every handle is taken through an
    /// `Option`). Always runs to completion regardless of whether the update
    /// consumer is currently draining its channel.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("Live session: {:?} -> {:?}", SessionState::Open, SessionState::Closing);

        // Stopping capture closes the chunk channel, which lets the send
        // pump flush a close frame to the endpoint.
        stop_capture(&self.capture);

        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        // Dispatch owns the teardown; wait for it so playback is silenced
        // before stop() returns.
        let _ = (&mut self.dispatch_task).await;
        self.recv_task.abort();
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if !self.stopped {
            stop_capture(&self.capture);
            if let Some(tx) = self.stop_tx.take() {
                let _ = tx.send(());
            }
            self.recv_task.abort();
        }
    }
}

fn stop_capture(capture: &Arc<Mutex<Option<CapturePipeline>>>) {
    if let Ok(mut guard) = capture.lock() {
        if let Some(mut pipeline) = guard.take() {
            pipeline.stop();
        }
    }
}

async fn forward_event(event_tx: &mpsc::Sender<QueueItem>, payload: &[u8]) {
    match serde_json::from_slice::<ServerEvent>(payload) {
        Ok(event) => {
            if event_tx.send(QueueItem::Event(event)).await.is_err() {
                debug!("Event queue closed");
            }
        }
        Err(e) => warn!("Failed to parse server event: {}", e),
    }
}

/// Connect and complete setup, retrying the whole sequence with exponential
/// backoff on failure.
async fn connect_with_backoff(
    api_key: &str,
    setup: &ClientMessage,
) -> Result<WsStream, LiveError> {
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
            info!(
                "Retrying live connection in {:?} (attempt {}/{})",
                delay,
                attempt + 1,
                MAX_RETRIES
            );
            tokio::time::sleep(delay).await;
        }

        match try_connect(api_key, setup).await {
            Ok(ws) => return Ok(ws),
            Err(e) => {
                warn!("Live connection attempt {} failed: {}", attempt + 1, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| LiveError::ConnectionFailed("Max retries exceeded".to_string())))
}

/// Single connection attempt: open the socket, send `setup`, wait for the
/// `setupComplete` acknowledgement.
async fn try_connect(api_key: &str, setup: &ClientMessage) -> Result<WsStream, LiveError> {
    let url = format!("{}?key={}", LIVE_API_URL, api_key);

    info!("Connecting to live endpoint...");

    let (mut ws, _response) = timeout(
        CONNECTION_TIMEOUT,
        connect_async_with_config(&url, None, false),
    )
    .await
    .map_err(|_| LiveError::ConnectionFailed("Connection timeout".to_string()))?
    .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

    let setup_json =
        serde_json::to_string(setup).map_err(|e| LiveError::SetupFailed(e.to_string()))?;
    ws.send(WsMessage::Text(setup_json))
        .await
        .map_err(|e| LiveError::SetupFailed(e.to_string()))?;

    debug!("Setup sent, waiting for acknowledgement...");

    timeout(SETUP_TIMEOUT, async {
        while let Some(result) = ws.next().await {
            let payload = match result {
                Ok(WsMessage::Text(text)) => text.into_bytes(),
                Ok(WsMessage::Binary(bytes)) => bytes,
                Ok(WsMessage::Close(_)) => {
                    return Err(LiveError::SetupFailed(
                        "Connection closed before setup completed".to_string(),
                    ));
                }
                Err(e) => return Err(LiveError::SetupFailed(e.to_string())),
                _ => continue,
            };

            match serde_json::from_slice::<ServerEvent>(&payload) {
                Ok(event) => {
                    if let Some(error) = event.error {
                        return Err(LiveError::SetupFailed(error.message));
                    }
                    if event.setup_complete.is_some() {
                        info!("Live session setup acknowledged");
                        return Ok(());
                    }
                    debug!("Ignoring event while waiting for setup acknowledgement");
                }
                Err(e) => warn!("Failed to parse event during setup: {}", e),
            }
        }
        Err(LiveError::SetupFailed("Stream ended during setup".to_string()))
    })
    .await
    .map_err(|_| LiveError::SetupFailed("Setup acknowledgement timeout".to_string()))??;

    Ok(ws)
}

// ============================================================================
// Event dispatch
// ============================================================================

/// Pure reaction layer for server content: audio to the scheduler, captions
/// to the transcript buffers, flushes on interruption and turn boundaries.
/// Split out from the session task so it can be tested without a socket.
struct Dispatcher<S: AudioSink> {
    scheduler: PlaybackScheduler<S>,
    transcripts: TurnTranscripts,
}

impl<S: AudioSink> Dispatcher<S> {
    fn new(scheduler: PlaybackScheduler<S>) -> Self {
        Self {
            scheduler,
            transcripts: TurnTranscripts::new(),
        }
    }

    fn handle_content(&mut self, content: ServerContent) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();

        if let Some(b64) = content.audio_data() {
            match codec::decode(b64) {
                Ok(bytes) => {
                    // Provider audio is mono PCM16
                    let frames = codec::bytes_to_frames(&bytes, 1);
                    if let Err(e) = self.scheduler.schedule_chunk(frames) {
                        warn!("Failed to schedule audio chunk: {}", e);
                    }
                }
                Err(e) => warn!("Dropping malformed audio payload: {}", e),
            }
        }

        if let Some(fragment) = content.output_transcription {
            let text = self.transcripts.push_model(&fragment.text).to_string();
            updates.push(SessionUpdate::ModelTranscript(text));
        }

        if let Some(fragment) = content.input_transcription {
            let text = self.transcripts.push_user(&fragment.text).to_string();
            updates.push(SessionUpdate::UserTranscript(text));
        }

        if content.interrupted {
            debug!("Model interrupted, flushing playback");
            self.scheduler.flush_all();
        }

        if content.turn_complete {
            let messages = self.transcripts.flush();
            if !messages.is_empty() {
                updates.push(SessionUpdate::Turn(messages));
            }
        }

        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioError;
    use crate::live::protocol::{ModelTurn, ServerPart, TranscriptionFragment};
    use crate::messages::MessageRole;

    /// Sink that accepts scheduling without a device; the clock stays at 0.
    struct NullSink;

    impl AudioSink for NullSink {
        fn now(&self) -> f64 {
            0.0
        }
        fn play_at(&mut self, _start: f64, _frames: Vec<f32>) -> Result<(), AudioError> {
            Ok(())
        }
        fn stop_all(&mut self) {}
    }

    fn dispatcher() -> Dispatcher<NullSink> {
        Dispatcher::new(PlaybackScheduler::new(NullSink, 24000))
    }

    fn audio_content(samples: &[i16]) -> ServerContent {
        ServerContent {
            model_turn: Some(ModelTurn {
                parts: vec![ServerPart {
                    inline_data: Some(crate::live::protocol::MediaBlob {
                        mime_type: "audio/pcm;rate=24000".to_string(),
                        data: codec::encode(&codec::samples_to_bytes(samples)),
                    }),
                    text: None,
                }],
            }),
            ..Default::default()
        }
    }

    fn caption(model: Option<&str>, user: Option<&str>) -> ServerContent {
        ServerContent {
            output_transcription: model.map(|t| TranscriptionFragment {
                text: t.to_string(),
            }),
            input_transcription: user.map(|t| TranscriptionFragment {
                text: t.to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_audio_payload_is_scheduled() {
        let mut d = dispatcher();
        let updates = d.handle_content(audio_content(&[100, -100, 200]));

        assert!(updates.is_empty());
        assert_eq!(d.scheduler.active_len(), 1);
    }

    #[test]
    fn test_turn_complete_flushes_user_then_model() {
        let mut d = dispatcher();
        d.handle_content(caption(Some("Hello"), None));
        d.handle_content(caption(Some(" world"), None));
        d.handle_content(caption(None, Some("Hi")));

        let boundary = ServerContent {
            turn_complete: true,
            ..Default::default()
        };
        let updates = d.handle_content(boundary);

        assert_eq!(updates.len(), 1);
        match &updates[0] {
            SessionUpdate::Turn(messages) => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[0].role, MessageRole::User);
                assert_eq!(messages[0].content, "Hi");
                assert_eq!(messages[1].role, MessageRole::Assistant);
                assert_eq!(messages[1].content, "Hello world");
            }
            other => panic!("Expected Turn update, got {:?}", other),
        }

        assert!(d.transcripts.is_empty());
    }

    #[test]
    fn test_empty_turn_boundary_emits_nothing() {
        let mut d = dispatcher();
        let updates = d.handle_content(ServerContent {
            turn_complete: true,
            ..Default::default()
        });
        assert!(updates.is_empty());
    }

    #[test]
    fn test_interruption_flushes_playback() {
        let mut d = dispatcher();
        d.handle_content(audio_content(&[1, 2, 3, 4]));
        d.handle_content(audio_content(&[5, 6, 7, 8]));
        assert_eq!(d.scheduler.active_len(), 2);

        let updates = d.handle_content(ServerContent {
            interrupted: true,
            ..Default::default()
        });

        assert!(updates.is_empty());
        assert_eq!(d.scheduler.active_len(), 0);
        assert_eq!(d.scheduler.cursor(), 0.0);
    }

    #[test]
    fn test_caption_updates_carry_accumulated_text() {
        let mut d = dispatcher();
        let first = d.handle_content(caption(Some("What is"), None));
        let second = d.handle_content(caption(Some(" the grievance timeline?"), None));

        match (&first[0], &second[0]) {
            (SessionUpdate::ModelTranscript(a), SessionUpdate::ModelTranscript(b)) => {
                assert_eq!(a, "What is");
                assert_eq!(b, "What is the grievance timeline?");
            }
            other => panic!("Expected transcript updates, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_audio_is_dropped_not_fatal() {
        let mut d = dispatcher();
        let content = ServerContent {
            model_turn: Some(ModelTurn {
                parts: vec![ServerPart {
                    inline_data: Some(crate::live::protocol::MediaBlob {
                        mime_type: "audio/pcm;rate=24000".to_string(),
                        data: "!!!not-base64!!!".to_string(),
                    }),
                    text: None,
                }],
            }),
            ..Default::default()
        };

        let updates = d.handle_content(content);
        assert!(updates.is_empty());
        assert_eq!(d.scheduler.active_len(), 0);
    }

    #[tokio::test]
    async fn test_update_delivery_never_stalls_without_a_consumer() {
        // The shell can be busy (e.g. awaiting an HTTP stream) while caption
        // fragments keep arriving; delivery must buffer rather than park the
        // dispatch side, or teardown could never be awaited to completion.
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionUpdate>();
        let mut d = dispatcher();

        for _ in 0..4096 {
            for update in d.handle_content(caption(Some("x"), None)) {
                tx.send(update).expect("delivery must not fail");
            }
        }
        for update in d.handle_content(ServerContent {
            turn_complete: true,
            ..Default::default()
        }) {
            tx.send(update).expect("delivery must not fail");
        }
        drop(tx);

        // Everything is still there, in order, once the consumer catches up.
        let mut captions = 0;
        let mut turns = 0;
        while let Some(update) = rx.recv().await {
            match update {
                SessionUpdate::ModelTranscript(_) => captions += 1,
                SessionUpdate::Turn(_) => turns += 1,
                other => panic!("Unexpected update {:?}", other),
            }
        }
        assert_eq!(captions, 4096);
        assert_eq!(turns, 1);
    }

    #[test]
    fn test_next_turn_fragments_after_boundary_stay_separate() {
        let mut d = dispatcher();
        d.handle_content(caption(None, Some("first")));
        let first = d.handle_content(ServerContent {
            turn_complete: true,
            ..Default::default()
        });
        d.handle_content(caption(None, Some("second")));
        let second = d.handle_content(ServerContent {
            turn_complete: true,
            ..Default::default()
        });

        let texts: Vec<String> = [&first[0], &second[0]]
            .iter()
            .map(|u| match u {
                SessionUpdate::Turn(m) => m[0].content.clone(),
                other => panic!("Expected Turn, got {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }
}
