//! Listener state machine
//!
//! Runs as a single task. Commands, model-load completions and session
//! events are handled one at a time, so no transition ever overlaps another.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::{Command, ListenerOptions, ListenerSnapshot, ListenerState, WakeWordConfig};
use crate::Error;
use crate::voice::{
    AudioSource, CaptureError, CaptureSession, DecoderError, DecoderEvent, DecoderHandle,
    LoadError, ModelCache, RecognizerSession, TranscriptEvent, WakeWordMatcher,
};

/// Resources held while `Listening`
struct ActiveSession {
    capture: Box<dyn CaptureSession>,
    recognizer: RecognizerSession,
    faults: mpsc::UnboundedReceiver<CaptureError>,
    // Held so the fault channel outlives the capture's sink clones
    _faults_tx: mpsc::UnboundedSender<CaptureError>,
    matcher: WakeWordMatcher,
}

struct LoadCompletion {
    generation: u64,
    result: Result<DecoderHandle, LoadError>,
}

enum SessionEvent {
    Capture(CaptureError),
    Decoder(Option<DecoderEvent>),
}

pub(super) struct Controller {
    options: ListenerOptions,
    wake: WakeWordConfig,
    cache: Arc<ModelCache>,
    source: Arc<dyn AudioSource>,

    state: ListenerState,
    handle: Option<DecoderHandle>,
    session: Option<ActiveSession>,
    transcript: String,

    /// Bumped whenever a pending model load stops being wanted
    generation: u64,
    loads_tx: mpsc::UnboundedSender<LoadCompletion>,
    loads_rx: mpsc::UnboundedReceiver<LoadCompletion>,

    snapshot: watch::Sender<ListenerSnapshot>,
    disposed: bool,
}

impl Controller {
    pub(super) fn new(
        options: ListenerOptions,
        wake: WakeWordConfig,
        cache: Arc<ModelCache>,
        source: Arc<dyn AudioSource>,
        snapshot: watch::Sender<ListenerSnapshot>,
    ) -> Self {
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();
        Self {
            options,
            wake,
            cache,
            source,
            state: ListenerState::Idle,
            handle: None,
            session: None,
            transcript: String::new(),
            generation: 0,
            loads_tx,
            loads_rx,
            snapshot,
            disposed: false,
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    let Some(command) = command else {
                        // Every handle dropped
                        self.dispose().await;
                        break;
                    };
                    if self.handle_command(command).await {
                        break;
                    }
                }
                Some(done) = self.loads_rx.recv() => self.on_model_loaded(done).await,
                event = next_session_event(&mut self.session) => self.on_session_event(event).await,
            }
        }
        tracing::debug!("listener task exited");
    }

    /// Returns `true` once the controller has been disposed
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Configure(wake, ack) => {
                self.configure(wake).await;
                let _ = ack.send(());
            }
            Command::Start(ack) => {
                self.start_listening().await;
                let _ = ack.send(());
            }
            Command::Stop(ack) => {
                self.stop_listening().await;
                let _ = ack.send(());
            }
            Command::Dispose(ack) => {
                self.dispose().await;
                let _ = ack.send(());
                return true;
            }
        }
        false
    }

    async fn configure(&mut self, wake: WakeWordConfig) {
        let phrase_changed = wake.phrase != self.wake.phrase;
        tracing::info!(phrase = %wake.phrase, enabled = wake.enabled, "wake word configured");
        self.wake = wake;

        match self.state {
            ListenerState::Listening | ListenerState::ModelLoading if !self.wake.enabled => {
                self.stop_listening().await;
            }
            // The matcher is built when capture opens, so a pending load needs no restart
            ListenerState::Listening if phrase_changed => {
                self.stop_listening().await;
                self.start_listening().await;
            }
            _ => {}
        }
    }

    async fn start_listening(&mut self) {
        if !self.wake.enabled {
            tracing::debug!("start ignored, wake word disabled");
            return;
        }
        if matches!(self.state, ListenerState::Listening | ListenerState::ModelLoading) {
            tracing::debug!(state = ?self.state, "start ignored, already active");
            return;
        }

        self.generation += 1;

        if self.handle.is_none() {
            self.handle = self.cache.get(&self.options.model);
        }
        if let Some(handle) = self.handle.clone() {
            self.open_session(&handle).await;
            return;
        }

        self.set_state(ListenerState::ModelLoading);

        let cache = Arc::clone(&self.cache);
        let model = self.options.model.clone();
        let loads = self.loads_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = cache.load(&model).await;
            let _ = loads.send(LoadCompletion { generation, result });
        });
    }

    async fn on_model_loaded(&mut self, done: LoadCompletion) {
        if done.generation != self.generation || self.state != ListenerState::ModelLoading {
            tracing::debug!(
                generation = done.generation,
                current = self.generation,
                "discarding stale model load"
            );
            return;
        }

        match done.result {
            Ok(handle) => {
                self.handle = Some(handle.clone());
                self.open_session(&handle).await;
            }
            Err(e) => self.fail(Error::ModelLoad(e)).await,
        }
    }

    /// Build the recognizer, then open capture wired to it
    async fn open_session(&mut self, handle: &DecoderHandle) {
        let spec = self.options.capture.clone();

        let matcher = match WakeWordMatcher::new(
            &self.wake.phrase,
            self.options.activation.once_per_utterance,
        ) {
            Ok(matcher) => matcher,
            Err(e) => return self.fail(e).await,
        };

        let recognizer = match handle.create_recognizer(spec.sample_rate, spec.queue_frames) {
            Ok(recognizer) => recognizer,
            Err(DecoderError::SampleRateMismatch { expected, actual }) => {
                return self
                    .fail(Error::SampleRateMismatch {
                        capture: actual,
                        model: expected,
                    })
                    .await;
            }
            Err(e) => return self.fail(Error::Decoder(e)).await,
        };

        let (faults_tx, faults) = mpsc::unbounded_channel();
        let sink = recognizer.frame_sink().with_faults(faults_tx.clone());
        let source = Arc::clone(&self.source);
        let open_spec = spec.clone();

        // Opening may block on the device or a permission prompt
        let opened = tokio::task::spawn_blocking(move || source.open(&open_spec, sink))
            .await
            .unwrap_or_else(|e| Err(CaptureError::Device(format!("capture open panicked: {e}"))));

        let capture = match opened {
            Ok(capture) => capture,
            Err(e) => {
                release(None, recognizer).await;
                return self.fail(Error::Capture(e)).await;
            }
        };

        let capture_rate = capture.sample_rate();
        if capture_rate != recognizer.sample_rate() {
            let model = recognizer.sample_rate();
            release(Some(capture), recognizer).await;
            return self
                .fail(Error::SampleRateMismatch {
                    capture: capture_rate,
                    model,
                })
                .await;
        }

        self.session = Some(ActiveSession {
            capture,
            recognizer,
            faults,
            _faults_tx: faults_tx,
            matcher,
        });
        tracing::info!(
            phrase = %self.wake.phrase,
            source = self.source.name(),
            sample_rate = capture_rate,
            "listening for wake word"
        );
        self.set_state(ListenerState::Listening);
    }

    async fn stop_listening(&mut self) {
        match self.state {
            ListenerState::Idle | ListenerState::Error(_) => {
                tracing::debug!(state = ?self.state, "stop ignored, not active");
                return;
            }
            ListenerState::ModelLoading => {
                // The load keeps running and fills the cache; its result is ignored here
                self.generation += 1;
            }
            ListenerState::Listening => self.teardown().await,
        }

        tracing::info!("stopped listening");
        self.set_state(ListenerState::Idle);
    }

    async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.generation += 1;
        self.teardown().await;
        self.set_state(ListenerState::Idle);
        tracing::info!("listener disposed");
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Decoder(Some(DecoderEvent::Transcript(event))) => {
                self.on_transcript(&event);
            }
            SessionEvent::Decoder(Some(DecoderEvent::Fault(e))) => {
                self.fail(Error::Decoder(e)).await;
            }
            SessionEvent::Decoder(None) => {
                self.fail(Error::Decoder(DecoderError::Worker(
                    "decode worker exited unexpectedly".to_string(),
                )))
                .await;
            }
            SessionEvent::Capture(e) => {
                self.drain_transcripts();
                self.fail(Error::Capture(e)).await;
            }
        }
    }

    /// Handle transcripts decoded before a capture fault arrived
    fn drain_transcripts(&mut self) {
        while let Some(event) = self
            .session
            .as_mut()
            .and_then(|session| session.recognizer.try_next_event())
        {
            if let DecoderEvent::Transcript(event) = event {
                self.on_transcript(&event);
            }
        }
    }

    fn on_transcript(&mut self, event: &TranscriptEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let text = event.text().trim();
        if session.matcher.observe(event) {
            tracing::info!(
                phrase = %session.matcher.phrase(),
                transcript = text,
                is_final = event.is_final(),
                "wake word detected"
            );
            (self.wake.on_activated)();
            if self.options.activation.clear_transcript {
                self.transcript.clear();
            } else {
                self.transcript = text.to_string();
            }
            self.publish();
            return;
        }

        if text.is_empty() || text == self.transcript {
            return;
        }
        tracing::debug!(transcript = text, is_final = event.is_final(), "transcript updated");
        self.transcript = text.to_string();
        self.publish();
    }

    /// Release everything, then surface the error
    async fn fail(&mut self, error: Error) {
        tracing::error!(error = %error, "listener failed");
        self.teardown().await;
        self.set_state(ListenerState::Error(error.user_message()));
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            release(Some(session.capture), session.recognizer).await;
        }
        self.transcript.clear();
    }

    fn set_state(&mut self, state: ListenerState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "listener state changed");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let error = match &self.state {
            ListenerState::Error(message) => Some(message.clone()),
            _ => None,
        };
        self.snapshot.send_replace(ListenerSnapshot {
            state: self.state.clone(),
            is_listening: self.state == ListenerState::Listening,
            is_model_loaded: self.handle.is_some(),
            error,
            transcript: self.transcript.clone(),
        });
    }
}

/// Disconnect delivery, close capture, destroy the recognizer
///
/// Each step runs even if an earlier one failed.
async fn release(capture: Option<Box<dyn CaptureSession>>, recognizer: RecognizerSession) {
    recognizer.disconnect();

    if let Some(mut capture) = capture {
        let closed = tokio::task::spawn_blocking(move || capture.close()).await;
        if let Err(e) = closed {
            tracing::warn!(error = %e, "capture close failed");
        }
    }

    if let Err(e) = recognizer.destroy().await {
        tracing::warn!(error = %e, "recognizer teardown failed");
    }
}

/// Next fault or decoder event of the active session; pending when idle
async fn next_session_event(session: &mut Option<ActiveSession>) -> SessionEvent {
    let Some(session) = session.as_mut() else {
        return std::future::pending().await;
    };

    tokio::select! {
        biased;

        Some(fault) = session.faults.recv() => SessionEvent::Capture(fault),
        event = session.recognizer.next_event() => SessionEvent::Decoder(event),
    }
}
