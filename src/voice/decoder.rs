//! Streaming speech decoder
//!
//! Splits into a shared, read-only [`SpeechModel`] (slow to load, cached
//! process-wide) and a per-session [`Recognizer`] that holds the decoding
//! state. Frames are decoded on a blocking worker so the audio thread only
//! ever enqueues.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{FrameReceiver, FrameSink, frame_queue};

/// Identifies a model artifact and the rate it was trained for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelRef {
    path: PathBuf,
    sample_rate: u32,
}

impl ModelRef {
    /// Reference the model stored at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            sample_rate,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rate the model expects
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} Hz", self.path.display(), self.sample_rate)
    }
}

/// Raw text hypothesis emitted by a recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Revisable hypothesis for the current utterance
    Partial(String),
    /// The utterance ended; the next event starts a new one
    Final(String),
}

impl TranscriptEvent {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Partial(text) | Self::Final(text) => text,
        }
    }

    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }
}

/// Everything a decode worker reports back to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    Transcript(TranscriptEvent),
    /// The recognizer failed; the worker has stopped
    Fault(DecoderError),
}

/// Errors raised while loading a speech model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("model not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("model at {} is unusable: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("speech backend error: {0}")]
    Backend(String),
}

/// Errors raised by a recognizer or its worker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecoderError {
    /// Frames at one rate were offered to a recognizer built for another
    #[error("recognizer expects {expected} Hz audio, got {actual} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("failed to create recognizer: {0}")]
    Create(String),

    #[error("decoding failed: {0}")]
    Decode(String),

    #[error("decode worker failed: {0}")]
    Worker(String),
}

/// A speech engine able to load models
pub trait SpeechBackend: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Load the model referenced by `model`
    ///
    /// Slow and blocking; callers run it off the async runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if the artifact is missing or unusable
    fn load_model(&self, model: &ModelRef) -> Result<Arc<dyn SpeechModel>, LoadError>;
}

/// A loaded, immutable model shared by every session
pub trait SpeechModel: Send + Sync {
    /// Rate the model decodes at
    fn sample_rate(&self) -> u32;

    /// Allocate fresh per-session decoding state
    ///
    /// # Errors
    ///
    /// Returns [`DecoderError::Create`] if the engine refuses
    fn create_recognizer(&self) -> Result<Box<dyn Recognizer>, DecoderError>;
}

/// Per-session decoding state
///
/// Dropping a recognizer releases its buffers.
pub trait Recognizer: Send {
    /// Decode one frame, returning any transcript events it produced
    ///
    /// # Errors
    ///
    /// Returns [`DecoderError::Decode`] if the engine fails; the recognizer
    /// is not used again afterwards
    fn accept(&mut self, samples: &[f32]) -> Result<Vec<TranscriptEvent>, DecoderError>;
}

/// A ready model, cheap to clone
#[derive(Clone)]
pub struct DecoderHandle {
    model_ref: ModelRef,
    model: Arc<dyn SpeechModel>,
}

impl fmt::Debug for DecoderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderHandle")
            .field("model_ref", &self.model_ref)
            .field("sample_rate", &self.model.sample_rate())
            .finish()
    }
}

impl DecoderHandle {
    #[must_use]
    pub fn new(model_ref: ModelRef, model: Arc<dyn SpeechModel>) -> Self {
        Self { model_ref, model }
    }

    #[must_use]
    pub const fn model_ref(&self) -> &ModelRef {
        &self.model_ref
    }

    /// Rate the underlying model decodes at
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.model.sample_rate()
    }

    /// Start a recognizer session for audio captured at `sample_rate`
    ///
    /// Spawns the decode worker, so this must run inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DecoderError::SampleRateMismatch`] if `sample_rate` differs
    /// from the model's rate, or [`DecoderError::Create`] if the engine
    /// cannot allocate a recognizer
    pub fn create_recognizer(
        &self,
        sample_rate: u32,
        queue_frames: usize,
    ) -> Result<RecognizerSession, DecoderError> {
        let expected = self.model.sample_rate();
        if sample_rate != expected {
            return Err(DecoderError::SampleRateMismatch {
                expected,
                actual: sample_rate,
            });
        }

        let recognizer = self.model.create_recognizer()?;
        let (sink, frames) = frame_queue(queue_frames);
        let (events_tx, events) = mpsc::unbounded_channel();
        let worker = tokio::task::spawn_blocking(move || decode_loop(recognizer, frames, &events_tx));

        tracing::debug!(model = %self.model_ref, queue_frames, "recognizer created");

        Ok(RecognizerSession {
            sink,
            events,
            worker: Some(worker),
            sample_rate,
        })
    }
}

/// One recognizer plus the worker feeding it
///
/// Dropping the session disconnects the queue and lets the worker exit on
/// its own; [`RecognizerSession::destroy`] also waits for it.
#[derive(Debug)]
pub struct RecognizerSession {
    sink: FrameSink,
    events: mpsc::UnboundedReceiver<DecoderEvent>,
    worker: Option<JoinHandle<u64>>,
    sample_rate: u32,
}

impl RecognizerSession {
    /// Producer handle for a capture backend
    #[must_use]
    pub fn frame_sink(&self) -> FrameSink {
        self.sink.clone()
    }

    /// Rate this recognizer was built for
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Enqueue one frame without waiting for it to be decoded
    pub fn feed(&self, samples: Vec<f32>) -> bool {
        self.sink.push(samples)
    }

    /// Next event from the worker, in emission order
    ///
    /// Returns `None` once the worker has exited and every event was read.
    /// Cancel-safe.
    pub async fn next_event(&mut self) -> Option<DecoderEvent> {
        self.events.recv().await
    }

    /// An event the worker already emitted, without waiting
    pub fn try_next_event(&mut self) -> Option<DecoderEvent> {
        self.events.try_recv().ok()
    }

    /// Stop frame delivery from every sink clone
    pub fn disconnect(&self) {
        self.sink.disconnect();
    }

    /// Stop the worker and release the recognizer
    ///
    /// The shared model stays loaded.
    ///
    /// # Errors
    ///
    /// Returns [`DecoderError::Worker`] if the worker panicked
    pub async fn destroy(mut self) -> Result<(), DecoderError> {
        self.sink.disconnect();
        self.sink.shutdown();

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        match worker.await {
            Ok(decoded) => {
                tracing::debug!(decoded, "recognizer destroyed");
                Ok(())
            }
            Err(e) => Err(DecoderError::Worker(e.to_string())),
        }
    }
}

impl Drop for RecognizerSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.sink.disconnect();
            self.sink.shutdown();
        }
    }
}

/// Drain frames into the recognizer until shutdown or failure
fn decode_loop(
    mut recognizer: Box<dyn Recognizer>,
    mut frames: FrameReceiver,
    events: &mpsc::UnboundedSender<DecoderEvent>,
) -> u64 {
    let mut decoded = 0u64;

    while let Some(frame) = frames.blocking_next() {
        tracing::trace!(sequence = frame.sequence(), samples = frame.len(), "decoding frame");

        match recognizer.accept(frame.samples()) {
            Ok(produced) => {
                for event in produced {
                    tracing::debug!(?event, "decoder event");
                    if events.send(DecoderEvent::Transcript(event)).is_err() {
                        return decoded;
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "recognizer failed");
                let _ = events.send(DecoderEvent::Fault(e));
                break;
            }
        }
        decoded += 1;
    }

    if frames.dropped() > 0 {
        tracing::warn!(dropped = frames.dropped(), "frames lost during session");
    }
    if frames.discarded() > 0 {
        tracing::debug!(discarded = frames.discarded(), "stale frames skipped at shutdown");
    }
    decoded
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct EchoModel {
        live: Arc<AtomicUsize>,
    }

    struct EchoRecognizer {
        live: Arc<AtomicUsize>,
    }

    impl SpeechModel for EchoModel {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn create_recognizer(&self) -> Result<Box<dyn Recognizer>, DecoderError> {
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoRecognizer {
                live: Arc::clone(&self.live),
            }))
        }
    }

    impl Recognizer for EchoRecognizer {
        fn accept(&mut self, samples: &[f32]) -> Result<Vec<TranscriptEvent>, DecoderError> {
            if samples.first().is_some_and(|s| *s < 0.0) {
                return Err(DecoderError::Decode("negative marker".to_string()));
            }
            Ok(vec![TranscriptEvent::Partial(format!("{} samples", samples.len()))])
        }
    }

    impl Drop for EchoRecognizer {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn handle(live: &Arc<AtomicUsize>) -> DecoderHandle {
        DecoderHandle::new(
            ModelRef::new("/models/echo", 16_000),
            Arc::new(EchoModel {
                live: Arc::clone(live),
            }),
        )
    }

    #[tokio::test]
    async fn test_rate_mismatch_is_rejected() {
        let live = Arc::new(AtomicUsize::new(0));
        let err = handle(&live).create_recognizer(44_100, 4).unwrap_err();

        assert_eq!(
            err,
            DecoderError::SampleRateMismatch {
                expected: 16_000,
                actual: 44_100
            }
        );
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_events_follow_frame_order_and_destroy_releases() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut session = handle(&live).create_recognizer(16_000, 8).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);

        assert!(session.feed(vec![0.0; 3]));
        assert!(session.feed(vec![0.0; 5]));

        assert_eq!(
            session.next_event().await,
            Some(DecoderEvent::Transcript(TranscriptEvent::Partial(
                "3 samples".to_string()
            )))
        );
        assert_eq!(
            session.next_event().await,
            Some(DecoderEvent::Transcript(TranscriptEvent::Partial(
                "5 samples".to_string()
            )))
        );

        session.destroy().await.unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recognizer_failure_is_reported_as_fault() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut session = handle(&live).create_recognizer(16_000, 8).unwrap();

        session.feed(vec![-1.0; 2]);

        assert!(matches!(
            session.next_event().await,
            Some(DecoderEvent::Fault(DecoderError::Decode(_)))
        ));
        // Worker stopped after the fault
        assert_eq!(session.next_event().await, None);
        session.destroy().await.unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_transcript_event_accessors() {
        let event = TranscriptEvent::Final("olá".to_string());
        assert_eq!(event.text(), "olá");
        assert!(event.is_final());
        assert!(!TranscriptEvent::Partial(String::new()).is_final());
    }
}
