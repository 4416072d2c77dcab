//! Voice processing module
//!
//! Handles audio capture, streaming speech decoding and wake word matching.
//! Capture backends push frames into a bounded queue; a decode worker drains
//! it into a per-session recognizer built from a cached model.

mod capture;
mod decoder;
mod frames;
mod framing;
mod microphone;
mod model_cache;
#[cfg(feature = "vosk")]
mod vosk_backend;
mod wav_source;
mod wake_word;

pub use capture::{
    AudioSource, CaptureError, CaptureSession, CaptureSpec, DEFAULT_FRAME_SIZE,
    DEFAULT_QUEUE_FRAMES, SAMPLE_RATE,
};
pub use decoder::{
    DecoderError, DecoderEvent, DecoderHandle, LoadError, ModelRef, Recognizer,
    RecognizerSession, SpeechBackend, SpeechModel, TranscriptEvent,
};
pub use frames::{Frame, FrameReceiver, FrameSink, frame_queue};
pub use framing::{FrameAssembler, downmix};
pub use microphone::MicrophoneSource;
pub use model_cache::{ModelCache, ModelStatus};
#[cfg(feature = "vosk")]
pub use vosk_backend::VoskBackend;
pub use wav_source::WavFileSource;
pub use wake_word::{WakeWordMatcher, matches, normalize};
