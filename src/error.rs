//! Error types for the wake-word listener

use thiserror::Error;

use crate::voice::{CaptureError, DecoderError, LoadError};

/// Result type alias for listener operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the wake-word listener
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Speech model could not be loaded
    #[error("model load error: {0}")]
    ModelLoad(#[from] LoadError),

    /// Microphone capture error (permission, device, constraints)
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Recognizer failure while decoding a live session
    #[error("decoder error: {0}")]
    Decoder(#[from] DecoderError),

    /// Capture and decoder disagree on the sample rate
    #[error("sample rate mismatch: capture runs at {capture} Hz, model expects {model} Hz")]
    SampleRateMismatch {
        /// Rate delivered by the capture session
        capture: u32,
        /// Rate the recognizer was built for
        model: u32,
    },

    /// The listener task is gone
    #[error("listener is shut down")]
    ListenerClosed,
}

impl Error {
    /// User-facing message published in the listener snapshot
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(msg) => format!("Invalid configuration: {msg}"),
            Self::ModelLoad(_) => "Failed to load the speech recognition model".to_string(),
            Self::Capture(e) => e.user_message().to_string(),
            Self::Decoder(_) => {
                "The speech recognizer stopped unexpectedly. Please start listening again."
                    .to_string()
            }
            Self::SampleRateMismatch { .. } => {
                "Audio format does not match the speech model".to_string()
            }
            Self::ListenerClosed => "The listener is no longer running".to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
