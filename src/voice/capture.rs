//! Audio capture contract
//!
//! A capture backend opens one session at a time per controller and pushes
//! fixed-size mono frames into a [`FrameSink`] until the session is closed.

use thiserror::Error;

use super::FrameSink;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per delivered frame (256ms at 16kHz)
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Frames buffered between capture and decoder before the oldest are dropped
pub const DEFAULT_QUEUE_FRAMES: usize = 32;

/// Errors raised while opening or running a capture session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// Microphone access was refused by the OS or the user
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device never reported that it started, typically because a
    /// permission prompt was left unanswered
    #[error("audio device did not start: {0}")]
    StartTimeout(String),

    /// The device cannot satisfy the requested format
    #[error("capture constraints unsatisfiable: {0}")]
    Unsupported(String),

    /// The device failed or disappeared while capturing
    #[error("audio device error: {0}")]
    Device(String),
}

impl CaptureError {
    /// Returns a user-friendly error message suitable for display in the UI
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "Microphone access was denied",
            Self::DeviceUnavailable(_) => "No microphone found. Please check your audio settings.",
            Self::StartTimeout(_) => {
                "The microphone did not start. Check that microphone permission was granted."
            }
            Self::Unsupported(_) => "Your microphone's audio format is not supported.",
            Self::Device(_) => "The microphone stopped working. Please check your audio settings.",
        }
    }
}

/// Requested capture format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSpec {
    /// Delivered sample rate in Hz
    pub sample_rate: u32,

    /// Delivered channel count (always mono for speech)
    pub channels: u16,

    /// Samples per frame
    pub frame_size: usize,

    /// Frames buffered before the oldest are dropped
    pub queue_frames: usize,

    /// Ask the backend for acoustic echo cancellation
    pub echo_cancellation: bool,

    /// Ask the backend for noise suppression
    pub noise_suppression: bool,

    /// Input device name; `None` selects the host default
    pub device: Option<String>,
}

impl Default for CaptureSpec {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            frame_size: DEFAULT_FRAME_SIZE,
            queue_frames: DEFAULT_QUEUE_FRAMES,
            echo_cancellation: true,
            noise_suppression: true,
            device: None,
        }
    }
}

impl CaptureSpec {
    /// Duration of one frame
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn frame_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.frame_size as f64 / f64::from(self.sample_rate))
    }
}

/// A source of microphone-like audio
pub trait AudioSource: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Open a session delivering frames to `sink`
    ///
    /// Blocks until the device is running or has failed. Permission
    /// prompts happen here, once per session.
    ///
    /// # Errors
    ///
    /// Returns a [`CaptureError`] if the device cannot be opened with `spec`
    fn open(&self, spec: &CaptureSpec, sink: FrameSink)
    -> Result<Box<dyn CaptureSession>, CaptureError>;
}

/// One open capture stream
pub trait CaptureSession: Send {
    /// Rate of the frames this session delivers
    fn sample_rate(&self) -> u32;

    /// Release the device synchronously
    ///
    /// Calling this on an already-closed session is a no-op.
    fn close(&mut self);

    /// Whether the session still holds the device
    fn is_open(&self) -> bool;
}
