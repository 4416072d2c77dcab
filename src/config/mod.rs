//! Configuration management for the wake-word listener
//!
//! Layers, lowest priority first: built-in defaults, the TOML file,
//! `WAKEWORD_*` environment variables. The binary applies CLI flags on top.

pub mod file;

use std::path::{Path, PathBuf};

use crate::voice::{CaptureSpec, DEFAULT_FRAME_SIZE, DEFAULT_QUEUE_FRAMES, ModelRef, SAMPLE_RATE};
use crate::{Error, Result};

use self::file::WakewordConfigFile;

/// Phrase used when none is configured
pub const DEFAULT_PHRASE: &str = "ativar";

/// Directory name of the bundled Portuguese model
const DEFAULT_MODEL_DIR: &str = "vosk-model-small-pt-0.3";

/// Wake-word listener configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub wake: WakeConfig,
    pub model: ModelConfig,
    pub audio: AudioConfig,
    pub activation: ActivationConfig,
}

/// Wake phrase settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeConfig {
    /// Phrase that triggers activation
    pub phrase: String,

    /// When false, start requests are ignored
    pub enabled: bool,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrase: DEFAULT_PHRASE.to_string(),
            enabled: true,
        }
    }
}

/// Speech model settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Model directory
    pub path: PathBuf,

    /// Rate the model was trained at; must equal the capture rate
    pub sample_rate: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            sample_rate: SAMPLE_RATE,
        }
    }
}

/// Microphone settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// Input device name (host default when unset)
    pub device: Option<String>,

    /// Samples per frame
    pub frame_size: usize,

    /// Frames buffered before the oldest are dropped
    pub queue_frames: usize,

    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            frame_size: DEFAULT_FRAME_SIZE,
            queue_frames: DEFAULT_QUEUE_FRAMES,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// What happens around an activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationConfig {
    /// Fire at most once per utterance
    pub once_per_utterance: bool,

    /// Clear the published transcript on activation
    pub clear_transcript: bool,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            once_per_utterance: true,
            clear_transcript: true,
        }
    }
}

/// Default model location: `~/.local/share/wakeword/models/<model>` on Linux
fn default_model_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("models").join(DEFAULT_MODEL_DIR),
        |d| {
            d.data_dir()
                .join("wakeword")
                .join("models")
                .join(DEFAULT_MODEL_DIR)
        },
    )
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// With `path`, that file is read and must parse; without it the
    /// standard location is tried and skipped when absent or broken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an explicit file is unreadable, an
    /// environment value is malformed, or validation fails
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        let mut config = Self::default();
        config.overlay(file);
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;

        tracing::debug!(
            phrase = %config.wake.phrase,
            model = %config.model.path.display(),
            enabled = config.wake.enabled,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Apply every value set in the file
    pub fn overlay(&mut self, file: WakewordConfigFile) {
        let WakewordConfigFile {
            wake,
            model,
            audio,
            activation,
        } = file;

        if let Some(phrase) = wake.phrase {
            self.wake.phrase = phrase;
        }
        if let Some(enabled) = wake.enabled {
            self.wake.enabled = enabled;
        }

        if let Some(path) = model.path {
            self.model.path = path;
        }
        if let Some(rate) = model.sample_rate {
            self.model.sample_rate = rate;
        }

        if audio.device.is_some() {
            self.audio.device = audio.device;
        }
        if let Some(size) = audio.frame_size {
            self.audio.frame_size = size;
        }
        if let Some(depth) = audio.queue_frames {
            self.audio.queue_frames = depth;
        }
        if let Some(aec) = audio.echo_cancellation {
            self.audio.echo_cancellation = aec;
        }
        if let Some(ns) = audio.noise_suppression {
            self.audio.noise_suppression = ns;
        }

        if let Some(once) = activation.once_per_utterance {
            self.activation.once_per_utterance = once;
        }
        if let Some(clear) = activation.clear_transcript {
            self.activation.clear_transcript = clear;
        }
    }

    /// Apply `WAKEWORD_*` overrides read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `WAKEWORD_ENABLED` is not a boolean
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(phrase) = lookup("WAKEWORD_PHRASE") {
            self.wake.phrase = phrase;
        }
        if let Some(path) = lookup("WAKEWORD_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(device) = lookup("WAKEWORD_DEVICE") {
            self.audio.device = Some(device).filter(|d| !d.is_empty());
        }
        if let Some(raw) = lookup("WAKEWORD_ENABLED") {
            self.wake.enabled = parse_bool(&raw).ok_or_else(|| {
                Error::Config(format!("WAKEWORD_ENABLED must be a boolean, got '{raw}'"))
            })?;
        }
        Ok(())
    }

    /// Check the values make a runnable listener
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.wake.phrase.trim().is_empty() {
            return Err(Error::Config("wake phrase must not be empty".to_string()));
        }
        if self.audio.frame_size == 0 {
            return Err(Error::Config("audio.frame_size must be positive".to_string()));
        }
        if self.audio.queue_frames == 0 {
            return Err(Error::Config("audio.queue_frames must be positive".to_string()));
        }
        if self.model.sample_rate != SAMPLE_RATE {
            return Err(Error::Config(format!(
                "model.sample_rate must be {SAMPLE_RATE} Hz, got {}",
                self.model.sample_rate
            )));
        }
        Ok(())
    }

    /// Reference to the configured model
    #[must_use]
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(self.model.path.clone(), self.model.sample_rate)
    }

    /// Capture format derived from the audio section
    #[must_use]
    pub fn capture_spec(&self) -> CaptureSpec {
        CaptureSpec {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            frame_size: self.audio.frame_size,
            queue_frames: self.audio.queue_frames,
            echo_cancellation: self.audio.echo_cancellation,
            noise_suppression: self.audio.noise_suppression,
            device: self.audio.device.clone(),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
