//! TOML configuration file loading
//!
//! Supports `~/.config/wakeword/config.toml` as a persistent config source.
//! Every field is optional; the file overlays the built-in defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WakewordConfigFile {
    #[serde(default)]
    pub wake: WakeFileConfig,

    #[serde(default)]
    pub model: ModelFileConfig,

    #[serde(default)]
    pub audio: AudioFileConfig,

    #[serde(default)]
    pub activation: ActivationFileConfig,
}

/// `[wake]` section
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Phrase to listen for (e.g. "ativar")
    pub phrase: Option<String>,

    /// Whether the listener reacts to start requests at all
    pub enabled: Option<bool>,
}

/// `[model]` section
#[derive(Debug, Default, Deserialize)]
pub struct ModelFileConfig {
    /// Model directory
    pub path: Option<PathBuf>,

    /// Rate the model was trained at
    pub sample_rate: Option<u32>,
}

/// `[audio]` section
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Input device name
    pub device: Option<String>,
    pub frame_size: Option<usize>,
    pub queue_frames: Option<usize>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
}

/// `[activation]` section
#[derive(Debug, Default, Deserialize)]
pub struct ActivationFileConfig {
    pub once_per_utterance: Option<bool>,
    pub clear_transcript: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `WakewordConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> WakewordConfigFile {
    let Some(path) = config_file_path() else {
        return WakewordConfigFile::default();
    };

    if !path.exists() {
        return WakewordConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            WakewordConfigFile::default()
        }
    }
}

/// Read and parse one config file
///
/// # Errors
///
/// Returns [`crate::Error::Config`] if the file can't be read or parsed
pub fn read_config_file(path: &Path) -> Result<WakewordConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/wakeword/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("wakeword").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_leaves_rest_unset() {
        let file: WakewordConfigFile = toml::from_str(
            r#"
            [wake]
            phrase = "ok casa"

            [audio]
            frame_size = 2048
            "#,
        )
        .unwrap();

        assert_eq!(file.wake.phrase.as_deref(), Some("ok casa"));
        assert_eq!(file.wake.enabled, None);
        assert_eq!(file.audio.frame_size, Some(2048));
        assert!(file.model.path.is_none());
        assert!(file.activation.once_per_utterance.is_none());
    }

    #[test]
    fn test_read_config_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[wake\nphrase = ").unwrap();

        assert!(matches!(
            read_config_file(&path),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_sections_are_rejected() {
        let parsed: std::result::Result<WakewordConfigFile, _> = toml::from_str("[voice]\nenabled = true");
        assert!(parsed.is_err());
    }
}
