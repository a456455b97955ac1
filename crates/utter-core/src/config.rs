//! Configuration management for utter.
//!
//! This module provides core configuration that doesn't depend on the audio
//! or transcription backends.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::APP_NAME;

/// Environment variable that overrides the configured OpenAI key.
const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

/// Voice activity thresholds, fixed for the lifetime of one session.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Thresholds {
    /// Peak amplitude (0-128 scale) above which a frame counts as speech
    pub speech_threshold: f32,
    /// Consecutive speech frames before the volume is trusted
    pub sustained_frames_threshold: u32,
    /// Continuous silence after speech before auto-stop fires
    pub silence_duration_ms: u64,
    /// Shortest utterance considered intentional
    pub min_speech_duration_ms: u64,
    /// Absolute recording ceiling regardless of detector state
    pub max_recording_time_ms: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            speech_threshold: 5.0,
            sustained_frames_threshold: 5,
            silence_duration_ms: 5_000,
            min_speech_duration_ms: 500,
            max_recording_time_ms: 30_000,
        }
    }
}

impl Thresholds {
    pub fn with_speech_threshold(mut self, threshold: f32) -> Self {
        self.speech_threshold = threshold;
        self
    }

    pub fn with_sustained_frames(mut self, frames: u32) -> Self {
        self.sustained_frames_threshold = frames;
        self
    }

    pub fn with_silence_duration(mut self, duration: Duration) -> Self {
        self.silence_duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_min_speech_duration(mut self, duration: Duration) -> Self {
        self.min_speech_duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_max_recording_time(mut self, duration: Duration) -> Self {
        self.max_recording_time_ms = duration.as_millis() as u64;
        self
    }

    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }

    pub fn min_speech_duration(&self) -> Duration {
        Duration::from_millis(self.min_speech_duration_ms)
    }

    pub fn max_recording_time(&self) -> Duration {
        Duration::from_millis(self.max_recording_time_ms)
    }
}

fn is_default_thresholds(v: &Thresholds) -> bool {
    *v == Thresholds::default()
}

/// Core configuration structure for the application.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// OpenAI API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,

    /// Preferred language for transcription (ISO 639-1 code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Model to use for transcriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Input device name, the host default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Copy the transcript to the clipboard
    #[serde(default, skip_serializing_if = "is_false")]
    pub copy_to_clipboard: bool,

    /// Show desktop notifications for notices and errors
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub notifications: bool,

    /// Drop captures that never got loud or long enough before transcribing
    #[serde(default, skip_serializing_if = "is_false")]
    pub reject_noise: bool,

    /// Milliseconds between amplitude samples
    #[serde(
        default = "default_frame_interval",
        skip_serializing_if = "is_default_frame_interval"
    )]
    pub frame_interval_ms: u64,

    /// Samples per amplitude window
    #[serde(
        default = "default_window_size",
        skip_serializing_if = "is_default_window_size"
    )]
    pub window_size: usize,

    /// Voice activity thresholds
    #[serde(default, skip_serializing_if = "is_default_thresholds")]
    pub vad: Thresholds,
}

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn default_frame_interval() -> u64 {
    16
}

fn is_default_frame_interval(v: &u64) -> bool {
    *v == default_frame_interval()
}

fn default_window_size() -> usize {
    2048
}

fn is_default_window_size(v: &usize) -> bool {
    *v == default_window_size()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_key: None,
            language: None,
            model: None,
            device: None,
            copy_to_clipboard: false,
            notifications: true,
            reject_noise: false,
            frame_interval_ms: default_frame_interval(),
            window_size: default_window_size(),
            vad: Thresholds::default(),
        }
    }
}

impl Config {
    /// Get the OpenAI API key, preferring the environment over the file
    pub fn key_openai(&self) -> Option<String> {
        std::env::var(OPENAI_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.openai_key.clone())
    }

    /// Get the preferred language
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Get the model name
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Get the input device name
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Get the amplitude sampling interval as a Duration
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the default configuration directory.
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Creates a new ConfigManager with a specified configuration directory.
    pub fn with_config_dir<P: AsRef<std::path::Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Loads the configuration from the config file or returns default.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file at {:?}", self.config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))?;

        if config.key_openai().is_none() {
            warn!(
                "OpenAI API key is not set. Transcriptions will not work without it. \
                 Set {} or add openai_key to {:?}.",
                OPENAI_KEY_ENV, self.config_path
            );
        }

        Ok(config)
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.openai_key.is_none());
        assert!(config.notifications);
        assert!(!config.copy_to_clipboard);
        assert!(!config.reject_noise);
        assert_eq!(config.frame_interval(), Duration::from_millis(16));
        assert_eq!(config.window_size, 2048);
    }

    #[test]
    fn test_default_thresholds() {
        let t = Thresholds::default();
        assert_eq!(t.speech_threshold, 5.0);
        assert_eq!(t.sustained_frames_threshold, 5);
        assert_eq!(t.silence_duration(), Duration::from_millis(5000));
        assert_eq!(t.min_speech_duration(), Duration::from_millis(500));
        assert_eq!(t.max_recording_time(), Duration::from_millis(30000));
    }

    #[test]
    fn test_threshold_setters() {
        let t = Thresholds::default()
            .with_speech_threshold(12.0)
            .with_silence_duration(Duration::from_millis(800))
            .with_max_recording_time(Duration::from_secs(3));
        assert_eq!(t.speech_threshold, 12.0);
        assert_eq!(t.silence_duration_ms, 800);
        assert_eq!(t.max_recording_time_ms, 3000);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config {
            openai_key: Some("test-key".to_string()),
            model: Some("whisper-1".to_string()),
            vad: Thresholds::default().with_silence_duration(Duration::from_millis(1500)),
            ..Default::default()
        };

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(config.openai_key, deserialized.openai_key);
        assert_eq!(config.model, deserialized.model);
        assert_eq!(deserialized.vad.silence_duration_ms, 1500);
        assert_eq!(deserialized.vad.speech_threshold, 5.0);
    }

    #[test]
    fn test_partial_vad_table() {
        let config: Config = toml::from_str("[vad]\nspeech_threshold = 9.5\n").unwrap();
        assert_eq!(config.vad.speech_threshold, 9.5);
        assert_eq!(config.vad.max_recording_time_ms, 30_000);
    }

    #[test]
    fn test_defaults_are_not_written() {
        let serialized = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(serialized.trim().is_empty(), "unexpected: {serialized}");
    }

    #[test]
    fn test_config_manager_save_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_config_dir(temp_dir.path().join("nested"));

        let config = Config {
            openai_key: Some("test-key".to_string()),
            reject_noise: true,
            ..Default::default()
        };

        manager.save(&config).unwrap();
        let loaded = manager.load().unwrap();

        assert_eq!(config.openai_key, loaded.openai_key);
        assert!(loaded.reject_noise);
        assert!(fs::metadata(manager.config_path()).is_ok());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_config_dir(temp_dir.path());
        let loaded = manager.load().unwrap();
        assert_eq!(loaded.vad, Thresholds::default());
    }
}
