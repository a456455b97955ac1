//! Core types and configuration for utter.
//!
//! This crate provides platform-agnostic types that can be used across
//! all utter sub-crates.

mod artifact;
mod config;
mod event;
mod state;

pub use artifact::AudioArtifact;
pub use config::{Config, ConfigManager, Thresholds};
pub use event::{ErrorKind, NoSpeechReason, StopReason, VadEvent};
pub use state::SessionState;

/// Application name
pub const APP_NAME: &str = "utter";

/// Pretty application name for display
pub const APP_NAME_PRETTY: &str = "Utter";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
