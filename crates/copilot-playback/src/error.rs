//! Error types for the playback engine

use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures while establishing a playback session.
///
/// Any of these leaves the engine disconnected; the caller must retry `connect()` from scratch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Could not install render module: {0}")]
    ModuleLoadFailed(String),

    #[error("Audio context could not be resumed: {0}")]
    ContextResume(String),

    #[error("Invalid playback configuration: {0}")]
    InvalidConfig(String),
}

impl From<copilot_core::ConfigError> for ConnectError {
    fn from(err: copilot_core::ConfigError) -> Self {
        ConnectError::InvalidConfig(err.to_string())
    }
}

/// Errors that can occur while feeding or querying the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not connected, call connect() first")]
    NotConnected,

    #[error("Buffer is not 16-bit PCM: {0}")]
    InvalidBufferType(String),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Unknown playback command: {0}")]
    UnknownCommand(String),

    #[error("Malformed realtime event: {0}")]
    Event(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DefaultStreamConfigError> for EngineError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        EngineError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for EngineError {
    fn from(err: cpal::BuildStreamError) -> Self {
        EngineError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for EngineError {
    fn from(err: cpal::PlayStreamError) -> Self {
        EngineError::AudioStream(err.to_string())
    }
}
