//! Engine error types

use sc_core::{ClipRef, LoopError};
use thiserror::Error;

/// Failure to turn a clip reference into a playable player
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Clip not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Access error: {0}")]
    Access(String),

    #[error("Timed out after {timeout_ms} ms loading {clip}")]
    Timeout { clip: ClipRef, timeout_ms: u64 },

    #[error("Clip {clip} is unplayable (decode: {decode}; streaming: {streaming})")]
    Unplayable {
        clip: ClipRef,
        decode: String,
        streaming: String,
    },
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(e.to_string()),
            _ => Self::Access(e.to_string()),
        }
    }
}

/// Failure to start or drive playback
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Output not initialized")]
    OutputNotReady,

    #[error("Start rejected: {0}")]
    StartRejected(String),

    #[error("Player has been disposed")]
    Disposed,
}

/// Output device failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutputError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Failed to get device config: {0}")]
    Config(String),

    #[error("Failed to build stream: {0}")]
    StreamBuild(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Output did not start within {0} ms")]
    StartTimeout(u64),
}

/// Top-level engine error
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Invalid loop: {0}")]
    Loop(#[from] LoopError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;
