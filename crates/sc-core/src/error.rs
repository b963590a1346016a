//! Error types for Scorecraft

use thiserror::Error;

use crate::LoopId;

/// A placed loop that cannot be accepted into the schedule
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoopError {
    #[error("loop {id}: start/end times must be finite (start={start}, end={end})")]
    NonFiniteWindow { id: LoopId, start: f64, end: f64 },

    #[error("loop {id}: end time {end} must be after start time {start}")]
    EmptyWindow { id: LoopId, start: f64, end: f64 },

    #[error("loop {id}: source duration must be positive, got {duration}")]
    InvalidSourceDuration { id: LoopId, duration: f64 },

    #[error("loop {id}: volume must be a finite non-negative gain, got {volume}")]
    InvalidVolume { id: LoopId, volume: f64 },

    #[error("loop {0}: duplicate id in schedule")]
    DuplicateId(LoopId),
}

impl LoopError {
    pub fn loop_id(&self) -> &LoopId {
        match self {
            Self::NonFiniteWindow { id, .. }
            | Self::EmptyWindow { id, .. }
            | Self::InvalidSourceDuration { id, .. }
            | Self::InvalidVolume { id, .. }
            | Self::DuplicateId(id) => id,
        }
    }
}

/// Core error type
#[derive(Error, Debug)]
pub enum ScError {
    #[error("Invalid loop: {0}")]
    Loop(#[from] LoopError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
}

/// Result type alias
pub type ScResult<T> = Result<T, ScError>;
