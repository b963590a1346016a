//! Placed loops and mix state
//!
//! Everything here is owned by the editing layer and handed to the engine
//! as a whole on every edit. The engine never mutates it.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::LoopError;

// ═══════════════════════════════════════════════════════════════════════════
// ID TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// Identifier of one loop instance on the timeline, stable across edits
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoopId(pub String);

impl LoopId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LoopId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LoopId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque locator of an audio clip, resolved by the player factory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipRef(pub String);

impl ClipRef {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased file extension of the locator, if it has one
    pub fn extension(&self) -> Option<String> {
        let name = self.0.rsplit(['/', '\\']).next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl fmt::Display for ClipRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClipRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PLACED LOOP
// ═══════════════════════════════════════════════════════════════════════════

pub const DEFAULT_LOOP_VOLUME: f64 = 0.8;
pub const DEFAULT_TRACK_VOLUME: f64 = 0.7;
pub const DEFAULT_MASTER_VOLUME: f64 = 1.0;

fn default_loop_volume() -> f64 {
    DEFAULT_LOOP_VOLUME
}

/// A loop instance positioned on the timeline
///
/// The window `[start_time, end_time)` may be longer than the clip; the
/// clip is then repeated to fill it (see [`crate::tile`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedLoop {
    pub id: LoopId,
    pub source_id: ClipRef,
    #[serde(default)]
    pub track_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub source_duration: f64,
    #[serde(default = "default_loop_volume")]
    pub volume: f64,
    #[serde(default)]
    pub muted: bool,
}

impl PlacedLoop {
    pub fn new(
        id: impl Into<LoopId>,
        source_id: impl Into<ClipRef>,
        track_index: usize,
        start_time: f64,
        end_time: f64,
        source_duration: f64,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            track_index,
            start_time,
            end_time,
            source_duration,
            volume: DEFAULT_LOOP_VOLUME,
            muted: false,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// Length of the placed window in seconds
    #[inline]
    pub fn window(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Check the invariants a loop must hold before it can be scheduled
    pub fn validate(&self) -> Result<(), LoopError> {
        if !self.start_time.is_finite() || !self.end_time.is_finite() {
            return Err(LoopError::NonFiniteWindow {
                id: self.id.clone(),
                start: self.start_time,
                end: self.end_time,
            });
        }
        if self.end_time <= self.start_time {
            return Err(LoopError::EmptyWindow {
                id: self.id.clone(),
                start: self.start_time,
                end: self.end_time,
            });
        }
        if !(self.source_duration.is_finite() && self.source_duration > 0.0) {
            return Err(LoopError::InvalidSourceDuration {
                id: self.id.clone(),
                duration: self.source_duration,
            });
        }
        if !(self.volume.is_finite() && self.volume >= 0.0) {
            return Err(LoopError::InvalidVolume {
                id: self.id.clone(),
                volume: self.volume,
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRACK / MASTER STATE
// ═══════════════════════════════════════════════════════════════════════════

/// Per-track mix settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackState {
    pub volume: f64,
    pub muted: bool,
    pub solo: bool,
}

impl Default for TrackState {
    fn default() -> Self {
        Self {
            volume: DEFAULT_TRACK_VOLUME,
            muted: false,
            solo: false,
        }
    }
}

impl TrackState {
    pub fn with_volume(volume: f64) -> Self {
        Self {
            volume,
            ..Self::default()
        }
    }

    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    pub fn soloed(mut self, solo: bool) -> Self {
        self.solo = solo;
        self
    }
}

/// Track states keyed by track index. Missing tracks use the default.
pub type TrackStates = HashMap<usize, TrackState>;

/// Output-wide volume and mute
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterState {
    pub volume: f64,
    pub muted: bool,
}

impl Default for MasterState {
    fn default() -> Self {
        Self {
            volume: DEFAULT_MASTER_VOLUME,
            muted: false,
        }
    }
}

impl MasterState {
    /// Linear master gain with mute applied
    #[inline]
    pub fn gain(&self) -> f64 {
        if self.muted { 0.0 } else { self.volume }
    }
}
