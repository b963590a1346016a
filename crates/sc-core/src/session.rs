//! Composition session snapshot
//!
//! The editing layer owns the loop list and track map; a `Session` is the
//! serializable form of that state, used to hand a whole timeline to the
//! engine from outside the UI (e.g. the command-line player).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{PlacedLoop, ScError, ScResult, TrackStates};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    pub loops: Vec<PlacedLoop>,
    pub tracks: TrackStates,
    /// Timeline length in seconds (usually the video length). 0 = unknown.
    pub total_duration: f64,
}

impl Session {
    pub fn from_json(json: &str) -> ScResult<Self> {
        serde_json::from_str(json).map_err(|e| ScError::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> ScResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ScError::Serialization(e.to_string()))
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> ScResult<Self> {
        let path = path.as_ref();
        let session = Self::from_json(&fs::read_to_string(path)?)?;
        log::debug!(
            "Loaded session {}: {} loops, {} tracks",
            path.display(),
            session.loops.len(),
            session.tracks.len()
        );
        Ok(session)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> ScResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// End of the last placed loop, used when no timeline length is known
    pub fn content_end(&self) -> f64 {
        self.loops
            .iter()
            .map(|l| l.end_time)
            .filter(|t| t.is_finite())
            .fold(0.0, f64::max)
    }

    /// Timeline length to schedule against
    pub fn effective_duration(&self) -> f64 {
        if self.total_duration > 0.0 {
            self.total_duration
        } else {
            self.content_end()
        }
    }
}
