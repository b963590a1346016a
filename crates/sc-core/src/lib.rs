//! sc-core: Shared timeline types and pure scheduling math for Scorecraft
//!
//! This crate holds everything the loop engine can compute without touching
//! audio hardware:
//! - Placed loops, track and master mix state
//! - Segment tiling (repeating a short clip across a long window)
//! - Volume compositing (loop × track × master, mute and solo)

mod error;
mod mix;
mod placement;
mod session;
mod tiler;

pub use error::*;
pub use mix::*;
pub use placement::*;
pub use session::*;
pub use tiler::*;

/// Decibel value wrapper
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Decibels(pub f64);

impl Decibels {
    pub const ZERO: Self = Self(0.0);
    pub const NEG_INF: Self = Self(f64::NEG_INFINITY);

    /// Logarithmic control value for a linear gain. Silence maps to -inf.
    #[inline]
    pub fn from_gain(gain: f64) -> Self {
        if gain <= 0.0 {
            Self::NEG_INF
        } else {
            Self(20.0 * gain.log10())
        }
    }

    #[inline]
    pub fn to_gain(self) -> f64 {
        if self.0 <= -144.0 {
            0.0
        } else {
            10.0_f64.powf(self.0 / 20.0)
        }
    }

    #[inline]
    pub fn is_silent(self) -> bool {
        self.0 == f64::NEG_INFINITY
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::ZERO
    }
}
