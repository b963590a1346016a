//! Volume compositing
//!
//! The effective gain of a sounding segment is the product of the loop,
//! track and master volumes with every mute flag and the solo exclusion
//! applied as a 0/1 factor.

use crate::{Decibels, MasterState, PlacedLoop, TrackState};

/// True if at least one track is soloed
pub fn any_solo<'a>(tracks: impl IntoIterator<Item = &'a TrackState>) -> bool {
    tracks.into_iter().any(|t| t.solo)
}

/// Effective linear gain of `placed` on `track`, in `[0, 1]`
pub fn effective_gain(
    placed: &PlacedLoop,
    track: &TrackState,
    master: &MasterState,
    any_solo: bool,
) -> f64 {
    let solo_factor = if any_solo && !track.solo { 0.0 } else { 1.0 };
    let mute = |muted: bool| if muted { 0.0 } else { 1.0 };

    let gain = placed.volume
        * track.volume
        * master.volume
        * mute(placed.muted)
        * mute(track.muted)
        * mute(master.muted)
        * solo_factor;

    gain.clamp(0.0, 1.0)
}

/// Control value for players that take logarithmic gain
#[inline]
pub fn gain_to_decibels(gain: f64) -> Decibels {
    Decibels::from_gain(gain)
}

/// Control value for players that take linear gain
#[inline]
pub fn gain_to_linear(gain: f64) -> f32 {
    if gain.is_nan() {
        return 0.0;
    }
    gain.clamp(0.0, 1.0) as f32
}
