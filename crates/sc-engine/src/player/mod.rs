//! Players - one per loaded clip
//!
//! Provides:
//! - [`Player`] contract used by the scheduler and the preview slot
//! - Decode-backed players with a native bounded start
//! - Streaming players for clips that cannot be decoded in time
//! - [`PlayerFactory`] that picks between the two

mod decode;
mod factory;
mod media;
mod streaming;

pub use decode::{DecodePlayer, DecodedClip, decode_clip};
pub use factory::{ClipResolver, FileResolver, MemoryResolver, PlayerFactory, SinkPlayerFactory};
pub use media::LinearResampler;
pub use streaming::StreamingPlayer;

use crate::error::PlaybackError;

/// Which backend a player uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerKind {
    /// Fully decoded into memory
    Decode,
    /// Decoded incrementally while playing
    Streaming,
}

impl PlayerKind {
    /// Whether `start(offset, duration)` stops by itself after `duration`.
    /// Owners of players without it must arm their own forced stop.
    #[inline]
    pub fn has_bounded_start(self) -> bool {
        matches!(self, Self::Decode)
    }
}

/// A playable handle for one clip
pub trait Player: Send {
    fn kind(&self) -> PlayerKind;

    /// False once disposed
    fn is_loaded(&self) -> bool;

    /// Clip length in seconds (0 if unknown)
    fn duration(&self) -> f64;

    /// Start `offset` seconds into the clip. Restarting an already playing
    /// player replaces the previous voice.
    fn start(&mut self, offset: f64, duration: f64) -> Result<(), PlaybackError>;

    /// Silence the current voice, if any
    fn stop(&mut self);

    /// Linear gain in `[0, 1]`; applies to the current voice immediately
    fn set_gain(&mut self, gain: f64);

    /// Release the player. Safe to call more than once.
    fn dispose(&mut self);
}
