//! sc-engine: Loop playback engine for Scorecraft
//!
//! Provides:
//! - Transport with a clock-derived playhead
//! - Reconciling scheduler over placed loops (segments, timers, gains)
//! - Decode and streaming players behind one trait, with timed fallback
//! - Lock-free output sink feeding the audio device
//! - Clip preview outside the timeline

// Scheduling helpers pass segment, offset, duration and gain together
#![allow(clippy::too_many_arguments)]

pub mod config;
mod driver;
mod engine;
mod error;
mod events;
pub mod output;
pub mod player;
mod preview;
pub mod scheduler;
pub mod timers;
pub mod transport;

pub use config::*;
pub use driver::*;
pub use engine::*;
pub use error::*;
pub use events::*;
pub use output::{AudioOutput, OutputSink, SinkGain, SinkMixer};
pub use player::*;
pub use preview::PreviewSlot;
pub use scheduler::{ActiveVoice, Scheduler};
pub use timers::*;
pub use transport::*;
