//! Transport - the authoritative playback clock
//!
//! Position is never accumulated by hand. While playing it is derived from a
//! [`Clock`] as `base + (now - anchor)`, so it stays monotonic no matter how
//! often or how late the host ticks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

// ═══════════════════════════════════════════════════════════════════════════
// CLOCKS
// ═══════════════════════════════════════════════════════════════════════════

/// Monotonic time source in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock backed by [`Instant`]
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for deterministic tests and offline rendering
#[derive(Debug, Default)]
pub struct ManualClock {
    seconds_bits: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            seconds_bits: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.seconds_bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds.max(0.0));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.seconds_bits.load(Ordering::Relaxed))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// Notification of a transport transition, for the UI and the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportEvent {
    Started { position: f64 },
    Paused { position: f64 },
    Stopped,
    Seeked { position: f64 },
    /// Playback reached the end of the timeline and stopped
    Ended,
}

/// Point-in-time view of the transport used by one reconciliation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSnapshot {
    pub state: TransportState,
    pub position: f64,
    /// Discontinuity counter; bumped on every transition and seek
    pub epoch: u64,
}

impl TransportSnapshot {
    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }
}

pub struct Transport {
    state: TransportState,
    /// Position when the transport last changed (seconds)
    base: f64,
    /// Clock reading when `base` was taken
    anchor: f64,
    epoch: u64,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: TransportState::Stopped,
            base: 0.0,
            anchor: 0.0,
            epoch: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> TransportState {
        self.state
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current position in seconds
    pub fn position(&self, clock: &dyn Clock) -> f64 {
        match self.state {
            TransportState::Playing => self.base + (clock.now() - self.anchor).max(0.0),
            _ => self.base,
        }
    }

    pub fn snapshot(&self, clock: &dyn Clock) -> TransportSnapshot {
        TransportSnapshot {
            state: self.state,
            position: self.position(clock),
            epoch: self.epoch,
        }
    }

    /// Stopped/paused → playing. Returns `None` if already playing.
    pub fn play(&mut self, clock: &dyn Clock) -> Option<TransportEvent> {
        if self.state == TransportState::Playing {
            return None;
        }
        self.anchor = clock.now();
        self.state = TransportState::Playing;
        self.epoch += 1;
        Some(TransportEvent::Started {
            position: self.base,
        })
    }

    /// Freeze the position. Returns `None` unless playing.
    pub fn pause(&mut self, clock: &dyn Clock) -> Option<TransportEvent> {
        if self.state != TransportState::Playing {
            return None;
        }
        self.base = self.position(clock);
        self.state = TransportState::Paused;
        self.epoch += 1;
        Some(TransportEvent::Paused {
            position: self.base,
        })
    }

    /// Stop and rewind to zero
    pub fn stop(&mut self) -> TransportEvent {
        self.halt();
        TransportEvent::Stopped
    }

    /// Stop because the timeline is over
    pub fn finish(&mut self) -> TransportEvent {
        self.halt();
        TransportEvent::Ended
    }

    /// Move the playhead to `max(0, seconds)` in any state
    pub fn seek(&mut self, seconds: f64, clock: &dyn Clock) -> TransportEvent {
        let position = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.base = position;
        self.anchor = clock.now();
        self.epoch += 1;
        TransportEvent::Seeked { position }
    }

    fn halt(&mut self) {
        self.state = TransportState::Stopped;
        self.base = 0.0;
        self.epoch += 1;
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}
