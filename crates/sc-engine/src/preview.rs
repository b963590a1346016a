//! Clip preview - audition a clip outside the timeline
//!
//! One preview at a time, played once from the top at master gain. It does
//! not follow the transport. Streaming previews get a forced stop on the
//! engine clock, since their backend cannot bound a start by itself.

use sc_core::ClipRef;

use crate::error::EngineResult;
use crate::player::{Player, PlayerFactory, PlayerKind};

#[derive(Default)]
pub struct PreviewSlot {
    player: Option<Box<dyn Player>>,
    clip: Option<ClipRef>,
    /// Clock reading at which a streaming preview is cut off
    stop_at: Option<f64>,
}

impl PreviewSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any running preview with `clip`
    pub fn start(
        &mut self,
        factory: &dyn PlayerFactory,
        clip: &ClipRef,
        gain: f64,
        now: f64,
    ) -> EngineResult<PlayerKind> {
        self.stop();

        let mut player = factory.create_player(clip)?;
        let duration = player.duration();
        let kind = player.kind();

        player.set_gain(gain);
        player.start(0.0, duration)?;

        if !kind.has_bounded_start() && duration > 0.0 {
            self.stop_at = Some(now + duration);
        }
        log::debug!("Previewing {} ({:.2}s, {:?})", clip, duration, kind);

        self.player = Some(player);
        self.clip = Some(clip.clone());
        Ok(kind)
    }

    pub fn set_gain(&mut self, gain: f64) {
        if let Some(player) = self.player.as_mut() {
            player.set_gain(gain);
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.dispose();
        }
        self.clip = None;
        self.stop_at = None;
    }

    /// Apply the forced stop once the clock passes it
    pub fn poll(&mut self, now: f64) {
        if self.stop_at.is_some_and(|deadline| now >= deadline) {
            log::debug!("Forced stop of preview");
            self.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.player.is_some()
    }

    pub fn clip(&self) -> Option<&ClipRef> {
        self.clip.as_ref()
    }

    pub fn stop_at(&self) -> Option<f64> {
        self.stop_at
    }
}
