//! Scheduler - reconciles the loop set against the transport
//!
//! Nothing here is incremental bookkeeping. Every reconciliation re-derives,
//! from the full loop set and a transport snapshot, which segment of each
//! loop should be sounding right now and which one comes next. It then
//! brings players and timers in line with that plan:
//! - start timers are all cancelled first, then re-armed
//! - voices that no longer match the plan are stopped
//! - voices that still match keep playing and only get their gain refreshed
//!
//! Running it twice with unchanged inputs starts nothing new.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sc_core::{
    ClipRef, LoopError, LoopId, MasterState, PlacedLoop, Segment, SegmentWindow, TrackState,
    TrackStates, any_solo, effective_gain, locate, segment_at,
};

use crate::config::SchedulerConfig;
use crate::error::LoadError;
use crate::events::{EngineEvent, EventEmitter};
use crate::player::{Player, PlayerFactory, PlayerKind};
use crate::timers::{TimerKey, TimerKind, TimerQueue};
use crate::transport::TransportSnapshot;

// ═══════════════════════════════════════════════════════════════════════════
// SLOTS AND VOICES
// ═══════════════════════════════════════════════════════════════════════════

/// The player owned by one loop id
struct LoopSlot {
    clip: ClipRef,
    player: Option<Box<dyn Player>>,
    /// Set once the factory gave up on the clip; cleared with the slot
    failed: Option<LoadError>,
}

impl LoopSlot {
    fn new(clip: ClipRef) -> Self {
        Self {
            clip,
            player: None,
            failed: None,
        }
    }

    fn dispose(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.dispose();
        }
    }
}

/// A segment currently sounding
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveVoice {
    pub repeat_index: usize,
    pub segment_start: f64,
    pub segment_end: f64,
    /// Transport position at which the voice runs out
    pub ends_at: f64,
    /// Transport epoch the voice was started in
    pub epoch: u64,
    pub kind: PlayerKind,
}

impl ActiveVoice {
    fn matches(&self, segment: &Segment, epoch: u64) -> bool {
        self.epoch == epoch
            && self.repeat_index == segment.repeat_index
            && self.segment_start == segment.start
            && self.segment_end == segment.end
    }
}

/// What one loop should be doing at the snapshot position
struct LoopPlan {
    loop_id: LoopId,
    clip: ClipRef,
    gain: f64,
    window: SegmentWindow,
}

// ═══════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════

pub struct Scheduler {
    config: SchedulerConfig,
    factory: Arc<dyn PlayerFactory>,
    loops: Vec<PlacedLoop>,
    tracks: TrackStates,
    master: MasterState,
    total_duration: f64,
    slots: HashMap<LoopId, LoopSlot>,
    active: HashMap<LoopId, ActiveVoice>,
    timers: TimerQueue,
    events: EventEmitter,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        factory: Arc<dyn PlayerFactory>,
        master: MasterState,
        events: EventEmitter,
    ) -> Self {
        Self {
            config,
            factory,
            loops: Vec::new(),
            tracks: TrackStates::new(),
            master,
            total_duration: 0.0,
            slots: HashMap::new(),
            active: HashMap::new(),
            timers: TimerQueue::new(),
            events,
        }
    }

    // ─── Inputs ──────────────────────────────────────────────────────────

    /// Replace the loop set. Invalid and duplicate loops are excluded,
    /// reported, and returned. Players of loops that left the set, or whose
    /// clip changed, are disposed.
    pub fn set_loops(&mut self, loops: Vec<PlacedLoop>) -> Vec<LoopError> {
        let mut accepted: Vec<PlacedLoop> = Vec::with_capacity(loops.len());
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();

        for placed in loops {
            if let Err(error) = placed.validate() {
                rejected.push(error);
            } else if !seen.insert(placed.id.clone()) {
                rejected.push(LoopError::DuplicateId(placed.id.clone()));
            } else {
                accepted.push(placed);
            }
        }

        for error in &rejected {
            self.report_rejection(error);
        }

        let stale: Vec<LoopId> = self
            .slots
            .iter()
            .filter(|(id, slot)| {
                !accepted
                    .iter()
                    .any(|l| &l.id == *id && l.source_id == slot.clip)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            self.release(&id);
        }

        // Loops that disappeared without ever getting a slot may still own
        // timers or a voice record
        let ids: HashSet<&LoopId> = accepted.iter().map(|l| &l.id).collect();
        let orphaned: Vec<LoopId> = self
            .active
            .keys()
            .filter(|id| !ids.contains(id))
            .cloned()
            .collect();
        for id in orphaned {
            self.release(&id);
        }

        self.loops = accepted;
        rejected
    }

    /// Add a loop or replace the one with the same id
    pub fn upsert_loop(&mut self, placed: PlacedLoop) -> Result<(), LoopError> {
        if let Err(error) = placed.validate() {
            self.report_rejection(&error);
            return Err(error);
        }

        let clip_changed = self
            .slots
            .get(&placed.id)
            .is_some_and(|slot| slot.clip != placed.source_id);
        if clip_changed {
            self.release(&placed.id);
        }

        match self.loops.iter_mut().find(|l| l.id == placed.id) {
            Some(existing) => *existing = placed,
            None => self.loops.push(placed),
        }
        Ok(())
    }

    /// Remove a loop, stopping and disposing its player. Returns false if
    /// the id was unknown.
    pub fn remove_loop(&mut self, loop_id: &LoopId) -> bool {
        let before = self.loops.len();
        self.loops.retain(|l| &l.id != loop_id);
        self.release(loop_id);
        self.loops.len() != before
    }

    pub fn set_tracks(&mut self, tracks: TrackStates) {
        self.tracks = tracks;
    }

    pub fn set_track(&mut self, index: usize, state: TrackState) {
        self.tracks.insert(index, state);
    }

    pub fn set_master(&mut self, master: MasterState) {
        self.master = master;
    }

    pub fn set_total_duration(&mut self, seconds: f64) {
        self.total_duration = if seconds.is_finite() {
            seconds.max(0.0)
        } else {
            0.0
        };
    }

    // ─── Reconciliation ──────────────────────────────────────────────────

    /// Bring players and timers in line with the loop set at `now`
    pub fn reconcile(&mut self, now: TransportSnapshot) {
        let cancelled = self.timers.cancel_kind(TimerKind::Start);

        let plans = if now.is_playing() {
            self.plan(now.position)
        } else {
            Vec::new()
        };

        // Cancelling strictly precedes starting
        let stale: Vec<LoopId> = self
            .active
            .iter()
            .filter(|(id, voice)| {
                let plan = plans.iter().find(|p| &p.loop_id == *id);
                !plan.is_some_and(|plan| {
                    plan.gain > 0.0
                        && plan
                            .window
                            .current
                            .as_ref()
                            .is_some_and(|c| voice.matches(&c.segment, now.epoch))
                })
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.silence(id);
        }

        let mut started = 0;
        for plan in &plans {
            if plan.gain <= 0.0 || self.is_unplayable(&plan.loop_id) {
                continue;
            }

            if let Some(current) = &plan.window.current {
                let sounding = self
                    .active
                    .get(&plan.loop_id)
                    .is_some_and(|voice| voice.matches(&current.segment, now.epoch));
                if sounding {
                    self.refresh_gain(&plan.loop_id, plan.gain);
                } else if self.start_segment(
                    &plan.loop_id,
                    &plan.clip,
                    &current.segment,
                    current.offset,
                    current.remaining,
                    plan.gain,
                    now,
                ) {
                    started += 1;
                }
            }

            if let Some(next) = &plan.window.next {
                self.timers
                    .arm(TimerKey::start(&plan.loop_id, next.repeat_index), next.start);
            }
        }

        log::debug!(
            "Reconciled at {:.3}s (epoch {}): {} start timers cancelled, {} stopped, {} started, {} armed",
            now.position,
            now.epoch,
            cancelled,
            stale.len(),
            started,
            self.timers.count_kind(TimerKind::Start)
        );
    }

    /// Fire due timers, then forget voices whose segment has run out
    pub fn on_tick(&mut self, now: TransportSnapshot) {
        if !now.is_playing() {
            return;
        }

        for (key, _deadline) in self.timers.drain_due(now.position) {
            match key.kind {
                TimerKind::ForcedStop => {
                    let current = self
                        .active
                        .get(&key.loop_id)
                        .is_some_and(|voice| voice.repeat_index == key.repeat_index);
                    if current {
                        log::debug!(
                            "Forced stop of {} repeat {}",
                            key.loop_id,
                            key.repeat_index
                        );
                        self.silence(&key.loop_id);
                    }
                }
                TimerKind::Start => self.fire_start(&key.loop_id, key.repeat_index, now),
            }
        }

        self.prune(now.position);
    }

    /// Stop every voice and cancel every timer, keeping the loop set
    pub fn silence_all(&mut self) {
        let ids: Vec<LoopId> = self.active.keys().cloned().collect();
        for id in &ids {
            self.silence(id);
        }
        self.timers.clear();
    }

    /// Dispose every player and timer
    pub fn shutdown(&mut self) {
        self.silence_all();
        for slot in self.slots.values_mut() {
            slot.dispose();
        }
        self.slots.clear();
        self.active.clear();
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn loops(&self) -> &[PlacedLoop] {
        &self.loops
    }

    pub fn tracks(&self) -> &TrackStates {
        &self.tracks
    }

    pub fn master(&self) -> MasterState {
        self.master
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn active_voice(&self, loop_id: &LoopId) -> Option<&ActiveVoice> {
        self.active.get(loop_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub fn has_player(&self, loop_id: &LoopId) -> bool {
        self.slots.get(loop_id).is_some_and(|s| s.player.is_some())
    }

    pub fn is_unplayable(&self, loop_id: &LoopId) -> bool {
        self.slots.get(loop_id).is_some_and(|s| s.failed.is_some())
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn plan(&self, position: f64) -> Vec<LoopPlan> {
        let soloing = any_solo(self.tracks.values());
        self.loops
            .iter()
            .map(|placed| LoopPlan {
                loop_id: placed.id.clone(),
                clip: placed.source_id.clone(),
                gain: self.gain_for(placed, soloing),
                window: locate(placed, position, self.config.min_remaining_secs),
            })
            .collect()
    }

    fn gain_for(&self, placed: &PlacedLoop, soloing: bool) -> f64 {
        let track = self
            .tracks
            .get(&placed.track_index)
            .copied()
            .unwrap_or_default();
        effective_gain(placed, &track, &self.master, soloing)
    }

    fn report_rejection(&self, error: &LoopError) {
        log::warn!("Rejected loop: {}", error);
        self.events.emit(EngineEvent::LoopRejected {
            loop_id: error.loop_id().clone(),
            error: error.clone(),
        });
    }

    /// Player for a loop, creating it on first use
    fn ensure_player(&mut self, loop_id: &LoopId, clip: &ClipRef) -> Option<&mut Box<dyn Player>> {
        let slot = self
            .slots
            .entry(loop_id.clone())
            .or_insert_with(|| LoopSlot::new(clip.clone()));

        if slot.failed.is_some() {
            return None;
        }

        if slot.player.is_none() {
            match self.factory.create_player(clip) {
                Ok(player) => {
                    if player.kind() == PlayerKind::Streaming {
                        self.events
                            .emit(EngineEvent::StreamingFallback { clip: clip.clone() });
                    }
                    slot.player = Some(player);
                }
                Err(error) => {
                    log::warn!("Loop {} has no player: {}", loop_id, error);
                    self.events.emit(EngineEvent::LoadFailed {
                        loop_id: Some(loop_id.clone()),
                        clip: clip.clone(),
                        error: error.clone(),
                    });
                    slot.failed = Some(error);
                    return None;
                }
            }
        }

        slot.player.as_mut()
    }

    /// Start `segment` at `offset` for `duration` seconds. Returns true if
    /// the player accepted the start.
    fn start_segment(
        &mut self,
        loop_id: &LoopId,
        clip: &ClipRef,
        segment: &Segment,
        offset: f64,
        duration: f64,
        gain: f64,
        now: TransportSnapshot,
    ) -> bool {
        if let Some(previous) = self.active.remove(loop_id) {
            self.timers
                .cancel(&TimerKey::forced_stop(loop_id, previous.repeat_index));
        }

        let result = {
            let Some(player) = self.ensure_player(loop_id, clip) else {
                return false;
            };
            player.set_gain(gain);
            player.start(offset, duration).map(|()| player.kind())
        };

        match result {
            Ok(kind) => {
                let ends_at = now.position + duration;
                if !kind.has_bounded_start() {
                    self.timers
                        .arm(TimerKey::forced_stop(loop_id, segment.repeat_index), ends_at);
                }
                log::debug!(
                    "Started {} repeat {} at offset {:.3}s for {:.3}s (gain {:.3})",
                    loop_id,
                    segment.repeat_index,
                    offset,
                    duration,
                    gain
                );
                self.active.insert(
                    loop_id.clone(),
                    ActiveVoice {
                        repeat_index: segment.repeat_index,
                        segment_start: segment.start,
                        segment_end: segment.end,
                        ends_at,
                        epoch: now.epoch,
                        kind,
                    },
                );
                true
            }
            Err(error) => {
                log::warn!("Start of {} rejected: {}", loop_id, error);
                self.events.emit(EngineEvent::StartRejected {
                    loop_id: Some(loop_id.clone()),
                    error,
                });
                false
            }
        }
    }

    fn fire_start(&mut self, loop_id: &LoopId, repeat_index: usize, now: TransportSnapshot) {
        let Some(placed) = self.loops.iter().find(|l| &l.id == loop_id).cloned() else {
            return;
        };
        let Some(segment) = segment_at(&placed, repeat_index) else {
            return;
        };

        let gain = self.gain_for(&placed, any_solo(self.tracks.values()));
        if gain <= 0.0 || self.is_unplayable(loop_id) {
            return;
        }

        if segment.end - now.position >= self.config.min_remaining_secs {
            self.start_segment(
                loop_id,
                &placed.source_id,
                &segment,
                0.0,
                segment.duration(),
                gain,
                now,
            );
        }

        // Repeats that ended between ticks are skipped, not queued
        let next = match segment_at(&placed, repeat_index + 1) {
            Some(next) if next.end <= now.position => locate(&placed, now.position, 0.0).next,
            next => next,
        };
        if let Some(next) = next {
            self.timers
                .arm(TimerKey::start(loop_id, next.repeat_index), next.start);
        }
    }

    fn refresh_gain(&mut self, loop_id: &LoopId, gain: f64) {
        if let Some(player) = self.slots.get_mut(loop_id).and_then(|s| s.player.as_mut()) {
            player.set_gain(gain);
        }
    }

    /// Stop the voice of one loop and clear its forced stop
    fn silence(&mut self, loop_id: &LoopId) {
        if let Some(voice) = self.active.remove(loop_id) {
            self.timers
                .cancel(&TimerKey::forced_stop(loop_id, voice.repeat_index));
            if let Some(player) = self.slots.get_mut(loop_id).and_then(|s| s.player.as_mut()) {
                player.stop();
            }
            log::debug!("Silenced {} repeat {}", loop_id, voice.repeat_index);
        }
    }

    fn prune(&mut self, position: f64) {
        let ended: Vec<(LoopId, bool)> = self
            .active
            .iter()
            .filter(|(_, voice)| voice.ends_at <= position)
            .map(|(id, voice)| (id.clone(), voice.kind.has_bounded_start()))
            .collect();

        for (id, bounded) in ended {
            if bounded {
                // Already ended inside the sink
                self.active.remove(&id);
            } else {
                self.silence(&id);
            }
        }
    }

    /// Forget a loop's voice, timers and player
    fn release(&mut self, loop_id: &LoopId) {
        self.silence(loop_id);
        self.timers.cancel_loop(loop_id);
        if let Some(mut slot) = self.slots.remove(loop_id) {
            slot.dispose();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
