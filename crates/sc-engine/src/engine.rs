//! Loop engine facade
//!
//! Single entry point for the host. Every operation that can change what
//! should be sounding (transport moves, loop edits, mix changes) ends in a
//! reconciliation, so callers never have to remember to trigger one.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use sc_core::{ClipRef, LoopError, LoopId, MasterState, PlacedLoop, TrackState, TrackStates};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, LoadError};
use crate::events::{EngineEvent, EventEmitter, event_channel};
use crate::output::{AudioOutput, OutputSink};
use crate::player::{ClipResolver, Player, PlayerFactory, PlayerKind, SinkPlayerFactory};
use crate::preview::PreviewSlot;
use crate::scheduler::Scheduler;
use crate::transport::{Clock, SystemClock, Transport, TransportEvent, TransportState};

pub struct LoopEngine {
    config: EngineConfig,
    output: Arc<dyn OutputSink>,
    factory: Arc<dyn PlayerFactory>,
    clock: Arc<dyn Clock>,
    transport: Transport,
    scheduler: Scheduler,
    preview: PreviewSlot,
    master: MasterState,
    events: EventEmitter,
    event_rx: Receiver<EngineEvent>,
    /// Output voice drops already reported
    dropped_voices_seen: u64,
}

impl LoopEngine {
    pub fn new(
        config: EngineConfig,
        output: Arc<dyn OutputSink>,
        factory: Arc<dyn PlayerFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, event_rx) = event_channel();
        let master = MasterState {
            volume: config.defaults.master_volume.clamp(0.0, 1.0),
            muted: false,
        };
        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&factory),
            master,
            events.clone(),
        );

        Self {
            config,
            output,
            factory,
            clock,
            transport: Transport::new(),
            scheduler,
            preview: PreviewSlot::new(),
            master,
            events,
            event_rx,
            dropped_voices_seen: 0,
        }
    }

    /// Engine playing through the default audio device
    pub fn with_audio_output(config: EngineConfig, resolver: Arc<dyn ClipResolver>) -> Self {
        let output = Arc::new(AudioOutput::new(config.output.clone()));
        let factory = Arc::new(SinkPlayerFactory::new(
            Arc::clone(&output),
            resolver,
            config.loading.clone(),
        ));
        Self::new(config, output, factory, Arc::new(SystemClock::new()))
    }

    /// Open the output. Starts are rejected until this succeeds; loops
    /// that were rejected before are started now.
    pub fn initialize(&mut self) -> EngineResult<()> {
        self.output.initialize()?;
        log::info!(
            "Loop engine initialized ({} Hz)",
            self.output.sample_rate()
        );
        self.reconcile();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.output.is_ready()
    }

    /// Create a standalone player. Scheduled loops get theirs implicitly.
    pub fn create_loop_player(&self, clip: &ClipRef) -> Result<Box<dyn Player>, LoadError> {
        let result = self.factory.create_player(clip);
        match &result {
            Ok(player) if player.kind() == PlayerKind::Streaming => {
                self.events
                    .emit(EngineEvent::StreamingFallback { clip: clip.clone() });
            }
            Ok(_) => {}
            Err(error) => self.events.emit(EngineEvent::LoadFailed {
                loop_id: None,
                clip: clip.clone(),
                error: error.clone(),
            }),
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LOOP SET
    // ═══════════════════════════════════════════════════════════════════════

    /// Replace the whole loop set and mix. Returns the loops that were
    /// excluded as malformed.
    pub fn schedule_loops(
        &mut self,
        loops: Vec<PlacedLoop>,
        total_duration: f64,
        tracks: &TrackStates,
    ) -> Vec<LoopError> {
        self.scheduler.set_tracks(tracks.clone());
        self.scheduler.set_total_duration(total_duration);
        let rejected = self.scheduler.set_loops(loops);
        self.reconcile();
        rejected
    }

    pub fn upsert_loop(&mut self, placed: PlacedLoop) -> Result<(), LoopError> {
        self.scheduler.upsert_loop(placed)?;
        self.reconcile();
        Ok(())
    }

    pub fn remove_loop(&mut self, loop_id: &LoopId) -> bool {
        let removed = self.scheduler.remove_loop(loop_id);
        self.reconcile();
        removed
    }

    pub fn set_track_state(&mut self, index: usize, state: TrackState) {
        self.scheduler.set_track(index, state);
        self.reconcile();
    }

    pub fn set_total_duration(&mut self, seconds: f64) {
        self.scheduler.set_total_duration(seconds);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRANSPORT
    // ═══════════════════════════════════════════════════════════════════════

    pub fn play(&mut self) {
        if let Some(event) = self.transport.play(&*self.clock) {
            self.emit_transport(event);
        }
        self.reconcile();
    }

    pub fn pause(&mut self) {
        if let Some(event) = self.transport.pause(&*self.clock) {
            self.emit_transport(event);
        }
        self.reconcile();
    }

    pub fn stop(&mut self) {
        let event = self.transport.stop();
        self.emit_transport(event);
        self.reconcile();
    }

    pub fn seek(&mut self, seconds: f64) {
        let event = self.transport.seek(seconds, &*self.clock);
        self.emit_transport(event);
        self.reconcile();
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn current_time(&self) -> f64 {
        self.transport.position(&*self.clock)
    }

    /// Advance scheduling to the current clock time. Returns the position.
    pub fn tick(&mut self) -> f64 {
        self.preview.poll(self.clock.now());
        self.poll_output();

        let snapshot = self.transport.snapshot(&*self.clock);
        if !snapshot.is_playing() {
            return snapshot.position;
        }

        let total = self.scheduler.total_duration();
        if total > 0.0 && snapshot.position >= total {
            log::info!("Reached end of timeline at {:.3}s", total);
            let event = self.transport.finish();
            self.emit_transport(event);
            self.reconcile();
            return self.current_time();
        }

        self.scheduler.on_tick(snapshot);
        snapshot.position
    }

    /// Report voices the output mixer had no room for
    fn poll_output(&mut self) {
        let dropped = self.output.dropped_voices();
        if dropped > self.dropped_voices_seen {
            let count = dropped - self.dropped_voices_seen;
            self.dropped_voices_seen = dropped;
            log::warn!("Output voice pool exhausted, {} voice(s) dropped", count);
            self.events.emit(EngineEvent::VoicesDropped { count });
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MASTER
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_master_volume(&mut self, gain: f64) {
        self.master.volume = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
        self.apply_master();
    }

    /// Flip master mute. Returns the new mute state.
    pub fn toggle_mute(&mut self) -> bool {
        self.master.muted = !self.master.muted;
        self.apply_master();
        self.master.muted
    }

    pub fn master(&self) -> MasterState {
        self.master
    }

    fn apply_master(&mut self) {
        self.scheduler.set_master(self.master);
        self.preview.set_gain(self.master.gain());
        self.reconcile();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PREVIEW
    // ═══════════════════════════════════════════════════════════════════════

    /// Play `clip` once at master gain, replacing any other preview
    pub fn preview_loop(&mut self, clip: &ClipRef) -> EngineResult<()> {
        let now = self.clock.now();
        let result = self
            .preview
            .start(self.factory.as_ref(), clip, self.master.gain(), now);

        match result {
            Ok(kind) => {
                if kind == PlayerKind::Streaming {
                    self.events
                        .emit(EngineEvent::StreamingFallback { clip: clip.clone() });
                }
                Ok(())
            }
            Err(error) => {
                match &error {
                    EngineError::Load(e) => self.events.emit(EngineEvent::LoadFailed {
                        loop_id: None,
                        clip: clip.clone(),
                        error: e.clone(),
                    }),
                    EngineError::Playback(e) => self.events.emit(EngineEvent::StartRejected {
                        loop_id: None,
                        error: e.clone(),
                    }),
                    _ => {}
                }
                log::warn!("Preview of {} failed: {}", clip, error);
                Err(error)
            }
        }
    }

    pub fn stop_preview(&mut self) {
        self.preview.stop();
    }

    pub fn is_previewing(&self) -> bool {
        self.preview.is_active()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    /// Transport transitions and soft failures
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.event_rx.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop everything and release every player, timer and the output
    pub fn shutdown(&mut self) {
        self.preview.stop();
        self.scheduler.shutdown();
        self.output.shutdown();
        log::info!("Loop engine shut down");
    }

    fn emit_transport(&self, event: TransportEvent) {
        log::debug!("Transport: {:?}", event);
        self.events.emit(EngineEvent::Transport(event));
    }

    fn reconcile(&mut self) {
        let snapshot = self.transport.snapshot(&*self.clock);
        self.scheduler.reconcile(snapshot);
    }
}

impl Drop for LoopEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
