//! Scheduler Integration Tests
//!
//! Drives a LoopEngine with a recording fake player factory and a manual
//! clock, so no audio device is needed. Covers:
//! - Segment starts on play and seek (in-progress offset and remaining)
//! - Future segments fired by timers on tick
//! - Idempotent reconciliation
//! - Loop removal, pause and stop cleanup
//! - Mute, solo and master gain
//! - Start rejection before initialize, load failure, streaming forced stops
//! - Moving a sounding loop, and loops with very many repeats
//! - Output voice drops
//! - End of timeline

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use approx::assert_relative_eq;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use sc_core::{ClipRef, LoopError, LoopId, PlacedLoop, TrackState, TrackStates};
use sc_engine::{
    EngineConfig, EngineEvent, LoadError, LoopEngine, ManualClock, OutputError, OutputSink,
    PlaybackError, Player, PlayerFactory, PlayerKind, TimerKind, TransportEvent,
};

// ═══════════════════════════════════════════════════════════════════════════════
// FAKES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Start {
        clip: String,
        offset: f64,
        duration: f64,
        gain: f64,
    },
    Stop {
        clip: String,
    },
    Gain {
        clip: String,
        gain: f64,
    },
    Dispose {
        clip: String,
    },
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Call>>,
    created: Mutex<Vec<String>>,
    ready: AtomicBool,
    dropped_voices: AtomicU64,
    failing: Mutex<HashSet<String>>,
    streaming: Mutex<HashSet<String>>,
    durations: Mutex<HashMap<String, f64>>,
}

impl Recorder {
    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn clear(&self) {
        self.calls.lock().clear();
    }

    /// (offset, duration, gain) of every start of `clip`
    fn starts(&self, clip: &str) -> Vec<(f64, f64, f64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Start {
                    clip: c,
                    offset,
                    duration,
                    gain,
                } if c == clip => Some((offset, duration, gain)),
                _ => None,
            })
            .collect()
    }

    fn start_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Start { .. }))
            .count()
    }

    fn stops(&self, clip: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Stop { clip: s } if s == clip))
            .count()
    }

    fn disposed(&self, clip: &str) -> bool {
        self.calls()
            .iter()
            .any(|c| matches!(c, Call::Dispose { clip: s } if s == clip))
    }

    fn last_gain(&self, clip: &str) -> Option<f64> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Call::Gain { clip: c, gain } if c == clip => Some(gain),
            _ => None,
        })
    }

    fn created(&self, clip: &str) -> usize {
        self.created.lock().iter().filter(|c| *c == clip).count()
    }
}

struct FakePlayer {
    clip: String,
    kind: PlayerKind,
    duration: f64,
    gain: f64,
    playing: bool,
    recorder: Arc<Recorder>,
}

impl Player for FakePlayer {
    fn kind(&self) -> PlayerKind {
        self.kind
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn start(&mut self, offset: f64, duration: f64) -> Result<(), PlaybackError> {
        if !self.recorder.ready.load(Ordering::SeqCst) {
            return Err(PlaybackError::OutputNotReady);
        }
        self.playing = true;
        self.recorder.record(Call::Start {
            clip: self.clip.clone(),
            offset,
            duration,
            gain: self.gain,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if self.playing {
            self.playing = false;
            self.recorder.record(Call::Stop {
                clip: self.clip.clone(),
            });
        }
    }

    fn set_gain(&mut self, gain: f64) {
        self.gain = gain;
        self.recorder.record(Call::Gain {
            clip: self.clip.clone(),
            gain,
        });
    }

    fn dispose(&mut self) {
        self.stop();
        self.recorder.record(Call::Dispose {
            clip: self.clip.clone(),
        });
    }
}

struct FakeFactory {
    recorder: Arc<Recorder>,
}

impl PlayerFactory for FakeFactory {
    fn create_player(&self, clip: &ClipRef) -> Result<Box<dyn Player>, LoadError> {
        let name = clip.as_str().to_string();
        self.recorder.created.lock().push(name.clone());

        if self.recorder.failing.lock().contains(&name) {
            return Err(LoadError::Unplayable {
                clip: clip.clone(),
                decode: "corrupt".into(),
                streaming: "corrupt".into(),
            });
        }

        let kind = if self.recorder.streaming.lock().contains(&name) {
            PlayerKind::Streaming
        } else {
            PlayerKind::Decode
        };
        let duration = self
            .recorder
            .durations
            .lock()
            .get(&name)
            .copied()
            .unwrap_or(4.0);

        Ok(Box::new(FakePlayer {
            clip: name,
            kind,
            duration,
            gain: 1.0,
            playing: false,
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

struct TestOutput {
    recorder: Arc<Recorder>,
}

impl OutputSink for TestOutput {
    fn initialize(&self) -> Result<(), OutputError> {
        self.recorder.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.recorder.ready.load(Ordering::SeqCst)
    }

    fn sample_rate(&self) -> u32 {
        48000
    }

    fn shutdown(&self) {
        self.recorder.ready.store(false, Ordering::SeqCst);
    }

    fn dropped_voices(&self) -> u64 {
        self.recorder.dropped_voices.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

struct Harness {
    engine: LoopEngine,
    clock: Arc<ManualClock>,
    recorder: Arc<Recorder>,
    events: Receiver<EngineEvent>,
}

impl Harness {
    fn uninitialized() -> Self {
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::new());
        let engine = LoopEngine::new(
            EngineConfig::default(),
            Arc::new(TestOutput {
                recorder: Arc::clone(&recorder),
            }),
            Arc::new(FakeFactory {
                recorder: Arc::clone(&recorder),
            }),
            clock.clone(),
        );
        let events = engine.events();
        Self {
            engine,
            clock,
            recorder,
            events,
        }
    }

    fn new() -> Self {
        let mut harness = Self::uninitialized();
        harness.engine.initialize().unwrap();
        harness
    }

    fn advance(&mut self, seconds: f64) -> f64 {
        self.clock.advance(seconds);
        self.engine.tick()
    }

    fn drain_events(&self) -> Vec<EngineEvent> {
        self.events.try_iter().collect()
    }
}

fn full_volume_tracks() -> TrackStates {
    TrackStates::from([(0, TrackState::with_volume(1.0)), (1, TrackState::with_volume(1.0))])
}

/// `{d: 4, start: 0, end: 10}` at full loop volume
fn ten_second_loop(id: &str) -> PlacedLoop {
    PlacedLoop::new(id, format!("{}.wav", id).as_str(), 0, 0.0, 10.0, 4.0).with_volume(1.0)
}

fn id(s: &str) -> LoopId {
    LoopId::from(s)
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-PROGRESS STARTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_play_starts_first_segment_and_arms_next() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.play();

    let starts = h.recorder.starts("a.wav");
    assert_eq!(starts.len(), 1);
    assert_relative_eq!(starts[0].0, 0.0);
    assert_relative_eq!(starts[0].1, 4.0);

    let timers = h.engine.scheduler().timers();
    assert_eq!(timers.count_kind(TimerKind::Start), 1);
    assert_eq!(
        timers.deadline(&sc_engine::TimerKey::start(&id("a"), 1)),
        Some(4.0)
    );
}

#[test]
fn test_seek_to_nine_starts_third_segment_at_offset_one() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.play();
    h.recorder.clear();

    h.engine.seek(9.0);

    // Old voice stopped, third segment started at offset 1 for 1 second
    assert_eq!(h.recorder.stops("a.wav"), 1);
    let starts = h.recorder.starts("a.wav");
    assert_eq!(starts.len(), 1);
    assert_relative_eq!(starts[0].0, 1.0);
    assert_relative_eq!(starts[0].1, 1.0);

    let voice = h.engine.scheduler().active_voice(&id("a")).unwrap();
    assert_eq!(voice.repeat_index, 2);
    assert_eq!(
        h.engine.scheduler().timers().count_kind(TimerKind::Start),
        0
    );
}

#[test]
fn test_seek_while_stopped_starts_nothing() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.seek(5.0);

    assert_eq!(h.recorder.start_count(), 0);
    assert_relative_eq!(h.engine.current_time(), 5.0);

    h.engine.play();
    let starts = h.recorder.starts("a.wav");
    assert_eq!(starts.len(), 1);
    assert_relative_eq!(starts[0].0, 1.0);
    assert_relative_eq!(starts[0].1, 3.0);
}

#[test]
fn test_nearly_finished_segment_is_skipped() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 20.0, &full_volume_tracks());
    h.engine.seek(9.98);
    h.engine.play();

    assert_eq!(h.recorder.start_count(), 0);
    assert!(h.engine.scheduler().active_voice(&id("a")).is_none());
}

// ═══════════════════════════════════════════════════════════════════════════════
// TIMERS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_future_loop_starts_when_timer_fires() {
    let mut h = Harness::new();
    let placed = PlacedLoop::new("later", "later.wav", 0, 2.0, 6.0, 4.0).with_volume(1.0);
    h.engine.schedule_loops(vec![placed], 10.0, &full_volume_tracks());
    h.engine.play();
    assert_eq!(h.recorder.start_count(), 0);

    h.advance(1.9);
    assert_eq!(h.recorder.start_count(), 0);

    h.advance(0.2);
    let starts = h.recorder.starts("later.wav");
    assert_eq!(starts.len(), 1);
    assert_relative_eq!(starts[0].0, 0.0);
    assert_relative_eq!(starts[0].1, 4.0);
    assert!(h.engine.scheduler().timers().is_empty());
}

#[test]
fn test_repeats_chain_through_timers() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 12.0, &full_volume_tracks());
    h.engine.play();

    h.advance(4.0);
    h.advance(4.0);

    let starts = h.recorder.starts("a.wav");
    assert_eq!(starts.len(), 3);
    // Timer-fired repeats play from the top of the clip
    assert_relative_eq!(starts[1].0, 0.0);
    assert_relative_eq!(starts[1].1, 4.0);
    assert_relative_eq!(starts[2].0, 0.0);
    assert_relative_eq!(starts[2].1, 2.0);

    assert_eq!(
        h.engine.scheduler().active_voice(&id("a")).unwrap().repeat_index,
        2
    );
}

#[test]
fn test_tiny_clip_over_long_window_does_not_stall() {
    let mut h = Harness::new();
    let tiny = PlacedLoop::new("tiny", "tiny.wav", 0, 0.0, 3600.0, 1e-8).with_volume(1.0);
    h.engine.schedule_loops(
        vec![tiny, ten_second_loop("a")],
        3600.0,
        &full_volume_tracks(),
    );
    h.engine.play();
    h.engine.seek(1800.0);
    h.advance(0.5);

    // Every repeat is shorter than the minimum, so only the regular loop sounds
    assert!(h.recorder.starts("tiny.wav").is_empty());
    assert_eq!(h.recorder.starts("a.wav").len(), 1);

    let timers = h.engine.scheduler().timers();
    assert_eq!(timers.armed_for(&id("tiny")), 1);
}

#[test]
fn test_finished_voices_are_pruned() {
    let mut h = Harness::new();
    let placed = PlacedLoop::new("a", "a.wav", 0, 0.0, 3.0, 4.0).with_volume(1.0);
    h.engine.schedule_loops(vec![placed], 10.0, &full_volume_tracks());
    h.engine.play();
    assert_eq!(h.engine.scheduler().active_count(), 1);

    h.advance(3.5);
    assert_eq!(h.engine.scheduler().active_count(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// IDEMPOTENCE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_repeated_schedule_starts_nothing_new() {
    let mut h = Harness::new();
    let loops = vec![ten_second_loop("a"), ten_second_loop("b")];
    let tracks = full_volume_tracks();

    h.engine.schedule_loops(loops.clone(), 10.0, &tracks);
    h.engine.play();
    assert_eq!(h.recorder.start_count(), 2);

    h.engine.schedule_loops(loops.clone(), 10.0, &tracks);
    h.engine.schedule_loops(loops, 10.0, &tracks);
    h.engine.set_track_state(0, TrackState::with_volume(1.0));

    assert_eq!(h.recorder.start_count(), 2);
    assert_eq!(h.recorder.stops("a.wav"), 0);
    assert_eq!(
        h.engine.scheduler().timers().count_kind(TimerKind::Start),
        2
    );
}

#[test]
fn test_idempotent_after_timer_start() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.play();
    h.advance(4.01);
    assert_eq!(h.recorder.start_count(), 2);

    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    assert_eq!(h.recorder.start_count(), 2);
}

#[test]
fn test_moving_sounding_loop_restarts_it_once() {
    let mut h = Harness::new();
    let tracks = full_volume_tracks();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 12.0, &tracks);
    h.engine.play();
    h.advance(2.0);
    h.recorder.clear();

    let moved = PlacedLoop::new("a", "a.wav", 0, 1.0, 11.0, 4.0).with_volume(1.0);
    h.engine.upsert_loop(moved.clone()).unwrap();

    // Old voice is cancelled strictly before the moved one starts
    let transport: Vec<Call> = h
        .recorder
        .calls()
        .into_iter()
        .filter(|c| !matches!(c, Call::Gain { .. }))
        .collect();
    assert_eq!(transport.len(), 2);
    assert_eq!(
        transport[0],
        Call::Stop {
            clip: "a.wav".into()
        }
    );
    match &transport[1] {
        Call::Start {
            offset, duration, ..
        } => {
            assert_relative_eq!(*offset, 1.0);
            assert_relative_eq!(*duration, 3.0);
        }
        other => panic!("expected a start, got {:?}", other),
    }

    assert_eq!(
        h.engine
            .scheduler()
            .timers()
            .deadline(&sc_engine::TimerKey::start(&id("a"), 1)),
        Some(5.0)
    );

    h.engine.schedule_loops(vec![moved], 12.0, &tracks);
    assert_eq!(h.recorder.start_count(), 1);
    assert_eq!(h.recorder.stops("a.wav"), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// REMOVAL / PAUSE / STOP
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_removing_loop_stops_it_and_clears_timers() {
    let mut h = Harness::new();
    h.engine.schedule_loops(
        vec![ten_second_loop("a"), ten_second_loop("b")],
        10.0,
        &full_volume_tracks(),
    );
    h.engine.play();

    h.engine
        .schedule_loops(vec![ten_second_loop("b")], 10.0, &full_volume_tracks());

    assert_eq!(h.recorder.stops("a.wav"), 1);
    assert!(h.recorder.disposed("a.wav"));
    assert!(h.engine.scheduler().active_voice(&id("a")).is_none());
    assert_eq!(h.engine.scheduler().timers().armed_for(&id("a")), 0);

    // The other loop is untouched
    assert_eq!(h.recorder.stops("b.wav"), 0);
    assert_eq!(h.engine.scheduler().timers().armed_for(&id("b")), 1);
}

#[test]
fn test_remove_loop_helper() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.play();

    assert!(h.engine.remove_loop(&id("a")));
    assert!(!h.engine.remove_loop(&id("a")));
    assert!(h.recorder.disposed("a.wav"));
    assert!(h.engine.scheduler().timers().is_empty());
}

#[test]
fn test_pause_silences_and_resume_continues() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.play();
    h.advance(1.0);

    h.engine.pause();
    assert_eq!(h.recorder.stops("a.wav"), 1);
    assert!(h.engine.scheduler().timers().is_empty());
    assert_eq!(h.engine.scheduler().active_count(), 0);
    assert_relative_eq!(h.engine.current_time(), 1.0);

    h.clock.advance(30.0);
    h.engine.play();
    let starts = h.recorder.starts("a.wav");
    assert_eq!(starts.len(), 2);
    assert_relative_eq!(starts[1].0, 1.0);
    assert_relative_eq!(starts[1].1, 3.0);
}

#[test]
fn test_stop_rewinds_and_clears() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.play();
    h.advance(2.0);

    h.engine.stop();
    assert!(!h.engine.is_playing());
    assert_eq!(h.engine.current_time(), 0.0);
    assert!(h.engine.scheduler().timers().is_empty());
    assert_eq!(h.recorder.stops("a.wav"), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// GAIN / MUTE / SOLO
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_master_volume_refreshes_gain_without_restart() {
    let mut h = Harness::new();
    let placed = PlacedLoop::new("a", "a.wav", 0, 0.0, 10.0, 4.0).with_volume(0.8);
    let tracks = TrackStates::from([(0, TrackState::with_volume(0.7))]);
    h.engine.schedule_loops(vec![placed], 10.0, &tracks);
    h.engine.play();

    h.engine.set_master_volume(0.5);

    assert_eq!(h.recorder.start_count(), 1);
    assert_relative_eq!(h.recorder.last_gain("a.wav").unwrap(), 0.28, epsilon = 1e-12);
}

#[test]
fn test_master_volume_is_clamped() {
    let mut h = Harness::new();
    h.engine.set_master_volume(3.0);
    assert_eq!(h.engine.master().volume, 1.0);
    h.engine.set_master_volume(-1.0);
    assert_eq!(h.engine.master().volume, 0.0);
}

#[test]
fn test_toggle_mute_silences_and_restores() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.play();

    assert!(h.engine.toggle_mute());
    assert_eq!(h.recorder.stops("a.wav"), 1);
    assert!(h.engine.scheduler().timers().is_empty());

    h.advance(1.0);
    assert!(!h.engine.toggle_mute());
    let starts = h.recorder.starts("a.wav");
    assert_eq!(starts.len(), 2);
    assert_relative_eq!(starts[1].0, 1.0);
}

#[test]
fn test_solo_silences_other_tracks() {
    let mut h = Harness::new();
    let a = ten_second_loop("a");
    let mut b = ten_second_loop("b");
    b.track_index = 1;

    let tracks = TrackStates::from([
        (0, TrackState::with_volume(1.0).soloed(true)),
        (1, TrackState::with_volume(1.0)),
    ]);
    h.engine.schedule_loops(vec![a, b], 10.0, &tracks);
    h.engine.play();

    assert_eq!(h.recorder.starts("a.wav").len(), 1);
    assert!(h.recorder.starts("b.wav").is_empty());

    // Un-solo: b joins, a keeps its voice
    h.engine
        .set_track_state(0, TrackState::with_volume(1.0).soloed(false));
    assert_eq!(h.recorder.starts("a.wav").len(), 1);
    assert_eq!(h.recorder.starts("b.wav").len(), 1);
}

#[test]
fn test_muted_loop_is_never_started() {
    let mut h = Harness::new();
    let placed = ten_second_loop("a").with_muted(true);
    h.engine.schedule_loops(vec![placed], 10.0, &full_volume_tracks());
    h.engine.play();
    h.advance(5.0);

    assert_eq!(h.recorder.start_count(), 0);
    assert!(h.engine.scheduler().timers().is_empty());
}

#[test]
fn test_missing_track_uses_default_volume() {
    let mut h = Harness::new();
    let placed = ten_second_loop("a").with_volume(0.5);
    h.engine.schedule_loops(vec![placed], 10.0, &TrackStates::new());
    h.engine.play();

    let starts = h.recorder.starts("a.wav");
    assert_relative_eq!(starts[0].2, 0.35, epsilon = 1e-12);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_start_rejected_before_initialize_then_retried() {
    let mut h = Harness::uninitialized();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.play();

    assert_eq!(h.recorder.start_count(), 0);
    assert!(h.engine.scheduler().active_voice(&id("a")).is_none());
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        EngineEvent::StartRejected {
            error: PlaybackError::OutputNotReady,
            ..
        }
    )));

    h.clock.advance(0.5);
    h.engine.initialize().unwrap();

    let starts = h.recorder.starts("a.wav");
    assert_eq!(starts.len(), 1);
    assert_relative_eq!(starts[0].0, 0.5);
}

#[test]
fn test_invalid_loops_are_rejected_and_reported() {
    let mut h = Harness::new();
    let backwards = PlacedLoop::new("bad", "bad.wav", 0, 5.0, 2.0, 4.0);
    let duplicate = ten_second_loop("a");

    let rejected = h.engine.schedule_loops(
        vec![ten_second_loop("a"), backwards, duplicate],
        10.0,
        &full_volume_tracks(),
    );
    h.engine.play();

    assert_eq!(rejected.len(), 2);
    assert!(matches!(rejected[0], LoopError::EmptyWindow { .. }));
    assert_eq!(rejected[1], LoopError::DuplicateId(id("a")));

    let reported = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::LoopRejected { .. }))
        .count();
    assert_eq!(reported, 2);

    assert_eq!(h.recorder.starts("a.wav").len(), 1);
    assert_eq!(h.recorder.created("bad.wav"), 0);
}

#[test]
fn test_upsert_rejects_invalid_loop() {
    let mut h = Harness::new();
    let placed = PlacedLoop::new("a", "a.wav", 0, 0.0, f64::NAN, 4.0);
    assert!(h.engine.upsert_loop(placed).is_err());
    assert!(h.engine.scheduler().loops().is_empty());
}

#[test]
fn test_upsert_with_new_clip_replaces_player() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.play();

    let mut edited = ten_second_loop("a");
    edited.source_id = ClipRef::from("other.wav");
    h.engine.upsert_loop(edited).unwrap();

    assert!(h.recorder.disposed("a.wav"));
    assert_eq!(h.recorder.starts("other.wav").len(), 1);
}

#[test]
fn test_load_failure_is_reported_once() {
    let mut h = Harness::new();
    h.recorder.failing.lock().insert("broken.wav".into());
    let broken = PlacedLoop::new("x", "broken.wav", 0, 0.0, 10.0, 4.0).with_volume(1.0);

    h.engine.schedule_loops(
        vec![broken.clone(), ten_second_loop("a")],
        10.0,
        &full_volume_tracks(),
    );
    h.engine.play();
    h.engine
        .schedule_loops(vec![broken, ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.advance(4.0);

    assert_eq!(h.recorder.created("broken.wav"), 1);
    assert!(h.engine.scheduler().is_unplayable(&id("x")));
    // The healthy loop is unaffected
    assert_eq!(h.recorder.starts("a.wav").len(), 2);

    let failures = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::LoadFailed { .. }))
        .count();
    assert_eq!(failures, 1);
}

#[test]
fn test_dropped_output_voices_are_reported_once() {
    let mut h = Harness::new();
    h.drain_events();

    h.recorder.dropped_voices.store(3, Ordering::SeqCst);
    h.advance(0.1);
    h.advance(0.1);
    h.recorder.dropped_voices.store(5, Ordering::SeqCst);
    h.advance(0.1);

    let drops: Vec<u64> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::VoicesDropped { count } => Some(count),
            _ => None,
        })
        .collect();
    assert_eq!(drops, vec![3, 2]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// STREAMING FORCED STOP
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_streaming_voice_gets_forced_stop() {
    let mut h = Harness::new();
    h.recorder.streaming.lock().insert("long.wav".into());
    let placed = PlacedLoop::new("s", "long.wav", 0, 0.0, 3.0, 4.0).with_volume(1.0);
    h.engine.schedule_loops(vec![placed], 10.0, &full_volume_tracks());
    h.engine.play();

    assert_eq!(
        h.engine.scheduler().timers().count_kind(TimerKind::ForcedStop),
        1
    );
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::StreamingFallback { .. })));

    h.advance(2.9);
    assert_eq!(h.recorder.stops("long.wav"), 0);

    h.advance(0.2);
    assert_eq!(h.recorder.stops("long.wav"), 1);
    assert!(h.engine.scheduler().timers().is_empty());
}

#[test]
fn test_restart_clears_previous_forced_stop() {
    let mut h = Harness::new();
    h.recorder.streaming.lock().insert("long.wav".into());
    let placed = PlacedLoop::new("s", "long.wav", 0, 0.0, 8.0, 4.0).with_volume(1.0);
    h.engine.schedule_loops(vec![placed], 10.0, &full_volume_tracks());
    h.engine.play();

    h.engine.seek(5.0);
    let timers = h.engine.scheduler().timers();
    assert_eq!(timers.count_kind(TimerKind::ForcedStop), 1);
    assert_eq!(
        timers.deadline(&sc_engine::TimerKey::forced_stop(&id("s"), 1)),
        Some(8.0)
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// TIMELINE END / PREVIEW
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_reaching_total_duration_ends_playback() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 5.0, &full_volume_tracks());
    h.engine.play();

    h.advance(5.0);

    assert!(!h.engine.is_playing());
    assert_eq!(h.engine.current_time(), 0.0);
    assert!(h.engine.scheduler().timers().is_empty());
    assert!(h
        .drain_events()
        .contains(&EngineEvent::Transport(TransportEvent::Ended)));
}

#[test]
fn test_transport_events_are_emitted() {
    let mut h = Harness::new();
    h.engine.play();
    h.engine.seek(2.0);
    h.engine.pause();
    h.engine.stop();

    let transport: Vec<TransportEvent> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Transport(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(
        transport,
        vec![
            TransportEvent::Started { position: 0.0 },
            TransportEvent::Seeked { position: 2.0 },
            TransportEvent::Paused { position: 2.0 },
            TransportEvent::Stopped,
        ]
    );
}

#[test]
fn test_preview_plays_at_master_gain_and_replaces_previous() {
    let mut h = Harness::new();
    h.engine.set_master_volume(0.5);

    h.engine.preview_loop(&ClipRef::from("one.wav")).unwrap();
    let starts = h.recorder.starts("one.wav");
    assert_eq!(starts.len(), 1);
    assert_relative_eq!(starts[0].0, 0.0);
    assert_relative_eq!(starts[0].1, 4.0);
    assert_relative_eq!(starts[0].2, 0.5);

    h.engine.preview_loop(&ClipRef::from("two.wav")).unwrap();
    assert!(h.recorder.disposed("one.wav"));
    assert!(h.engine.is_previewing());

    h.engine.stop_preview();
    assert!(!h.engine.is_previewing());
}

#[test]
fn test_streaming_preview_is_force_stopped() {
    let mut h = Harness::new();
    h.recorder.streaming.lock().insert("stream.wav".into());
    h.recorder.durations.lock().insert("stream.wav".into(), 2.0);

    h.engine.preview_loop(&ClipRef::from("stream.wav")).unwrap();
    h.advance(1.0);
    assert!(h.engine.is_previewing());

    h.advance(1.5);
    assert!(!h.engine.is_previewing());
    assert_eq!(h.recorder.stops("stream.wav"), 1);
}

#[test]
fn test_preview_failure_is_reported() {
    let mut h = Harness::new();
    h.recorder.failing.lock().insert("broken.wav".into());

    assert!(h.engine.preview_loop(&ClipRef::from("broken.wav")).is_err());
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        EngineEvent::LoadFailed { loop_id: None, .. }
    )));
}

#[test]
fn test_shutdown_disposes_players() {
    let mut h = Harness::new();
    h.engine
        .schedule_loops(vec![ten_second_loop("a")], 10.0, &full_volume_tracks());
    h.engine.play();

    h.engine.shutdown();
    assert!(h.recorder.disposed("a.wav"));
    assert!(h.engine.scheduler().timers().is_empty());
    assert_eq!(h.engine.scheduler().active_count(), 0);
}
