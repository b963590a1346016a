//! Timer arena for scheduled starts and forced stops
//!
//! Deadlines are transport positions (logical seconds). Each entry is keyed
//! by loop id, repeat index and kind, so re-arming the same key replaces the
//! old deadline instead of stacking a second callback.

use std::collections::HashMap;

use sc_core::LoopId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Cut off a player that has no native bounded duration
    ForcedStop,
    /// Begin a future segment
    Start,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub loop_id: LoopId,
    pub repeat_index: usize,
    pub kind: TimerKind,
}

impl TimerKey {
    pub fn start(loop_id: &LoopId, repeat_index: usize) -> Self {
        Self {
            loop_id: loop_id.clone(),
            repeat_index,
            kind: TimerKind::Start,
        }
    }

    pub fn forced_stop(loop_id: &LoopId, repeat_index: usize) -> Self {
        Self {
            loop_id: loop_id.clone(),
            repeat_index,
            kind: TimerKind::ForcedStop,
        }
    }
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: HashMap<TimerKey, f64>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, key: TimerKey, deadline: f64) {
        self.entries.insert(key, deadline);
    }

    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Cancel every timer of one kind, returning how many were armed
    pub fn cancel_kind(&mut self, kind: TimerKind) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.kind != kind);
        before - self.entries.len()
    }

    pub fn cancel_loop(&mut self, loop_id: &LoopId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| &key.loop_id != loop_id);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove and return every timer due at `now`, earliest first.
    /// On equal deadlines forced stops come before starts.
    pub fn drain_due(&mut self, now: f64) -> Vec<(TimerKey, f64)> {
        let due_keys: Vec<TimerKey> = self
            .entries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut due: Vec<(TimerKey, f64)> = due_keys
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|deadline| (key, deadline)))
            .collect();

        due.sort_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then(a.0.kind.cmp(&b.0.kind))
                .then_with(|| a.0.loop_id.cmp(&b.0.loop_id))
                .then(a.0.repeat_index.cmp(&b.0.repeat_index))
        });
        due
    }

    pub fn deadline(&self, key: &TimerKey) -> Option<f64> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_kind(&self, kind: TimerKind) -> usize {
        self.entries.keys().filter(|k| k.kind == kind).count()
    }

    /// Number of timers referencing `loop_id`
    pub fn armed_for(&self, loop_id: &LoopId) -> usize {
        self.entries.keys().filter(|k| &k.loop_id == loop_id).count()
    }
}
