//! Segment tiling
//!
//! A placed loop whose window is longer than its clip plays the clip again
//! and again from the beginning until the window is full. Each repeat is a
//! [`Segment`]. The last one is cut short when the window is not an exact
//! multiple of the clip length; clips are truncated, never stretched.

use crate::{LoopId, PlacedLoop};

/// Slack (relative to the clip length) for the final partial repeat, so float
/// noise such as `1.1 - 11.0 * 0.1` does not produce an empty extra repeat.
const REPEAT_TOLERANCE: f64 = 1e-9;

/// One repeat of a placed loop's clip
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub loop_id: LoopId,
    pub repeat_index: usize,
    /// Timeline start (seconds)
    pub start: f64,
    /// Timeline end (seconds)
    pub end: f64,
    /// Seconds into the clip where this repeat begins
    pub source_offset: f64,
}

impl Segment {
    #[inline]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    #[inline]
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end
    }
}

/// Number of repeats needed to cover `window` seconds with a clip of
/// `source_duration` seconds
pub fn repeat_count(window: f64, source_duration: f64) -> usize {
    if !(window > 0.0 && source_duration > 0.0) {
        return 0;
    }
    let whole = (window / source_duration).floor();
    let remainder = window - whole * source_duration;
    // Float error in the remainder scales with the window, not the clip
    let slack = (source_duration * REPEAT_TOLERANCE).max(window * 4.0 * f64::EPSILON);
    let count = if remainder > slack {
        whole + 1.0
    } else {
        whole
    };
    (count as usize).max(1)
}

/// Split a placed loop into its ordered repeat segments
///
/// Allocates one entry per repeat. Lookups at a playhead position should use
/// [`locate`] or [`segment_at`], which do not depend on the repeat count.
pub fn tile(placed: &PlacedLoop) -> Vec<Segment> {
    let count = repeat_count(placed.window(), placed.source_duration);
    (0..count).map(|i| build_segment(placed, i)).collect()
}

/// Repeat `repeat_index` of `placed`, or `None` past the last repeat
pub fn segment_at(placed: &PlacedLoop, repeat_index: usize) -> Option<Segment> {
    if repeat_index >= repeat_count(placed.window(), placed.source_duration) {
        return None;
    }
    Some(build_segment(placed, repeat_index))
}

#[inline]
fn build_segment(placed: &PlacedLoop, repeat_index: usize) -> Segment {
    let d = placed.source_duration;
    let start = placed.start_time + repeat_index as f64 * d;
    let end = (placed.start_time + (repeat_index + 1) as f64 * d).min(placed.end_time);
    Segment {
        loop_id: placed.id.clone(),
        repeat_index,
        start,
        end,
        source_offset: 0.0,
    }
}

/// A segment the playhead is currently inside
#[derive(Debug, Clone, PartialEq)]
pub struct InProgress {
    pub segment: Segment,
    /// Seconds into the clip matching the playhead
    pub offset: f64,
    /// Seconds until the segment ends
    pub remaining: f64,
}

/// The segments of one loop that matter at a given playhead position
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentWindow {
    /// Segment to start immediately
    pub current: Option<InProgress>,
    /// First segment starting after the playhead
    pub next: Option<Segment>,
}

impl SegmentWindow {
    /// Nothing left to play for this loop
    #[inline]
    pub fn is_past(&self) -> bool {
        self.current.is_none() && self.next.is_none()
    }
}

/// Find the in-progress and next segments of `placed` at `position`
///
/// An in-progress segment with less than `min_remaining` seconds left is
/// treated as already elapsed.
pub fn locate(placed: &PlacedLoop, position: f64, min_remaining: f64) -> SegmentWindow {
    let mut window = SegmentWindow::default();

    let count = repeat_count(placed.window(), placed.source_duration);
    if count == 0 || position >= placed.end_time {
        return window;
    }
    if position < placed.start_time {
        window.next = segment_at(placed, 0);
        return window;
    }

    // Index arithmetic can land one repeat off at a boundary
    let mut index =
        (((position - placed.start_time) / placed.source_duration).floor() as usize).min(count - 1);
    let mut segment = build_segment(placed, index);
    if segment.start > position && index > 0 {
        index -= 1;
        segment = build_segment(placed, index);
    } else if segment.end <= position {
        if index + 1 >= count {
            return window;
        }
        index += 1;
        segment = build_segment(placed, index);
    }

    if segment.contains(position) {
        let remaining = segment.end - position;
        if remaining >= min_remaining {
            let offset = (position - segment.start).rem_euclid(placed.source_duration);
            window.current = Some(InProgress {
                segment,
                offset,
                remaining,
            });
        }
    }
    window.next = segment_at(placed, index + 1);

    window
}
