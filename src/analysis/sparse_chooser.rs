// src/analysis/sparse_chooser.rs
//
// Sparse, path-aware probe selection.
//
// Two modes:
//   1. Blind bisection: visit window offsets in a fixed order that keeps the
//      sampled frames as evenly spread as a binary search would.
//   2. Path-aware (once enough frames are cached): build object paths from
//      the cached results, drop stationary ones, and aim the next probe at
//      the interpolated crossing frame of the best moving path.
//
// When enough frames are sampled and nothing moves convincingly, the
// chooser gives up by returning an index far outside the window.

use super::index_chooser::{CrossingEstimate, IndexChooser, ProbeWindow};
use super::path_tracker::{DetectionRef, ObjectPath, PathTable, WindowSnapshot};
use crate::geometry::iou;
use crate::pipeline::candidate::TriggerCandidate;
use crate::pipeline::result_cache::ResultCache;
use crate::types::{BoundingBox, ChooserConfig};
use std::collections::HashSet;
use tracing::{debug, info};

/// Minimum samples before a missing moving path may end the search
const GIVE_UP_MIN_SAMPLES: usize = 5;

/// IoU a fresh detection needs with a stationary one to count as the same
/// parked object
const STATIONARY_LINK_IOU: f32 = 0.5;

pub struct SparseChooser {
    jitter_threshold: f32,
    path_aware_min_samples: usize,
    give_up_ratio: usize,
    index_order: Vec<usize>,
    /// (frame, cache slot) of detections judged stationary. Kept while the
    /// frame is in the window, since its cached results never change.
    stationary: HashSet<(i64, usize)>,
    localized: Option<CrossingEstimate>,
}

impl SparseChooser {
    pub fn new(config: &ChooserConfig, depth: usize) -> Self {
        Self {
            jitter_threshold: config.jitter_threshold,
            path_aware_min_samples: config.path_aware_min_samples,
            give_up_ratio: config.give_up_ratio,
            index_order: bisection_order(depth),
            stationary: HashSet::new(),
            localized: None,
        }
    }

    pub fn index_order(&self) -> &[usize] {
        &self.index_order
    }

    /// First offset in bisection order whose frame is not cached yet
    fn next_in_order(&self, cache: &ResultCache, window: &ProbeWindow<'_>) -> i64 {
        self.index_order
            .iter()
            .filter_map(|&offset| window.frame_at(offset))
            .find(|&index| !cache.contains(index))
            .unwrap_or_else(|| window.give_up_index())
    }

    /// Uncached buffered frame nearest to `target`, the earlier one on ties
    fn nearest_uncached(&self, cache: &ResultCache, target: i64, window: &ProbeWindow<'_>) -> Option<i64> {
        window
            .frames()
            .iter()
            .copied()
            .filter(|&i| !cache.contains(i))
            .min_by_key(|&i| ((i - target).abs(), i > target))
    }

    fn choose(&mut self, cache: &ResultCache, candidates: &[TriggerCandidate], window: &ProbeWindow<'_>) -> i64 {
        self.localized = None;

        let sampled = window.frames().iter().filter(|&&i| cache.contains(i)).count();
        if candidates.is_empty() || sampled < self.path_aware_min_samples {
            return self.next_in_order(cache, window);
        }

        // ── Path-aware mode ─────────────────────────────────────
        let mut snapshot = WindowSnapshot::build(cache, window, &self.stationary);
        let table = PathTable::build(&snapshot);

        let mut moving: Vec<ObjectPath> = Vec::new();
        let mut still: Vec<DetectionRef> = Vec::new();
        for path in table.paths() {
            let jitter = path.jitter(&snapshot);
            if jitter < self.jitter_threshold {
                debug!(
                    "stationary path of {} samples (jitter {:.2})",
                    path.len(),
                    jitter
                );
                still.extend_from_slice(path.members());
            } else {
                moving.push(path.clone());
            }
        }
        for r in still {
            self.stationary.insert((snapshot.frame_index(r.offset), r.slot));
            snapshot.remove(r);
        }

        let longest_moving = moving.iter().map(|p| p.len()).max().unwrap_or(0);
        if sampled >= GIVE_UP_MIN_SAMPLES && longest_moving * self.give_up_ratio < sampled {
            info!(
                "no convincing motion after {} samples (longest moving path {}), giving up",
                sampled, longest_moving
            );
            return window.give_up_index();
        }

        let mut best: Option<CrossingEstimate> = None;
        for candidate in candidates {
            for path in &moving {
                let Some(loc) = path.localize(&snapshot, candidate.segment()) else {
                    continue;
                };
                if best.as_ref().map_or(true, |b| loc.rank > b.rank) {
                    best = Some(CrossingEstimate {
                        candidate: candidate.key,
                        rank: loc.rank,
                        before_frame: loc.before_frame,
                        after_frame: loc.after_frame,
                        after_slot: loc.after_slot,
                        frame_estimate: loc.frame_estimate,
                    });
                }
            }
        }

        let Some(estimate) = best else {
            return self.next_in_order(cache, window);
        };
        debug!(
            "crossing localized between frames {} and {} (rank {}, estimate {:.2})",
            estimate.before_frame,
            estimate.after_frame,
            estimate.rank.score(),
            estimate.frame_estimate
        );

        let target = estimate.frame_estimate.round() as i64;
        self.localized = Some(estimate);
        self.nearest_uncached(cache, target, window)
            .unwrap_or_else(|| window.give_up_index())
    }
}

impl IndexChooser for SparseChooser {
    fn first_index(
        &mut self,
        cache: &ResultCache,
        candidates: &[TriggerCandidate],
        window: &ProbeWindow<'_>,
    ) -> i64 {
        let oldest = window.oldest();
        self.stationary.retain(|(frame, _)| *frame >= oldest);
        self.choose(cache, candidates, window)
    }

    fn choose_next_index(
        &mut self,
        cache: &ResultCache,
        candidates: &[TriggerCandidate],
        _prev_index: i64,
        window: &ProbeWindow<'_>,
    ) -> i64 {
        self.choose(cache, candidates, window)
    }

    fn localized_crossing(&self) -> Option<&CrossingEstimate> {
        self.localized.as_ref()
    }

    /// True when the detection's best-IoU link among the other cached
    /// frames of the window is a stationary detection
    fn is_stationary(
        &self,
        cache: &ResultCache,
        window: &ProbeWindow<'_>,
        frame_index: i64,
        bbox: &BoundingBox,
    ) -> bool {
        if self.stationary.is_empty() {
            return false;
        }

        let mut best: Option<((i64, usize), f32)> = None;
        for &frame in window.frames().iter().filter(|&&f| f != frame_index) {
            let Some(results) = cache.get(frame) else {
                continue;
            };
            for (slot, result) in results.iter().enumerate() {
                let overlap = iou(bbox, &result.bbox);
                if best.map_or(true, |(_, o)| overlap > o) {
                    best = Some(((frame, slot), overlap));
                }
            }
        }

        matches!(best, Some((link, overlap))
            if overlap >= STATIONARY_LINK_IOU && self.stationary.contains(&link))
    }
}

// ============================================================================
// BISECTION ORDER
// ============================================================================

/// Visiting order over window offsets `0..depth`.
///
/// Entry 0 is `depth - 2` (the newest frame before the trigger frame). Entry
/// `i` targets the next node of a balanced binary subdivision; when that
/// node is already taken the nearest free offset wins, preferring the one
/// inside the larger free run, then the lower offset.
pub fn bisection_order(depth: usize) -> Vec<usize> {
    if depth == 0 {
        return Vec::new();
    }
    let mut taken = vec![false; depth];
    let mut order = Vec::with_capacity(depth);

    let first = depth.saturating_sub(2);
    taken[first] = true;
    order.push(first);

    for i in 1..depth {
        let mut den = 1usize;
        while den <= i {
            den *= 2;
        }
        let num = 1 + 2 * (i & (den / 2 - 1));
        let target = (num * depth / den).min(depth - 1);

        let slot = if taken[target] {
            nearest_free(&taken, target)
        } else {
            Some(target)
        };
        if let Some(slot) = slot {
            taken[slot] = true;
            order.push(slot);
        }
    }
    order
}

fn nearest_free(taken: &[bool], target: usize) -> Option<usize> {
    for distance in 1..taken.len() {
        let left = target.checked_sub(distance).filter(|&i| !taken[i]);
        let right = Some(target + distance).filter(|&i| i < taken.len() && !taken[i]);
        match (left, right) {
            (Some(l), Some(r)) => {
                return Some(if free_run(taken, r) > free_run(taken, l) { r } else { l });
            }
            (Some(l), None) => return Some(l),
            (None, Some(r)) => return Some(r),
            (None, None) => {}
        }
    }
    None
}

/// Length of the run of free offsets containing `at`
fn free_run(taken: &[bool], at: usize) -> usize {
    let before = taken[..at].iter().rev().take_while(|t| !**t).count();
    let after = taken[at..].iter().take_while(|t| !**t).count();
    before + after
}

// ============================================================================
// TESTS
// ============================================================================
