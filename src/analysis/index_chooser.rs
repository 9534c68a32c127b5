// src/analysis/index_chooser.rs
//
// Probe selection: which buffered frame the expensive detector looks at
// next while a confirmation search is running.
//
// Every strategy honours the same rules:
//   - never return a frame index that is already a cache key
//   - always terminate; when nothing useful is left, return an index
//     outside the window (`ProbeWindow::past_oldest` or `give_up_index`),
//     which the pipeline reads as "stop searching"

use super::path_tracker::CrossingRank;
use super::sparse_chooser::SparseChooser;
use super::stride_chooser::StrideChooser;
use crate::pipeline::candidate::{CandidateKey, TriggerCandidate};
use crate::pipeline::result_cache::ResultCache;
use crate::types::{BoundingBox, ChooserConfig, ChooserStrategy};

pub trait IndexChooser {
    /// First probe of a fresh search
    fn first_index(
        &mut self,
        cache: &ResultCache,
        candidates: &[TriggerCandidate],
        window: &ProbeWindow<'_>,
    ) -> i64;

    /// Next probe after `prev_index` was analyzed
    fn choose_next_index(
        &mut self,
        cache: &ResultCache,
        candidates: &[TriggerCandidate],
        prev_index: i64,
        window: &ProbeWindow<'_>,
    ) -> i64;

    /// Crossing localized by the last choice, if the strategy does that
    fn localized_crossing(&self) -> Option<&CrossingEstimate> {
        None
    }

    /// Whether a detection in a freshly probed frame continues an object
    /// already judged stationary clutter
    fn is_stationary(
        &self,
        _cache: &ResultCache,
        _window: &ProbeWindow<'_>,
        _frame_index: i64,
        _bbox: &BoundingBox,
    ) -> bool {
        false
    }
}

/// Buffered frame indices of the look-back window, oldest first.
///
/// Offset `o` is the `o`-th buffered frame, so choosers never name a frame
/// that was skipped upstream.
#[derive(Debug, Clone, Copy)]
pub struct ProbeWindow<'a> {
    frames: &'a [i64],
}

impl<'a> ProbeWindow<'a> {
    pub fn new(frames: &'a [i64]) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &'a [i64] {
        self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn oldest(&self) -> i64 {
        self.frames.first().copied().unwrap_or_default()
    }

    pub fn latest(&self) -> i64 {
        self.frames.last().copied().unwrap_or_default()
    }

    pub fn frame_at(&self, offset: usize) -> Option<i64> {
        self.frames.get(offset).copied()
    }

    pub fn offset_of(&self, frame_index: i64) -> Option<usize> {
        self.frames.binary_search(&frame_index).ok()
    }

    /// Buffered frames from `frame_index` to the newest one, both included
    pub fn span_to_latest(&self, frame_index: i64) -> Option<usize> {
        self.offset_of(frame_index).map(|o| self.frames.len() - o)
    }

    /// Out-of-window index meaning "nothing left to try"; the pipeline
    /// reads it as an exhausted search
    pub fn past_oldest(&self) -> i64 {
        self.oldest() - 1
    }

    /// Out-of-window index meaning "give up": `latest - 2 * depth` for a
    /// window without gaps, and never equal to `past_oldest`
    pub fn give_up_index(&self) -> i64 {
        let depth = self.frames.len() as i64;
        (self.latest() - 2 * depth).min(self.oldest() - depth - 1)
    }
}

/// Where a moving object crossed a candidate's trigger line, bracketed by
/// two sampled frames.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossingEstimate {
    pub candidate: CandidateKey,
    pub rank: CrossingRank,
    pub before_frame: i64,
    pub after_frame: i64,
    /// Cache slot of the path's detection at `after_frame`
    pub after_slot: usize,
    /// Interpolated (fractional) crossing frame
    pub frame_estimate: f32,
}

/// Strategy fixed at construction time.
pub enum IndexStrategy {
    Stride(StrideChooser),
    Sparse(SparseChooser),
}

impl IndexStrategy {
    pub fn from_config(config: &ChooserConfig, depth: usize) -> Self {
        match config.strategy {
            ChooserStrategy::Stride => Self::Stride(StrideChooser::new(config.stride)),
            ChooserStrategy::Sparse => Self::Sparse(SparseChooser::new(config, depth)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stride(_) => "stride",
            Self::Sparse(_) => "sparse",
        }
    }

    fn inner(&self) -> &dyn IndexChooser {
        match self {
            Self::Stride(c) => c,
            Self::Sparse(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn IndexChooser {
        match self {
            Self::Stride(c) => c,
            Self::Sparse(c) => c,
        }
    }
}

impl IndexChooser for IndexStrategy {
    fn first_index(
        &mut self,
        cache: &ResultCache,
        candidates: &[TriggerCandidate],
        window: &ProbeWindow<'_>,
    ) -> i64 {
        self.inner_mut().first_index(cache, candidates, window)
    }

    fn choose_next_index(
        &mut self,
        cache: &ResultCache,
        candidates: &[TriggerCandidate],
        prev_index: i64,
        window: &ProbeWindow<'_>,
    ) -> i64 {
        self.inner_mut()
            .choose_next_index(cache, candidates, prev_index, window)
    }

    fn localized_crossing(&self) -> Option<&CrossingEstimate> {
        self.inner().localized_crossing()
    }

    fn is_stationary(
        &self,
        cache: &ResultCache,
        window: &ProbeWindow<'_>,
        frame_index: i64,
        bbox: &BoundingBox,
    ) -> bool {
        self.inner().is_stationary(cache, window, frame_index, bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_selected_from_config() {
        let mut cfg = ChooserConfig::default();
        assert_eq!(IndexStrategy::from_config(&cfg, 8).as_str(), "sparse");
        cfg.strategy = ChooserStrategy::Stride;
        assert_eq!(IndexStrategy::from_config(&cfg, 8).as_str(), "stride");
    }

    #[test]
    fn test_give_up_index_is_outside_window() {
        let frames: Vec<i64> = (93..=100).collect();
        let window = ProbeWindow::new(&frames);
        assert_eq!(window.give_up_index(), 100 - 16);
        assert!(window.give_up_index() < window.oldest());
        assert_ne!(window.give_up_index(), window.past_oldest());
    }

    #[test]
    fn test_window_offsets_follow_buffered_frames() {
        let frames = [10, 20, 30, 40];
        let window = ProbeWindow::new(&frames);
        assert_eq!(window.frame_at(2), Some(30));
        assert_eq!(window.offset_of(30), Some(2));
        assert_eq!(window.offset_of(35), None);
        assert_eq!(window.span_to_latest(30), Some(2));
        assert_eq!(window.span_to_latest(10), Some(4));
        assert_eq!(window.past_oldest(), 9);
        assert!(window.give_up_index() < window.past_oldest());
        assert!(!frames.contains(&window.give_up_index()));
    }
}
