// src/analysis/stride_chooser.rs
//
// Fixed-stride backward walk over the buffered frames. Correct, cheap to
// reason about, and wasteful on long windows: it probes roughly one frame
// per step until something is found or the window runs out.

use super::index_chooser::{IndexChooser, ProbeWindow};
use crate::pipeline::candidate::TriggerCandidate;
use crate::pipeline::result_cache::ResultCache;

pub struct StrideChooser {
    stride: usize,
}

impl StrideChooser {
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
        }
    }
}

impl IndexChooser for StrideChooser {
    fn first_index(
        &mut self,
        cache: &ResultCache,
        candidates: &[TriggerCandidate],
        window: &ProbeWindow<'_>,
    ) -> i64 {
        let Some(newest) = window.len().checked_sub(1) else {
            return window.past_oldest();
        };
        for step in 0..self.stride {
            let Some(index) = newest.checked_sub(step).and_then(|o| window.frame_at(o)) else {
                break;
            };
            if !cache.contains(index) {
                return index;
            }
        }
        self.choose_next_index(cache, candidates, window.latest(), window)
    }

    fn choose_next_index(
        &mut self,
        cache: &ResultCache,
        _candidates: &[TriggerCandidate],
        prev_index: i64,
        window: &ProbeWindow<'_>,
    ) -> i64 {
        let Some(prev) = window.offset_of(prev_index) else {
            return window.past_oldest();
        };
        for step in 1..self.stride {
            let Some(index) = prev.checked_sub(step).and_then(|o| window.frame_at(o)) else {
                break;
            };
            if !cache.contains(index) {
                return index;
            }
        }

        // Everything within a stride is analyzed: keep hopping until an
        // uncached frame turns up or we fall off the window.
        let mut offset = prev;
        while offset >= self.stride {
            offset -= self.stride;
            if let Some(index) = window.frame_at(offset) {
                if !cache.contains(index) {
                    return index;
                }
            }
        }
        window.past_oldest()
    }
}
