// src/pipeline/candidate.rs
//
// Pending trigger candidates: items whose latest identification is a
// line-triggered one still flagged for further analysis. Recomputed from
// the item history on every scheduling step, never stored.

use crate::types::{FramedItem, ItemId, LineSegment, LineTrigger};
use std::collections::HashMap;

/// Stable identity of a candidate across scheduling steps.
///
/// `slot` is the item's ordinal among items of the same frame. Insertions
/// into the history only ever append within a frame, so it does not shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateKey {
    pub frame_index: i64,
    pub line_id: usize,
    pub slot: usize,
}

#[derive(Debug, Clone)]
pub struct TriggerCandidate {
    pub key: CandidateKey,
    /// Position of the owning item in the history this step
    pub item_index: usize,
    pub trigger_id: ItemId,
    pub trigger: LineTrigger,
}

impl TriggerCandidate {
    pub fn frame_index(&self) -> i64 {
        self.key.frame_index
    }

    pub fn segment(&self) -> &LineSegment {
        &self.trigger.segment
    }
}

/// Collect unresolved candidates whose frame is at or after `oldest_frame`.
/// Older ones can no longer be confirmed and are skipped.
pub fn find_candidates(items: &[FramedItem], oldest_frame: i64) -> Vec<TriggerCandidate> {
    let mut slots: HashMap<i64, usize> = HashMap::new();
    let mut candidates = Vec::new();

    for (item_index, item) in items.iter().enumerate() {
        let frame_index = item.frame_index();
        let slot = {
            let next = slots.entry(frame_index).or_insert(0);
            let slot = *next;
            *next += 1;
            slot
        };

        if frame_index < oldest_frame {
            continue;
        }
        let Some(latest) = item.latest() else {
            continue;
        };
        let Some(trigger) = latest.trigger.as_ref() else {
            continue;
        };
        if !trigger.further_analysis_triggered {
            continue;
        }

        candidates.push(TriggerCandidate {
            key: CandidateKey {
                frame_index,
                line_id: trigger.line_id,
                slot,
            },
            item_index,
            trigger_id: latest.clone(),
            trigger: trigger.clone(),
        });
    }

    candidates
}

/// Candidates that were pending last step but whose frame has now aged out
pub fn expired_keys<'a>(
    previous: impl Iterator<Item = &'a CandidateKey>,
    oldest_frame: i64,
) -> Vec<CandidateKey> {
    previous
        .filter(|k| k.frame_index < oldest_frame)
        .copied()
        .collect()
}
