// src/pipeline/confirmation.rs
//
// One scheduling step per incoming frame:
//
//   buffer frame ─→ prune evicted cache entry ─→ find pending candidates
//        ─→ probe loop (chooser → cache/analyzer → score against lines)
//        ─→ apply confirmations to the item history ─→ back-fill
//
// Step outcomes:
//   Idle       no pending trigger candidates
//   Filling    candidates exist but the look-back window is not full yet
//   Confirmed  every pending candidate was resolved this step
//   Exhausted  search range spent or the chooser ran out of frames
//   Abandoned  the chooser gave up (nothing moving near the line)
//
// Unresolved candidates are retried on later steps until their frame
// leaves the window, at which point they expire.

use crate::analysis::index_chooser::{IndexChooser, IndexStrategy, ProbeWindow};
use crate::analyzer::Analyzer;
use crate::frame_buffer::FrameBuffer;
use crate::geometry::{iou, overlap_ratio};
use crate::pipeline::candidate::{expired_keys, find_candidates, CandidateKey, TriggerCandidate};
use crate::pipeline::event_bus::{EventBus, PipelineEvent};
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::result_cache::{Lookup, ResultCache};
use crate::types::{Config, ConfirmationConfig, Frame, FramedItem, ItemId, LineTrigger};
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const EVENT_BUS_CAPACITY: usize = 1024;

/// Identification method recorded when the detector result has none
const DEFAULT_METHOD: &str = "analyzer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Idle,
    Filling,
    Confirmed,
    Exhausted,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub state: StepState,
    pub confirmations: usize,
    pub probes: usize,
    pub evicted: Option<i64>,
}

/// Triggered vs confirmed candidates of one line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineCount {
    pub triggered: u64,
    pub confirmed: u64,
}

#[derive(Debug, Clone)]
struct Confirmation {
    candidate: TriggerCandidate,
    frame_index: i64,
    slot: usize,
    detection: ItemId,
    crossing_frame: f32,
}

pub struct ConfirmationPipeline<A: Analyzer> {
    config: ConfirmationConfig,
    buffer: FrameBuffer,
    cache: ResultCache,
    chooser: IndexStrategy,
    analyzer: A,
    /// Distinct frames with a weak match, per candidate
    corroboration: HashMap<CandidateKey, BTreeSet<i64>>,
    /// Cached frames already merged into the item history
    backfilled: HashSet<i64>,
    line_counts: BTreeMap<usize, LineCount>,
    seen: HashSet<CandidateKey>,
    pending: BTreeSet<CandidateKey>,
    prev_pending_per_line: BTreeMap<usize, usize>,
    events: EventBus,
    metrics: PipelineMetrics,
}

impl<A: Analyzer> ConfirmationPipeline<A> {
    pub fn new(config: &Config, analyzer: A) -> Result<Self> {
        config.validate()?;
        let depth = config.buffer.depth;
        let chooser = IndexStrategy::from_config(&config.chooser, depth);
        info!(
            "confirmation pipeline: depth {}, search range {}, {} chooser",
            depth,
            config.confirmation.search_range,
            chooser.as_str()
        );

        Ok(Self {
            config: config.confirmation.clone(),
            buffer: FrameBuffer::new(depth),
            cache: ResultCache::new(),
            chooser,
            analyzer,
            corroboration: HashMap::new(),
            backfilled: HashSet::new(),
            line_counts: BTreeMap::new(),
            seen: HashSet::new(),
            pending: BTreeSet::new(),
            prev_pending_per_line: BTreeMap::new(),
            events: EventBus::new(EVENT_BUS_CAPACITY),
            metrics: PipelineMetrics::new(),
        })
    }

    // ========================================================================
    // SCHEDULING STEP
    // ========================================================================

    pub fn process_frame(
        &mut self,
        frame: Arc<Frame>,
        items: &mut Vec<FramedItem>,
    ) -> Result<StepOutcome> {
        let latest = frame.index;

        let evicted = self.buffer.push(frame)?.map(|f| f.index);
        self.metrics.inc(&self.metrics.frames_buffered);
        if let Some(index) = evicted {
            self.metrics.inc(&self.metrics.frames_evicted);
            if self.cache.prune(index) {
                self.metrics.inc(&self.metrics.cache_pruned);
                debug!("cache entry for frame {} pruned", index);
            }
            self.backfilled.remove(&index);
        }

        let oldest = self.buffer.oldest_index().unwrap_or(latest);
        self.expire_candidates(oldest);

        let candidates = find_candidates(items, oldest);
        self.update_bookkeeping(&candidates);

        let mut outcome = StepOutcome {
            state: StepState::Idle,
            confirmations: 0,
            probes: 0,
            evicted,
        };
        if candidates.is_empty() {
            return Ok(outcome);
        }
        if !self.buffer.is_full() {
            debug!(
                "{} candidate(s) waiting for a full window ({}/{})",
                candidates.len(),
                self.buffer.len(),
                self.buffer.depth()
            );
            outcome.state = StepState::Filling;
            return Ok(outcome);
        }

        let (state, confirmations, remaining, probes) = self.search(candidates, latest);

        outcome.state = state;
        outcome.probes = probes;
        outcome.confirmations = confirmations.len();
        self.apply_confirmations(confirmations, items);
        self.pending = remaining.iter().map(|c| c.key).collect();

        match state {
            StepState::Exhausted => {
                self.metrics.inc(&self.metrics.searches_exhausted);
                self.events.publish(PipelineEvent::SearchExhausted {
                    latest_frame: latest,
                    pending: remaining.len(),
                    probes,
                });
            }
            StepState::Abandoned => {
                self.metrics.inc(&self.metrics.searches_abandoned);
                self.events.publish(PipelineEvent::SearchAbandoned {
                    latest_frame: latest,
                    pending: remaining.len(),
                });
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Probe loop. Returns the final state, accepted confirmations, the
    /// candidates still pending and the number of probes made.
    ///
    /// The search range counts buffered frames from the probe to the newest
    /// one. A probe beyond it is never made, and a probe that reaches it
    /// ends the search.
    fn search(
        &mut self,
        candidates: Vec<TriggerCandidate>,
        latest: i64,
    ) -> (StepState, Vec<Confirmation>, Vec<TriggerCandidate>, usize) {
        let frames = self.buffer.frame_indices();
        let window = ProbeWindow::new(&frames);
        let search_range = self.config.search_range.min(self.buffer.depth());
        let give_up = window.give_up_index();

        let mut pending = candidates;
        let mut confirmations = Vec::new();
        let mut probes = 0usize;

        let mut probe = self.chooser.first_index(&self.cache, &pending, &window);
        self.take_localized(&mut pending, &mut confirmations);

        let state = loop {
            if pending.is_empty() {
                break StepState::Confirmed;
            }
            if probe == give_up {
                break StepState::Abandoned;
            }
            let Some(span) = window.span_to_latest(probe) else {
                break StepState::Exhausted;
            };
            if span > search_range || self.cache.contains(probe) {
                break StepState::Exhausted;
            }
            let Some(frame) = self.buffer.get_by_frame_number(probe).cloned() else {
                break StepState::Exhausted;
            };

            let (lookup, results) =
                self.cache
                    .get_or_analyze(&frame, &self.config.categories, &mut self.analyzer);
            let results = results.to_vec();
            probes += 1;
            self.metrics.inc(&self.metrics.probes);
            match lookup {
                Lookup::Hit => self.metrics.inc(&self.metrics.cache_hits),
                Lookup::Analyzed => self.metrics.inc(&self.metrics.analyzer_calls),
                Lookup::Failed => {
                    self.metrics.inc(&self.metrics.analyzer_calls);
                    self.metrics.inc(&self.metrics.analyzer_failures);
                }
            }
            debug!(
                "probe {} at frame {}: {} detection(s)",
                probes,
                probe,
                results.len()
            );

            let matched = self.score_probe(probe, &results, &window, &mut pending);
            confirmations.extend(matched);
            if pending.is_empty() {
                break StepState::Confirmed;
            }
            if span >= search_range {
                break StepState::Exhausted;
            }

            probe = self
                .chooser
                .choose_next_index(&self.cache, &pending, probe, &window);
            self.take_localized(&mut pending, &mut confirmations);
        };

        if matches!(state, StepState::Exhausted | StepState::Abandoned) {
            debug!(
                "search at frame {} ended {:?} after {} probe(s), {} candidate(s) pending",
                latest,
                state,
                probes,
                pending.len()
            );
        }
        (state, confirmations, pending, probes)
    }

    /// Match one probed frame's results against every pending candidate.
    /// Detections continuing a parked object are skipped.
    fn score_probe(
        &mut self,
        probe: i64,
        results: &[ItemId],
        window: &ProbeWindow<'_>,
        pending: &mut Vec<TriggerCandidate>,
    ) -> Vec<Confirmation> {
        let parked: Vec<bool> = results
            .iter()
            .map(|r| self.chooser.is_stationary(&self.cache, window, probe, &r.bbox))
            .collect();
        let parked_count = parked.iter().filter(|p| **p).count();
        if parked_count > 0 {
            debug!("{} parked detection(s) ignored at frame {}", parked_count, probe);
        }
        let mut accepted = Vec::new();
        let mut still_pending = Vec::with_capacity(pending.len());

        for candidate in pending.drain(..) {
            let mut strong: Option<(usize, f32)> = None;
            let mut weak: Option<(usize, f32)> = None;

            for (slot, result) in results.iter().enumerate() {
                if parked[slot] {
                    continue;
                }
                let overlap = overlap_ratio(candidate.segment(), &result.bbox);
                if overlap >= self.config.large_overlap_threshold
                    && result.confidence >= self.config.low_confidence_threshold
                {
                    if strong.map_or(true, |(_, o)| overlap > o) {
                        strong = Some((slot, overlap));
                    }
                } else if overlap >= self.config.overlap_threshold
                    && weak.map_or(true, |(_, o)| overlap > o)
                {
                    weak = Some((slot, overlap));
                }
            }

            let chosen = if let Some((slot, overlap)) = strong {
                debug!(
                    "strong match for line {} at frame {} (overlap {:.2})",
                    candidate.key.line_id, probe, overlap
                );
                Some(slot)
            } else if let Some((slot, overlap)) = weak {
                let frames = self.corroboration.entry(candidate.key).or_default();
                frames.insert(probe);
                debug!(
                    "weak match for line {} at frame {} (overlap {:.2}, {}/{})",
                    candidate.key.line_id,
                    probe,
                    overlap,
                    frames.len(),
                    self.config.corroborating_matches
                );
                (frames.len() >= self.config.corroborating_matches).then_some(slot)
            } else {
                None
            };

            match chosen {
                Some(slot) => accepted.push(Confirmation {
                    detection: results[slot].clone(),
                    candidate,
                    frame_index: probe,
                    slot,
                    crossing_frame: probe as f32,
                }),
                None => still_pending.push(candidate),
            }
        }

        *pending = still_pending;
        accepted
    }

    /// Confirm a candidate from a clean localized crossing once every frame
    /// between the two bracketing samples has been looked at.
    fn take_localized(
        &mut self,
        pending: &mut Vec<TriggerCandidate>,
        confirmations: &mut Vec<Confirmation>,
    ) {
        let Some(estimate) = self.chooser.localized_crossing().cloned() else {
            return;
        };
        if !estimate.rank.is_clean() {
            return;
        }
        let bracket_explored =
            ((estimate.before_frame + 1)..estimate.after_frame).all(|i| self.cache.contains(i));
        if !bracket_explored {
            return;
        }
        let Some(pos) = pending.iter().position(|c| c.key == estimate.candidate) else {
            return;
        };
        let Some(detection) = self
            .cache
            .get(estimate.after_frame)
            .and_then(|r| r.get(estimate.after_slot))
            .cloned()
        else {
            return;
        };

        debug!(
            "crossing of line {} localized between frames {} and {}",
            estimate.candidate.line_id, estimate.before_frame, estimate.after_frame
        );
        let candidate = pending.remove(pos);
        confirmations.push(Confirmation {
            candidate,
            frame_index: estimate.after_frame,
            slot: estimate.after_slot,
            detection,
            crossing_frame: estimate.frame_estimate,
        });
    }

    // ========================================================================
    // ITEM HISTORY
    // ========================================================================

    fn apply_confirmations(&mut self, confirmations: Vec<Confirmation>, items: &mut Vec<FramedItem>) {
        if confirmations.is_empty() {
            return;
        }

        // Resolve every candidate first: item indices are only valid until
        // the first insertion below.
        let mut placements: Vec<(i64, ItemId)> = Vec::new();
        for conf in &confirmations {
            let resolved_trigger = LineTrigger {
                further_analysis_triggered: false,
                ..conf.candidate.trigger.clone()
            };
            let mut confirmed = conf.detection.clone();
            confirmed.trigger = Some(resolved_trigger.clone());
            if confirmed.method.is_empty() {
                confirmed.method = DEFAULT_METHOD.to_string();
            }

            let Some(owner) = items.get_mut(conf.candidate.item_index) else {
                warn!(
                    "candidate item {} vanished before confirmation",
                    conf.candidate.item_index
                );
                continue;
            };
            if conf.frame_index == conf.candidate.frame_index() {
                owner.push(confirmed);
            } else {
                let mut closed = conf.candidate.trigger_id.clone();
                closed.trigger = Some(resolved_trigger);
                owner.push(closed);
                placements.push((conf.frame_index, confirmed));
            }
        }

        for (frame_index, id) in placements {
            self.place(items, frame_index, id);
        }

        // Back-fill cached detections older than the newest confirmation
        let placed: HashSet<(i64, usize)> = confirmations
            .iter()
            .map(|c| (c.frame_index, c.slot))
            .collect();
        let horizon = confirmations
            .iter()
            .map(|c| c.frame_index)
            .max()
            .unwrap_or(i64::MIN);
        let backfill: Vec<(i64, Vec<ItemId>)> = self
            .cache
            .iter()
            .filter(|(f, _)| *f < horizon && !self.backfilled.contains(f))
            .map(|(f, r)| (f, r.to_vec()))
            .collect();
        for (frame_index, results) in backfill {
            for (slot, result) in results.into_iter().enumerate() {
                if placed.contains(&(frame_index, slot)) {
                    continue;
                }
                let mut plain = result;
                plain.trigger = None;
                if plain.method.is_empty() {
                    plain.method = DEFAULT_METHOD.to_string();
                }
                self.place(items, frame_index, plain);
            }
            self.backfilled.insert(frame_index);
        }

        for conf in confirmations {
            let key = conf.candidate.key;
            self.corroboration.remove(&key);
            self.line_counts.entry(key.line_id).or_default().confirmed += 1;
            self.metrics.inc(&self.metrics.candidates_confirmed);
            info!(
                "line {} ({}) crossing confirmed: trigger frame {}, confirmed at {}, crossing ~{:.1}, {} {:.2}",
                key.line_id,
                conf.candidate.trigger.line_name,
                key.frame_index,
                conf.frame_index,
                conf.crossing_frame,
                conf.detection.label,
                conf.detection.confidence
            );
            self.events.publish(PipelineEvent::CandidateConfirmed {
                line_id: key.line_id,
                line_name: conf.candidate.trigger.line_name.clone(),
                trigger_frame: key.frame_index,
                confirmed_frame: conf.frame_index,
                crossing_frame: conf.crossing_frame,
                method: if conf.detection.method.is_empty() {
                    DEFAULT_METHOD.to_string()
                } else {
                    conf.detection.method.clone()
                },
                label: conf.detection.label.clone(),
                confidence: conf.detection.confidence,
            });
        }
    }

    /// Append `id` to the best-overlapping item of its frame, or start a new
    /// item after the last one at or before that frame. Items still waiting
    /// on confirmation are never merged into.
    fn place(&self, items: &mut Vec<FramedItem>, frame_index: i64, id: ItemId) {
        let best = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.frame_index() == frame_index)
            .filter_map(|(i, item)| {
                let latest = item.latest()?;
                if latest.is_pending_trigger() {
                    return None;
                }
                Some((i, iou(&latest.bbox, &id.bbox)))
            })
            .filter(|(_, overlap)| *overlap >= self.config.merge_iou_threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((i, _)) = best {
            items[i].push(id);
            return;
        }

        let Some(frame) = self.buffer.get_by_frame_number(frame_index).cloned() else {
            warn!("frame {} left the window before placement", frame_index);
            return;
        };
        let at = items
            .iter()
            .rposition(|item| item.frame_index() <= frame_index)
            .map_or(0, |i| i + 1);
        items.insert(at, FramedItem::new(frame, id));
    }

    // ========================================================================
    // BOOKKEEPING
    // ========================================================================

    fn expire_candidates(&mut self, oldest: i64) {
        for key in expired_keys(self.pending.iter(), oldest) {
            self.pending.remove(&key);
            self.corroboration.remove(&key);
            info!(
                "candidate on line {} from frame {} expired unconfirmed",
                key.line_id, key.frame_index
            );
            self.events.publish(PipelineEvent::CandidateExpired {
                line_id: key.line_id,
                trigger_frame: key.frame_index,
            });
        }
        self.corroboration.retain(|k, _| k.frame_index >= oldest);
        self.seen.retain(|k| k.frame_index >= oldest);
    }

    fn update_bookkeeping(&mut self, candidates: &[TriggerCandidate]) {
        let mut per_line: BTreeMap<usize, usize> = BTreeMap::new();
        for candidate in candidates {
            *per_line.entry(candidate.key.line_id).or_default() += 1;
            if self.seen.insert(candidate.key) {
                self.line_counts
                    .entry(candidate.key.line_id)
                    .or_default()
                    .triggered += 1;
                info!(
                    "new trigger candidate on line {} ({}) at frame {}",
                    candidate.key.line_id, candidate.trigger.line_name, candidate.key.frame_index
                );
            }
        }

        if per_line != self.prev_pending_per_line {
            debug!("pending per line: {:?}", per_line);
        }
        self.prev_pending_per_line = per_line;
        self.pending = candidates.iter().map(|c| c.key).collect();
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn line_counts(&self) -> &BTreeMap<usize, LineCount> {
        &self.line_counts
    }

    pub fn pending(&self) -> impl Iterator<Item = &CandidateKey> {
        self.pending.iter()
    }

    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        self.events.drain()
    }
}

// ============================================================================
// TESTS
// ============================================================================
