// src/analysis/path_tracker.rs
//
// Mini object tracking over the sparse samples of one look-back window.
//
// Pipeline:
//   cached results → WindowSnapshot (one slot per buffered frame, None = unprobed)
//                  → PathTable      (greedy best-IoU chains across offsets)
//                  → jitter         (stationary vs moving)
//                  → localize       (where a moving path crossed a line)
//
// Design:
//   - Chains link each detection to its best-IoU match in every later
//     probed offset. There is no IoU floor: the best available match is
//     taken, and a 0 IoU simply makes the path look very non-stationary.
//   - Paths live in an arena with an explicit detection → path map, so two
//     chains that meet are merged by relinking members instead of building
//     a pointer graph.
//   - A path never holds two detections of the same offset.

use super::index_chooser::ProbeWindow;
use crate::geometry::{distance_sq_to_segment, iou, passes_within_span, position_buckets, SideBucket};
use crate::pipeline::result_cache::ResultCache;
use crate::types::{BoundingBox, LineSegment};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Paths shorter than this cannot be judged stationary
const MIN_JITTER_SAMPLES: usize = 4;

// ============================================================================
// SNAPSHOT
// ============================================================================

/// A detection inside the snapshot: offset in the window + position in the
/// cached result list of that frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DetectionRef {
    pub offset: usize,
    pub slot: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotDetection {
    pub slot: usize,
    pub bbox: BoundingBox,
}

/// Dense per-offset view of cached results for one window.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    frames: Vec<i64>,
    entries: Vec<Option<Vec<SnapshotDetection>>>,
}

impl WindowSnapshot {
    /// Offset `o` is the window's `o`-th buffered frame. Detections listed
    /// in `excluded` as (frame, slot) are left out.
    pub fn build(
        cache: &ResultCache,
        window: &ProbeWindow<'_>,
        excluded: &HashSet<(i64, usize)>,
    ) -> Self {
        let entries = window
            .frames()
            .iter()
            .map(|&frame| {
                cache.get(frame).map(|results| {
                    results
                        .iter()
                        .enumerate()
                        .filter(|(slot, _)| !excluded.contains(&(frame, *slot)))
                        .map(|(slot, r)| SnapshotDetection { slot, bbox: r.bbox })
                        .collect()
                })
            })
            .collect();
        Self {
            frames: window.frames().to_vec(),
            entries,
        }
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn frame_index(&self, offset: usize) -> i64 {
        self.frames[offset]
    }

    /// None when the offset was never probed
    pub fn detections(&self, offset: usize) -> Option<&[SnapshotDetection]> {
        self.entries.get(offset)?.as_deref()
    }

    pub fn bbox(&self, r: DetectionRef) -> Option<BoundingBox> {
        self.detections(r.offset)?
            .iter()
            .find(|d| d.slot == r.slot)
            .map(|d| d.bbox)
    }

    pub fn remove(&mut self, r: DetectionRef) {
        if let Some(Some(dets)) = self.entries.get_mut(r.offset) {
            dets.retain(|d| d.slot != r.slot);
        }
    }
}

// ============================================================================
// PATHS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPath {
    /// Ascending by offset, one member per offset
    members: Vec<DetectionRef>,
}

impl ObjectPath {
    pub fn members(&self) -> &[DetectionRef] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn has_offset(&self, offset: usize) -> bool {
        self.members.iter().any(|m| m.offset == offset)
    }

    fn insert(&mut self, r: DetectionRef) {
        let pos = self.members.partition_point(|m| m.offset < r.offset);
        self.members.insert(pos, r);
    }

    /// Mean of 1/IoU between the first box and each later box, divided by
    /// the squared minimum IoU. ~1 for a parked object, large for anything
    /// that moves, infinite when the path is too short to judge or drifts
    /// off its first box entirely.
    pub fn jitter(&self, snapshot: &WindowSnapshot) -> f32 {
        if self.members.len() < MIN_JITTER_SAMPLES {
            return f32::INFINITY;
        }
        let Some(first) = snapshot.bbox(self.members[0]) else {
            return f32::INFINITY;
        };

        let ious: Vec<f32> = self.members[1..]
            .iter()
            .filter_map(|m| snapshot.bbox(*m))
            .map(|b| iou(&first, &b))
            .collect();
        if ious.is_empty() {
            return f32::INFINITY;
        }

        let min_iou = ious.iter().copied().fold(f32::INFINITY, f32::min);
        if min_iou <= 0.0 {
            return f32::INFINITY;
        }
        let mean_inverse = ious.iter().map(|v| 1.0 / v).sum::<f32>() / ious.len() as f32;
        mean_inverse / (min_iou * min_iou)
    }

    /// Find where this path meets `segment`.
    ///
    /// Prefers a move across the line between consecutive samples; falls
    /// back to the sample nearest the line.
    pub fn localize(&self, snapshot: &WindowSnapshot, segment: &LineSegment) -> Option<Localization> {
        let samples: Vec<PathSample> = self
            .members
            .iter()
            .filter_map(|m| {
                let bbox = snapshot.bbox(*m)?;
                Some(PathSample {
                    frame: snapshot.frame_index(m.offset),
                    slot: m.slot,
                    bbox,
                })
            })
            .collect();
        if samples.len() < 2 {
            return None;
        }

        let mut best: Option<(CrossingRank, usize)> = None;
        for (i, pair) in samples.windows(2).enumerate() {
            if let Some(rank) = has_crossed_through(&pair[0].bbox, &pair[1].bbox, segment) {
                if best.map_or(true, |(r, _)| rank > r) {
                    best = Some((rank, i));
                }
            }
        }

        if let Some((rank, i)) = best {
            let (a, b) = (&samples[i], &samples[i + 1]);
            let da = distance_sq_to_segment(a.bbox.center(), segment).sqrt();
            let db = distance_sq_to_segment(b.bbox.center(), segment).sqrt();
            let fraction = if da + db > 0.0 { da / (da + db) } else { 0.5 };
            return Some(Localization {
                rank,
                before_frame: a.frame,
                after_frame: b.frame,
                after_slot: b.slot,
                frame_estimate: a.frame as f32 + (b.frame - a.frame) as f32 * fraction,
            });
        }

        let nearest = samples.iter().min_by(|a, b| {
            let da = distance_sq_to_segment(a.bbox.center(), segment);
            let db = distance_sq_to_segment(b.bbox.center(), segment);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })?;
        let rank = if samples.len() >= MIN_JITTER_SAMPLES {
            CrossingRank::NearestLong
        } else {
            CrossingRank::NearestShort
        };
        Some(Localization {
            rank,
            before_frame: nearest.frame,
            after_frame: nearest.frame,
            after_slot: nearest.slot,
            frame_estimate: nearest.frame as f32,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct PathSample {
    frame: i64,
    slot: usize,
    bbox: BoundingBox,
}

/// Arena of paths plus membership map.
#[derive(Debug, Default)]
pub struct PathTable {
    arena: Vec<Option<ObjectPath>>,
    owner: HashMap<DetectionRef, usize>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain every untracked detection forward through all later probed
    /// offsets, always following the best IoU match.
    pub fn build(snapshot: &WindowSnapshot) -> Self {
        let mut table = Self::new();
        let depth = snapshot.depth();

        for offset in 0..depth {
            let Some(seeds) = snapshot.detections(offset) else {
                continue;
            };
            for seed in seeds {
                let seed_ref = DetectionRef {
                    offset,
                    slot: seed.slot,
                };
                if table.owner.contains_key(&seed_ref) {
                    continue;
                }

                let mut current = seed_ref;
                let mut current_box = seed.bbox;
                for later in (offset + 1)..depth {
                    let Some(next) = snapshot.detections(later) else {
                        continue;
                    };
                    let best = next.iter().max_by(|a, b| {
                        iou(&current_box, &a.bbox)
                            .partial_cmp(&iou(&current_box, &b.bbox))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    let Some(best) = best else {
                        continue;
                    };
                    let best_ref = DetectionRef {
                        offset: later,
                        slot: best.slot,
                    };
                    table.add_to_path(current, best_ref);
                    current = best_ref;
                    current_box = best.bbox;
                }
            }
        }
        table
    }

    /// Record that `a` and `b` are the same object. Merges their paths when
    /// both already belong to one and the merge keeps one member per offset.
    pub fn add_to_path(&mut self, a: DetectionRef, b: DetectionRef) {
        if a.offset == b.offset {
            return;
        }
        let pa = self.owner.get(&a).copied();
        let pb = self.owner.get(&b).copied();

        match (pa, pb) {
            (None, None) => {
                let mut path = ObjectPath {
                    members: Vec::with_capacity(4),
                };
                path.insert(a);
                path.insert(b);
                let id = self.arena.len();
                self.arena.push(Some(path));
                self.owner.insert(a, id);
                self.owner.insert(b, id);
            }
            (Some(id), None) => self.attach(id, b),
            (None, Some(id)) => self.attach(id, a),
            (Some(x), Some(y)) if x == y => {}
            (Some(x), Some(y)) => self.merge(x, y),
        }
    }

    fn attach(&mut self, id: usize, r: DetectionRef) {
        if let Some(Some(path)) = self.arena.get_mut(id) {
            if path.has_offset(r.offset) {
                return;
            }
            path.insert(r);
            self.owner.insert(r, id);
        }
    }

    fn merge(&mut self, x: usize, y: usize) {
        let (len_x, len_y) = match (&self.arena[x], &self.arena[y]) {
            (Some(px), Some(py)) => {
                if px.members.iter().any(|m| py.has_offset(m.offset)) {
                    return;
                }
                (px.len(), py.len())
            }
            _ => return,
        };
        let (keep, absorb) = if len_x >= len_y { (x, y) } else { (y, x) };

        let Some(absorbed) = self.arena[absorb].take() else {
            return;
        };
        for m in absorbed.members {
            self.owner.insert(m, keep);
            if let Some(Some(path)) = self.arena.get_mut(keep) {
                path.insert(m);
            }
        }
    }

    pub fn path_of(&self, r: DetectionRef) -> Option<&ObjectPath> {
        let id = *self.owner.get(&r)?;
        self.arena.get(id)?.as_ref()
    }

    pub fn paths(&self) -> impl Iterator<Item = &ObjectPath> {
        self.arena.iter().filter_map(|p| p.as_ref())
    }
}

// ============================================================================
// CROSSING LOCALIZATION
// ============================================================================

/// How convincingly a path was placed on a line. Ordered weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CrossingRank {
    /// Closest sample to the line, short path
    NearestShort,
    /// Closest sample to the line, path of 4+ samples
    NearestLong,
    /// Bucket changed without switching sides
    BucketChange,
    /// Moved between one side and the line itself
    EdgeTransition,
    /// Switched sides, at least one sample only partially clear
    PartialCrossing,
    /// Switched sides, fully clear of the line on both samples
    FullCrossing,
}

impl CrossingRank {
    pub fn score(&self) -> u8 {
        match self {
            Self::NearestShort => 6,
            Self::NearestLong => 7,
            Self::BucketChange => 8,
            Self::EdgeTransition => 9,
            Self::PartialCrossing => 10,
            Self::FullCrossing => 11,
        }
    }

    /// The object was seen on both sides of the line
    pub fn is_clean(&self) -> bool {
        *self >= Self::PartialCrossing
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Localization {
    pub rank: CrossingRank,
    pub before_frame: i64,
    pub after_frame: i64,
    pub after_slot: usize,
    pub frame_estimate: f32,
}

/// Transition of a box across the line between two consecutive samples.
/// Moves that pass beyond either end of the segment do not count.
pub fn has_crossed_through(
    prev: &BoundingBox,
    next: &BoundingBox,
    segment: &LineSegment,
) -> Option<CrossingRank> {
    let rank = across_transition(
        position_buckets(prev, segment).across,
        position_buckets(next, segment).across,
    )?;
    passes_within_span(prev, next, segment).then_some(rank)
}

fn across_transition(prev: SideBucket, next: SideBucket) -> Option<CrossingRank> {
    if prev == next {
        return None;
    }
    let (sp, sn) = (prev.side(), next.side());
    let rank = if sp * sn == -1 {
        if prev.is_full() && next.is_full() {
            CrossingRank::FullCrossing
        } else {
            CrossingRank::PartialCrossing
        }
    } else if sp != sn {
        CrossingRank::EdgeTransition
    } else {
        CrossingRank::BucketChange
    };
    Some(rank)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ScriptedAnalyzer;
    use crate::types::{Frame, ItemId, Point};

    fn det(x: f32, y: f32) -> ItemId {
        ItemId::new(BoundingBox::new(x, y, 40.0, 40.0), "car", 0.9)
    }

    /// Cache holding `per_frame` detections for each listed frame
    fn cache_from(frames: &[(i64, Vec<ItemId>)]) -> ResultCache {
        let mut analyzer = ScriptedAnalyzer::new();
        let mut cache = ResultCache::new();
        for (i, dets) in frames {
            analyzer.set(*i, dets.clone());
            cache.get_or_analyze(&Frame::new(*i, "cam", Vec::new()), &[], &mut analyzer);
        }
        cache
    }

    /// Snapshot of the gap-free window ending at `latest`
    fn snapshot(cache: &ResultCache, latest: i64, depth: i64, excluded: &HashSet<(i64, usize)>) -> WindowSnapshot {
        let frames: Vec<i64> = (latest - depth + 1..=latest).collect();
        WindowSnapshot::build(cache, &ProbeWindow::new(&frames), excluded)
    }

    fn vertical_line() -> LineSegment {
        LineSegment::new(Point::new(150.0, 100.0), Point::new(150.0, 200.0))
    }

    #[test]
    fn test_snapshot_marks_unprobed_offsets() {
        let cache = cache_from(&[(11, vec![det(0.0, 0.0)]), (13, vec![])]);
        let snap = snapshot(&cache, 14, 5, &HashSet::new());
        assert_eq!(snap.frame_index(0), 10);
        assert!(snap.detections(0).is_none());
        assert_eq!(snap.detections(1).map(|d| d.len()), Some(1));
        assert_eq!(snap.detections(3).map(|d| d.len()), Some(0));
        assert!(snap.detections(4).is_none());
    }

    #[test]
    fn test_snapshot_excludes_listed_detections() {
        let cache = cache_from(&[(11, vec![det(0.0, 0.0), det(100.0, 0.0)])]);
        let mut excluded = HashSet::new();
        excluded.insert((11, 0));
        let snap = snapshot(&cache, 14, 5, &excluded);
        let dets = snap.detections(1).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].slot, 1);
    }

    #[test]
    fn test_paths_follow_best_iou() {
        // Two objects, far apart, both visible in three frames
        let frames: Vec<(i64, Vec<ItemId>)> = (0..3)
            .map(|i| {
                let x = i as f32 * 5.0;
                (i, vec![det(x, 0.0), det(400.0 - x, 300.0)])
            })
            .collect();
        let cache = cache_from(&frames);
        let snap = snapshot(&cache, 2, 3, &HashSet::new());
        let table = PathTable::build(&snap);

        assert_eq!(table.paths().count(), 2);
        assert!(table.paths().all(|p| p.len() == 3));
        let first = table.path_of(DetectionRef { offset: 0, slot: 0 }).unwrap();
        assert!(first.members().iter().all(|m| m.slot == 0));
    }

    #[test]
    fn test_add_to_path_merges_by_relinking() {
        let mut table = PathTable::new();
        let r = |offset, slot| DetectionRef { offset, slot };
        table.add_to_path(r(0, 0), r(1, 0));
        table.add_to_path(r(3, 0), r(4, 0));
        assert_eq!(table.paths().count(), 2);

        table.add_to_path(r(1, 0), r(3, 0));
        assert_eq!(table.paths().count(), 1);
        let merged = table.path_of(r(4, 0)).unwrap();
        let offsets: Vec<usize> = merged.members().iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 1, 3, 4]);
        assert_eq!(table.path_of(r(0, 0)), table.path_of(r(4, 0)));
    }

    #[test]
    fn test_merge_refused_on_offset_collision() {
        let mut table = PathTable::new();
        let r = |offset, slot| DetectionRef { offset, slot };
        table.add_to_path(r(0, 0), r(1, 0));
        table.add_to_path(r(0, 1), r(2, 0));
        table.add_to_path(r(1, 0), r(2, 0));
        assert_eq!(table.paths().count(), 2);
    }

    #[test]
    fn test_stationary_path_has_low_jitter() {
        let frames: Vec<(i64, Vec<ItemId>)> = (0..5)
            .map(|i| (i, vec![det(100.0 + (i % 2) as f32 * 0.5, 100.0)]))
            .collect();
        let cache = cache_from(&frames);
        let snap = snapshot(&cache, 4, 5, &HashSet::new());
        let table = PathTable::build(&snap);
        let path = table.paths().next().unwrap();
        assert_eq!(path.len(), 5);
        assert!(path.jitter(&snap) < 2.0, "jitter {}", path.jitter(&snap));
    }

    #[test]
    fn test_moving_path_has_high_jitter() {
        let frames: Vec<(i64, Vec<ItemId>)> = (0..5)
            .map(|i| (i, vec![det(100.0 + i as f32 * 6.0, 100.0)]))
            .collect();
        let cache = cache_from(&frames);
        let snap = snapshot(&cache, 4, 5, &HashSet::new());
        let table = PathTable::build(&snap);
        let path = table.paths().next().unwrap();
        assert!(path.jitter(&snap) > 2.0, "jitter {}", path.jitter(&snap));
    }

    #[test]
    fn test_short_path_jitter_is_infinite() {
        let frames: Vec<(i64, Vec<ItemId>)> = (0..3).map(|i| (i, vec![det(100.0, 100.0)])).collect();
        let cache = cache_from(&frames);
        let snap = snapshot(&cache, 2, 3, &HashSet::new());
        let table = PathTable::build(&snap);
        assert!(table.paths().next().unwrap().jitter(&snap).is_infinite());
    }

    #[test]
    fn test_localize_clean_crossing_interpolates() {
        // Left of x=150 at frames 0,1 then right of it at 3,4
        let frames = vec![
            (0, vec![det(60.0, 130.0)]),
            (1, vec![det(90.0, 130.0)]),
            (3, vec![det(160.0, 130.0)]),
            (4, vec![det(175.0, 130.0)]),
        ];
        let cache = cache_from(&frames);
        let snap = snapshot(&cache, 4, 5, &HashSet::new());
        let table = PathTable::build(&snap);
        let path = table.paths().next().unwrap();

        let loc = path.localize(&snap, &vertical_line()).unwrap();
        assert_eq!(loc.rank, CrossingRank::FullCrossing);
        assert_eq!((loc.before_frame, loc.after_frame), (1, 3));
        // centers at x=110 and x=180: 40 / (40 + 30) of the way from 1 to 3
        assert!((loc.frame_estimate - (1.0 + 2.0 * 40.0 / 70.0)).abs() < 1e-3);
    }

    #[test]
    fn test_localize_falls_back_to_nearest_sample() {
        let frames = vec![
            (0, vec![det(10.0, 130.0)]),
            (1, vec![det(20.0, 130.0)]),
            (2, vec![det(30.0, 130.0)]),
        ];
        let cache = cache_from(&frames);
        let snap = snapshot(&cache, 2, 3, &HashSet::new());
        let table = PathTable::build(&snap);
        let loc = table
            .paths()
            .next()
            .unwrap()
            .localize(&snap, &vertical_line())
            .unwrap();
        assert_eq!(loc.rank, CrossingRank::NearestShort);
        assert_eq!(loc.after_frame, 2);
    }

    #[test]
    fn test_snapshot_offsets_skip_frame_gaps() {
        let cache = cache_from(&[(20, vec![det(0.0, 0.0)]), (40, vec![])]);
        let frames = [10, 20, 30, 40];
        let snap = WindowSnapshot::build(&cache, &ProbeWindow::new(&frames), &HashSet::new());
        assert_eq!(snap.depth(), 4);
        assert_eq!(snap.frame_index(1), 20);
        assert_eq!(snap.detections(1).map(|d| d.len()), Some(1));
        assert!(snap.detections(2).is_none());
        assert_eq!(snap.detections(3).map(|d| d.len()), Some(0));
    }

    #[test]
    fn test_diagonal_crossing_is_detected() {
        let diagonal = LineSegment::new(Point::new(0.0, 0.0), Point::new(200.0, 200.0));
        let upper = BoundingBox::new(120.0, 20.0, 40.0, 40.0);
        let lower = BoundingBox::new(20.0, 120.0, 40.0, 40.0);
        assert_eq!(
            has_crossed_through(&upper, &lower, &diagonal),
            Some(CrossingRank::FullCrossing)
        );
    }

    #[test]
    fn test_pass_beside_segment_is_not_a_crossing() {
        let line = vertical_line();
        // sideways below the lower end
        let below = (
            BoundingBox::new(60.0, 230.0, 40.0, 40.0),
            BoundingBox::new(180.0, 230.0, 40.0, 40.0),
        );
        assert_eq!(has_crossed_through(&below.0, &below.1, &line), None);
        // up-to-down, well left of the line, past both ends
        let alongside = (
            BoundingBox::new(0.0, 30.0, 40.0, 40.0),
            BoundingBox::new(0.0, 210.0, 40.0, 40.0),
        );
        assert_eq!(has_crossed_through(&alongside.0, &alongside.1, &line), None);

        let frames = vec![
            (0, vec![det(0.0, 30.0)]),
            (1, vec![det(0.0, 30.0)]),
            (2, vec![det(0.0, 210.0)]),
            (3, vec![det(0.0, 210.0)]),
        ];
        let cache = cache_from(&frames);
        let snap = snapshot(&cache, 3, 4, &HashSet::new());
        let table = PathTable::build(&snap);
        let loc = table.paths().next().unwrap().localize(&snap, &line).unwrap();
        assert!(!loc.rank.is_clean());
        assert_eq!(loc.rank, CrossingRank::NearestLong);
    }

    #[test]
    fn test_crossing_ranks_order() {
        use SideBucket::*;
        assert_eq!(across_transition(FullBefore, FullAfter), Some(CrossingRank::FullCrossing));
        assert_eq!(
            across_transition(PartialBefore, FullAfter),
            Some(CrossingRank::PartialCrossing)
        );
        assert_eq!(across_transition(FullBefore, Straddle), Some(CrossingRank::EdgeTransition));
        assert_eq!(
            across_transition(FullBefore, PartialBefore),
            Some(CrossingRank::BucketChange)
        );
        assert_eq!(across_transition(Straddle, Straddle), None);
        assert!(CrossingRank::FullCrossing.score() > CrossingRank::NearestShort.score());
        assert!(CrossingRank::PartialCrossing.is_clean());
        assert!(!CrossingRank::EdgeTransition.is_clean());
    }
}
