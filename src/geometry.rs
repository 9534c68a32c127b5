// src/geometry.rs
//
// Stateless box / line-segment scoring used to match expensive-detector
// results against trigger lines and to classify object paths.
//
//   overlap_ratio           → fraction of a segment lying inside a box
//   position_buckets        → 6-way placement across and along a segment
//   passes_within_span      → whether a move meets the line between its ends
//   distance_sq_to_segment  → squared point-to-segment distance
//   iou                     → intersection over union of two boxes
//
// None of these fail: degenerate segments or boxes produce 0 overlap and
// Straddle buckets.

use crate::types::{BoundingBox, LineSegment, Point};
use serde::Serialize;

const PARALLEL_EPSILON: f32 = 1e-6;

// ============================================================================
// OVERLAP RATIO
// ============================================================================

/// Fraction in [0, 1] of `segment` that lies inside `rect`.
///
/// Works in the segment's own parameter space: every edge intersection
/// contributes its parameter, an endpoint inside the box contributes 0 or 1,
/// and the covered fraction is the spread of those bounds. A single edge
/// crossing therefore pairs with whichever endpoint is inside.
pub fn overlap_ratio(segment: &LineSegment, rect: &BoundingBox) -> f32 {
    if segment.is_degenerate() || rect.is_degenerate() {
        return 0.0;
    }

    let tl = Point::new(rect.x, rect.y);
    let tr = Point::new(rect.right(), rect.y);
    let br = Point::new(rect.right(), rect.bottom());
    let bl = Point::new(rect.x, rect.bottom());
    let edges = [(tl, tr), (bl, br), (tl, bl), (tr, br)];

    let mut t_min = f32::INFINITY;
    let mut t_max = f32::NEG_INFINITY;
    let mut bounds = 0;

    for (a, b) in edges {
        if let Some(t) = intersection_param(segment.p1, segment.p2, a, b) {
            t_min = t_min.min(t);
            t_max = t_max.max(t);
            bounds += 1;
        }
    }
    if rect.contains(segment.p1) {
        t_min = t_min.min(0.0);
        t_max = t_max.max(0.0);
        bounds += 1;
    }
    if rect.contains(segment.p2) {
        t_min = t_min.min(1.0);
        t_max = t_max.max(1.0);
        bounds += 1;
    }

    if bounds == 0 {
        return 0.0;
    }
    (t_max - t_min).clamp(0.0, 1.0)
}

/// Parameter `t` along p1→p2 where it meets q1→q2, if the two segments
/// intersect. Parallel segments never report an intersection.
fn intersection_param(p1: Point, p2: Point, q1: Point, q2: Point) -> Option<f32> {
    let r = (p2.x - p1.x, p2.y - p1.y);
    let s = (q2.x - q1.x, q2.y - q1.y);
    let denom = cross(r, s);
    if denom.abs() < PARALLEL_EPSILON {
        return None;
    }

    let qp = (q1.x - p1.x, q1.y - p1.y);
    let t = cross(qp, s) / denom;
    let u = cross(qp, r) / denom;

    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(t)
    } else {
        None
    }
}

fn cross(a: (f32, f32), b: (f32, f32)) -> f32 {
    a.0 * b.1 - a.1 * b.0
}

// ============================================================================
// POSITION BUCKETS
// ============================================================================

/// Share of a box that must lie on one side of the line for a Partial bucket
const DOMINANT_SHARE: f32 = 0.75;

/// Placement of a box along one axis of the segment's own frame.
///
/// Across the line, Before is the half-plane where (p - p1) x (p2 - p1) < 0:
/// left of a top-to-bottom segment, below a left-to-right one. Along the
/// line, Before is past the p1 end and After past the p2 end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SideBucket {
    FullBefore,
    PartialBefore,
    Inner,
    Straddle,
    PartialAfter,
    FullAfter,
}

impl SideBucket {
    /// -1 before the line, 0 on it, 1 after it
    pub fn side(&self) -> i8 {
        match self {
            Self::FullBefore | Self::PartialBefore => -1,
            Self::Inner | Self::Straddle => 0,
            Self::PartialAfter | Self::FullAfter => 1,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::FullBefore | Self::FullAfter)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullBefore => "FULL_BEFORE",
            Self::PartialBefore => "PARTIAL_BEFORE",
            Self::Inner => "INNER",
            Self::Straddle => "STRADDLE",
            Self::PartialAfter => "PARTIAL_AFTER",
            Self::FullAfter => "FULL_AFTER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionBuckets {
    /// Half-plane placement (LR for a vertical line, TB for a horizontal
    /// one). Inner never occurs on this axis.
    pub across: SideBucket,
    /// The box's projection onto the segment against the segment's span
    pub along: SideBucket,
}

impl PositionBuckets {
    const DEGENERATE: Self = Self {
        across: SideBucket::Straddle,
        along: SideBucket::Straddle,
    };
}

/// Extents of a box in a segment's frame: signed distance from the
/// segment's line, and projection onto p1→p2 measured from p1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProjection {
    pub across: (f32, f32),
    pub along: (f32, f32),
    pub length: f32,
}

impl SegmentProjection {
    pub fn of(rect: &BoundingBox, segment: &LineSegment) -> Option<Self> {
        if rect.is_degenerate() || segment.is_degenerate() {
            return None;
        }
        let length = segment.length();
        let dir = (
            (segment.p2.x - segment.p1.x) / length,
            (segment.p2.y - segment.p1.y) / length,
        );
        let corners = [
            Point::new(rect.x, rect.y),
            Point::new(rect.right(), rect.y),
            Point::new(rect.right(), rect.bottom()),
            Point::new(rect.x, rect.bottom()),
        ];

        let mut across = (f32::INFINITY, f32::NEG_INFINITY);
        let mut along = (f32::INFINITY, f32::NEG_INFINITY);
        for c in corners {
            let rel = (c.x - segment.p1.x, c.y - segment.p1.y);
            let a = cross(rel, dir);
            let t = rel.0 * dir.0 + rel.1 * dir.1;
            across = (across.0.min(a), across.1.max(a));
            along = (along.0.min(t), along.1.max(t));
        }
        Some(Self {
            across,
            along,
            length,
        })
    }

    fn across_center(&self) -> f32 {
        (self.across.0 + self.across.1) * 0.5
    }
}

pub fn position_buckets(rect: &BoundingBox, segment: &LineSegment) -> PositionBuckets {
    let Some(proj) = SegmentProjection::of(rect, segment) else {
        return PositionBuckets::DEGENERATE;
    };
    PositionBuckets {
        across: classify_across(proj.across.0, proj.across.1),
        along: classify_extent(proj.along.0, proj.along.1, 0.0, proj.length),
    }
}

fn classify_across(lo: f32, hi: f32) -> SideBucket {
    if hi < 0.0 {
        return SideBucket::FullBefore;
    }
    if lo > 0.0 {
        return SideBucket::FullAfter;
    }
    let before = -lo / (hi - lo);
    if before >= DOMINANT_SHARE {
        SideBucket::PartialBefore
    } else if before <= 1.0 - DOMINANT_SHARE {
        SideBucket::PartialAfter
    } else {
        SideBucket::Straddle
    }
}

fn classify_extent(b0: f32, b1: f32, s0: f32, s1: f32) -> SideBucket {
    if b1 < s0 {
        SideBucket::FullBefore
    } else if b0 > s1 {
        SideBucket::FullAfter
    } else if b0 >= s0 && b1 <= s1 {
        SideBucket::Inner
    } else if b0 < s0 && b1 > s1 {
        SideBucket::Straddle
    } else if b0 < s0 {
        SideBucket::PartialBefore
    } else {
        SideBucket::PartialAfter
    }
}

/// Whether a move from `prev` to `next` meets the line within the segment
/// rather than beyond one of its ends. The along extents are interpolated
/// to the moment the box centre reaches the line.
pub fn passes_within_span(prev: &BoundingBox, next: &BoundingBox, segment: &LineSegment) -> bool {
    let (Some(a), Some(b)) = (
        SegmentProjection::of(prev, segment),
        SegmentProjection::of(next, segment),
    ) else {
        return false;
    };

    let (ca, cb) = (a.across_center(), b.across_center());
    let t = if (ca - cb).abs() > PARALLEL_EPSILON {
        (ca / (ca - cb)).clamp(0.0, 1.0)
    } else {
        0.5
    };
    let lo = a.along.0 + (b.along.0 - a.along.0) * t;
    let hi = a.along.1 + (b.along.1 - a.along.1) * t;
    hi >= 0.0 && lo <= a.length
}

// ============================================================================
// DISTANCE
// ============================================================================

pub fn distance_sq_to_segment(p: Point, segment: &LineSegment) -> f32 {
    let (a, b) = (segment.p1, segment.p2);

    if a.x == b.x {
        // Vertical, or a single point
        let (lo, hi) = (a.y.min(b.y), a.y.max(b.y));
        if p.y >= lo && p.y <= hi {
            return (p.x - a.x).powi(2);
        }
        return dist_sq(p, a).min(dist_sq(p, b));
    }
    if a.y == b.y {
        let (lo, hi) = (a.x.min(b.x), a.x.max(b.x));
        if p.x >= lo && p.x <= hi {
            return (p.y - a.y).powi(2);
        }
        return dist_sq(p, a).min(dist_sq(p, b));
    }

    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / (dx * dx + dy * dy)).clamp(0.0, 1.0);
    dist_sq(p, Point::new(a.x + t * dx, a.y + t * dy))
}

fn dist_sq(a: Point, b: Point) -> f32 {
    (a.x - b.x).powi(2) + (a.y - b.y).powi(2)
}

// ============================================================================
// IoU
// ============================================================================

pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(x1: f32, y1: f32, x2: f32, y2: f32) -> LineSegment {
        LineSegment::new(Point::new(x1, y1), Point::new(x2, y2))
    }

    /// Rotate a point about (150, 150) by `quarter_turns` * 90 degrees
    fn rotate(p: Point, quarter_turns: u32) -> Point {
        let (mut x, mut y) = (p.x - 150.0, p.y - 150.0);
        for _ in 0..quarter_turns {
            let nx = -y;
            y = x;
            x = nx;
        }
        Point::new(x + 150.0, y + 150.0)
    }

    #[test]
    fn test_overlap_half_inside() {
        let rect = BoundingBox::new(100.0, 100.0, 100.0, 100.0);
        let ratio = overlap_ratio(&seg(70.0, 150.0, 130.0, 150.0), &rect);
        assert!((ratio - 0.5).abs() < 1e-4, "got {}", ratio);
    }

    #[test]
    fn test_overlap_half_inside_is_rotation_invariant() {
        let rect = BoundingBox::new(100.0, 100.0, 100.0, 100.0);
        let (p1, p2) = (Point::new(70.0, 150.0), Point::new(130.0, 150.0));
        for turns in 1..4 {
            let s = LineSegment::new(rotate(p1, turns), rotate(p2, turns));
            let ratio = overlap_ratio(&s, &rect);
            assert!((ratio - 0.5).abs() < 1e-4, "turns={} got {}", turns, ratio);
        }
    }

    #[test]
    fn test_overlap_inside_and_outside() {
        let rect = BoundingBox::new(100.0, 100.0, 100.0, 100.0);
        assert_eq!(overlap_ratio(&seg(120.0, 120.0, 180.0, 170.0), &rect), 1.0);
        assert_eq!(overlap_ratio(&seg(0.0, 0.0, 50.0, 80.0), &rect), 0.0);
        // Passes fully through: middle third inside
        let through = overlap_ratio(&seg(50.0, 150.0, 250.0, 150.0), &rect);
        assert!((through - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_overlap_stays_in_unit_range() {
        let rect = BoundingBox::new(10.0, 20.0, 35.0, 15.0);
        for i in 0..40 {
            let f = i as f32;
            let s = seg(f * 1.7 - 5.0, 60.0 - f, 50.0 - f * 0.9, f * 1.3);
            let r = overlap_ratio(&s, &rect);
            assert!((0.0..=1.0).contains(&r), "ratio {} out of range", r);
        }
    }

    #[test]
    fn test_overlap_degenerate_inputs() {
        let rect = BoundingBox::new(100.0, 100.0, 100.0, 100.0);
        assert_eq!(overlap_ratio(&seg(150.0, 150.0, 150.0, 150.0), &rect), 0.0);
        let flat = BoundingBox::new(100.0, 100.0, 0.0, 100.0);
        assert_eq!(overlap_ratio(&seg(50.0, 150.0, 250.0, 150.0), &flat), 0.0);
    }

    #[test]
    fn test_overlap_corner_touch_is_zero() {
        let rect = BoundingBox::new(100.0, 100.0, 100.0, 100.0);
        let r = overlap_ratio(&seg(50.0, 150.0, 150.0, 50.0), &rect);
        assert!(r.abs() < 1e-4);
    }

    #[test]
    fn test_buckets_vertical_line() {
        let line = seg(150.0, 100.0, 150.0, 200.0);
        let left = position_buckets(&BoundingBox::new(90.0, 130.0, 40.0, 40.0), &line);
        let on = position_buckets(&BoundingBox::new(130.0, 130.0, 40.0, 40.0), &line);
        let mostly_left = position_buckets(&BoundingBox::new(115.0, 130.0, 40.0, 40.0), &line);
        let right = position_buckets(&BoundingBox::new(160.0, 130.0, 40.0, 40.0), &line);
        assert_eq!(left.across, SideBucket::FullBefore);
        assert_eq!(on.across, SideBucket::Straddle);
        assert_eq!(mostly_left.across, SideBucket::PartialBefore);
        assert_eq!(right.across, SideBucket::FullAfter);
        assert_eq!(left.along, SideBucket::Inner);
    }

    #[test]
    fn test_buckets_along_segment_span() {
        let line = seg(100.0, 300.0, 200.0, 300.0);
        let b = |x: f32| position_buckets(&BoundingBox::new(x, 250.0, 40.0, 20.0), &line).along;
        assert_eq!(b(40.0), SideBucket::FullBefore);
        assert_eq!(b(80.0), SideBucket::PartialBefore);
        assert_eq!(b(120.0), SideBucket::Inner);
        assert_eq!(b(180.0), SideBucket::PartialAfter);
        assert_eq!(b(260.0), SideBucket::FullAfter);
        let wide = position_buckets(&BoundingBox::new(50.0, 250.0, 200.0, 20.0), &line);
        assert_eq!(wide.along, SideBucket::Straddle);
        // above a left-to-right segment is the After half-plane
        let above = position_buckets(&BoundingBox::new(120.0, 250.0, 40.0, 20.0), &line);
        assert_eq!(above.across, SideBucket::FullAfter);
    }

    #[test]
    fn test_buckets_follow_diagonal_half_planes() {
        let diagonal = seg(0.0, 0.0, 200.0, 200.0);
        let upper = position_buckets(&BoundingBox::new(120.0, 20.0, 40.0, 40.0), &diagonal);
        let lower = position_buckets(&BoundingBox::new(20.0, 120.0, 40.0, 40.0), &diagonal);
        let on = position_buckets(&BoundingBox::new(80.0, 80.0, 40.0, 40.0), &diagonal);
        assert_eq!(upper.across, SideBucket::FullAfter);
        assert_eq!(lower.across, SideBucket::FullBefore);
        assert_eq!(on.across, SideBucket::Straddle);
        assert_eq!(upper.along, SideBucket::Inner);
        assert_eq!(lower.along, SideBucket::Inner);
    }

    #[test]
    fn test_buckets_degenerate_straddle() {
        let point_line = seg(5.0, 5.0, 5.0, 5.0);
        let r = position_buckets(&BoundingBox::new(0.0, 0.0, 10.0, 10.0), &point_line);
        assert_eq!(r.across, SideBucket::Straddle);
        assert_eq!(r.along, SideBucket::Straddle);
        let flat = position_buckets(&BoundingBox::new(0.0, 0.0, 0.0, 10.0), &seg(0.0, 0.0, 9.0, 9.0));
        assert_eq!(flat, PositionBuckets::DEGENERATE);
    }

    #[test]
    fn test_pass_within_span_vs_beside_end() {
        let line = seg(150.0, 100.0, 150.0, 200.0);
        let through = passes_within_span(
            &BoundingBox::new(90.0, 130.0, 40.0, 40.0),
            &BoundingBox::new(170.0, 130.0, 40.0, 40.0),
            &line,
        );
        assert!(through);
        // same sideways move, 30 px below the lower end
        let beside = passes_within_span(
            &BoundingBox::new(90.0, 230.0, 40.0, 40.0),
            &BoundingBox::new(170.0, 230.0, 40.0, 40.0),
            &line,
        );
        assert!(!beside);
        // diagonal move whose box still overlaps the lower end at the line
        let clipping = passes_within_span(
            &BoundingBox::new(90.0, 170.0, 40.0, 40.0),
            &BoundingBox::new(170.0, 210.0, 40.0, 40.0),
            &line,
        );
        assert!(clipping);
    }

    #[test]
    fn test_distance_axis_aligned_and_general() {
        let vertical = seg(10.0, 0.0, 10.0, 100.0);
        assert_eq!(distance_sq_to_segment(Point::new(13.0, 50.0), &vertical), 9.0);
        assert_eq!(distance_sq_to_segment(Point::new(10.0, 104.0), &vertical), 16.0);

        let horizontal = seg(0.0, 0.0, 10.0, 0.0);
        assert_eq!(distance_sq_to_segment(Point::new(5.0, -2.0), &horizontal), 4.0);
        assert_eq!(distance_sq_to_segment(Point::new(-3.0, 4.0), &horizontal), 25.0);

        let diagonal = seg(0.0, 0.0, 10.0, 10.0);
        let d = distance_sq_to_segment(Point::new(0.0, 10.0), &diagonal);
        assert!((d - 50.0).abs() < 1e-3);
        let beyond = distance_sq_to_segment(Point::new(13.0, 14.0), &diagonal);
        assert!((beyond - 25.0).abs() < 1e-3);
    }

    #[test]
    fn test_iou_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let b = BoundingBox::new(50.0, 50.0, 100.0, 100.0);
        assert!((iou(&a, &b) - 2500.0 / 17500.0).abs() < 0.01);
        assert_eq!(iou(&a, &BoundingBox::new(200.0, 0.0, 10.0, 10.0)), 0.0);
        assert_eq!(iou(&a, &a), 1.0);
    }
}
