// src/types.rs
//
// Shared data model: frames, boxes, line segments, the escalating
// identification history of an item, and the YAML configuration tree.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub chooser: ChooserConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Look-back window size (BufferDepth)
    pub depth: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { depth: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Max frames back from the latest frame a search may probe
    pub search_range: usize,
    /// Minimum line overlap for a detection to count as a (weak) match
    pub overlap_threshold: f32,
    /// Overlap at or above which a confident detection confirms immediately
    pub large_overlap_threshold: f32,
    /// Detector confidence below which a match needs corroboration
    pub low_confidence_threshold: f32,
    /// Distinct frames of weak matches required to confirm
    pub corroborating_matches: usize,
    /// IoU needed to merge a result into an existing item of the same frame
    pub merge_iou_threshold: f32,
    /// Category set handed to the analyzer
    pub categories: Vec<String>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            search_range: 30,
            overlap_threshold: 0.5,
            large_overlap_threshold: 0.75,
            low_confidence_threshold: 0.5,
            corroborating_matches: 2,
            merge_iou_threshold: 0.3,
            categories: vec![
                "car".to_string(),
                "truck".to_string(),
                "bus".to_string(),
                "person".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChooserStrategy {
    /// Fixed-stride backward walk
    Stride,
    /// Bisection with path-aware crossing localization
    Sparse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChooserConfig {
    pub strategy: ChooserStrategy,
    pub stride: usize,
    /// Paths scoring below this are treated as stationary clutter
    pub jitter_threshold: f32,
    /// Cached frames in the window before path-aware mode kicks in
    pub path_aware_min_samples: usize,
    /// Give up when longest_path * ratio < cached frames and nothing moves
    pub give_up_ratio: usize,
}

impl Default for ChooserConfig {
    fn default() -> Self {
        Self {
            strategy: ChooserStrategy::Sparse,
            stride: 4,
            jitter_threshold: 2.0,
            path_aware_min_samples: 6,
            give_up_ratio: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub input_dir: String,
    pub output_dir: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            input_dir: "recordings".to_string(),
            output_dir: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// GEOMETRY PRIMITIVES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Inclusive containment, so points on an edge count as inside
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LineSegment {
    pub p1: Point,
    pub p2: Point,
}

impl LineSegment {
    pub fn new(p1: Point, p2: Point) -> Self {
        Self { p1, p2 }
    }

    pub fn length(&self) -> f32 {
        ((self.p2.x - self.p1.x).powi(2) + (self.p2.y - self.p1.y).powi(2)).sqrt()
    }

    pub fn is_degenerate(&self) -> bool {
        self.length() <= f32::EPSILON
    }
}

// ============================================================================
// FRAMES AND IDENTIFICATIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct Frame {
    pub index: i64,
    pub source_name: String,
    /// Opaque decoded pixels; never inspected by the core
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(index: i64, source_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            index,
            source_name: source_name.into(),
            data,
        }
    }
}

/// Line context attached to identifications made at a trigger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineTrigger {
    pub line_id: usize,
    pub line_name: String,
    /// true = unconfirmed candidate awaiting the expensive detector
    pub further_analysis_triggered: bool,
    pub segment: LineSegment,
}

/// One identification record. With `trigger` set it is a line-triggered
/// identification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemId {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub class_id: i32,
    #[serde(default)]
    pub track_id: i64,
    /// 0 = no identification attempted
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<LineTrigger>,
}

impl ItemId {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            class_id: 0,
            track_id: 0,
            confidence,
            method: String::new(),
            trigger: None,
        }
    }

    pub fn is_pending_trigger(&self) -> bool {
        self.trigger
            .as_ref()
            .map(|t| t.further_analysis_triggered)
            .unwrap_or(false)
    }
}

/// Identification history of one physical item in one frame, oldest first.
/// The last entry is the current best knowledge.
#[derive(Debug, Clone)]
pub struct FramedItem {
    pub frame: Arc<Frame>,
    pub item_ids: Vec<ItemId>,
}

impl FramedItem {
    pub fn new(frame: Arc<Frame>, first: ItemId) -> Self {
        Self {
            frame,
            item_ids: vec![first],
        }
    }

    pub fn frame_index(&self) -> i64 {
        self.frame.index
    }

    pub fn latest(&self) -> Option<&ItemId> {
        self.item_ids.last()
    }

    pub fn push(&mut self, item_id: ItemId) {
        self.item_ids.push(item_id);
    }
}

/// Serializable view of a `FramedItem` for output writers.
#[derive(Debug, Clone, Serialize)]
pub struct FramedItemRecord {
    pub frame_index: i64,
    pub source_name: String,
    pub item_ids: Vec<ItemId>,
}

impl From<&FramedItem> for FramedItemRecord {
    fn from(item: &FramedItem) -> Self {
        Self {
            frame_index: item.frame.index,
            source_name: item.frame.source_name.clone(),
            item_ids: item.item_ids.clone(),
        }
    }
}
