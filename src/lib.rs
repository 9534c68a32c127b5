// src/lib.rs
//
// Confirmation core for line-crossing triggers: a bounded look-back window
// of frames, a per-frame result cache in front of an expensive detector, and
// the probe strategies that decide which buffered frame to analyze next.

pub mod analysis;
pub mod analyzer;
pub mod config;
pub mod frame_buffer;
pub mod geometry;
pub mod pipeline;
pub mod replay;
pub mod types;

pub use analyzer::{Analyzer, ScriptedAnalyzer};
pub use frame_buffer::FrameBuffer;
pub use pipeline::{ConfirmationPipeline, PipelineEvent, StepOutcome, StepState};
pub use types::{BoundingBox, Config, Frame, FramedItem, ItemId, LineSegment, LineTrigger, Point};
