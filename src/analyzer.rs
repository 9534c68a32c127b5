// src/analyzer.rs
//
// Boundary to the expensive detector. The core only ever calls
// `analyze(frame, categories)`; model loading, batching and retry live on
// the other side of this trait.
//
// `ScriptedAnalyzer` serves recorded detections per frame index. The
// replay binary and the tests use it in place of a neural network.

use crate::types::{Frame, ItemId};
use anyhow::{anyhow, Result};
use std::collections::HashMap;

pub trait Analyzer {
    /// Detect objects of the given categories in `frame`.
    ///
    /// `Ok(None)` means the detector produced nothing usable. Callers treat
    /// it, and `Err`, as "zero detections". Results must be deterministic per
    /// frame for caching to be valid.
    fn analyze(&mut self, frame: &Frame, categories: &[String]) -> Result<Option<Vec<ItemId>>>;
}

impl<A: Analyzer + ?Sized> Analyzer for Box<A> {
    fn analyze(&mut self, frame: &Frame, categories: &[String]) -> Result<Option<Vec<ItemId>>> {
        (**self).analyze(frame, categories)
    }
}

/// Per-frame canned results. A frame mapped to `None` fails like a crashed
/// detector call; an unmapped frame yields no detections.
#[derive(Debug, Default)]
pub struct ScriptedAnalyzer {
    results: HashMap<i64, Option<Vec<ItemId>>>,
    calls: Vec<i64>,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, frame_index: i64, detections: Vec<ItemId>) {
        self.results.insert(frame_index, Some(detections));
    }

    pub fn set_failure(&mut self, frame_index: i64) {
        self.results.insert(frame_index, None);
    }

    /// Frame indices analyzed so far, in call order
    pub fn calls(&self) -> &[i64] {
        &self.calls
    }

    pub fn call_count(&self, frame_index: i64) -> usize {
        self.calls.iter().filter(|&&i| i == frame_index).count()
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze(&mut self, frame: &Frame, categories: &[String]) -> Result<Option<Vec<ItemId>>> {
        self.calls.push(frame.index);
        match self.results.get(&frame.index) {
            Some(Some(detections)) => Ok(Some(
                detections
                    .iter()
                    .filter(|d| categories.is_empty() || categories.contains(&d.label))
                    .cloned()
                    .collect(),
            )),
            Some(None) => Err(anyhow!("detector failed on frame {}", frame.index)),
            None => Ok(Some(Vec::new())),
        }
    }
}
