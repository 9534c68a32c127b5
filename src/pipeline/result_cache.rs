// src/pipeline/result_cache.rs
//
// Expensive-detector results keyed by frame index.
//
// Contract:
//   - key absent        → frame not analyzed yet
//   - key → empty Vec   → analyzed, nothing found (or the detector failed)
//   - at most one analyzer call per frame index while the entry lives
//   - entries leave only through `prune`, driven by frame-buffer eviction
//
// There is no ageing or capacity policy here on purpose: the frame buffer
// is the only thing that decides when an entry may go.

use crate::analyzer::Analyzer;
use crate::types::{Frame, ItemId};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Served from the cache
    Hit,
    /// Analyzer called and produced a result
    Analyzed,
    /// Analyzer errored or returned nothing; cached as empty
    Failed,
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: BTreeMap<i64, Vec<ItemId>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_analyze<A: Analyzer + ?Sized>(
        &mut self,
        frame: &Frame,
        categories: &[String],
        analyzer: &mut A,
    ) -> (Lookup, &[ItemId]) {
        if self.entries.contains_key(&frame.index) {
            return (Lookup::Hit, self.entries[&frame.index].as_slice());
        }

        let (lookup, results) = match analyzer.analyze(frame, categories) {
            Ok(Some(results)) => (Lookup::Analyzed, results),
            Ok(None) => {
                warn!("analyzer returned no result for frame {}", frame.index);
                (Lookup::Failed, Vec::new())
            }
            Err(e) => {
                warn!("analyzer failed on frame {}: {:#}", frame.index, e);
                (Lookup::Failed, Vec::new())
            }
        };
        debug!(
            "frame {} analyzed: {} detection(s)",
            frame.index,
            results.len()
        );

        let entry = self.entries.entry(frame.index).or_insert(results);
        (lookup, entry.as_slice())
    }

    pub fn get(&self, frame_index: i64) -> Option<&[ItemId]> {
        self.entries.get(&frame_index).map(|v| v.as_slice())
    }

    pub fn contains(&self, frame_index: i64) -> bool {
        self.entries.contains_key(&frame_index)
    }

    /// Drop the entry of a frame that left the look-back window
    pub fn prune(&mut self, frame_index: i64) -> bool {
        self.entries.remove(&frame_index).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached frames in ascending frame order
    pub fn iter(&self) -> impl Iterator<Item = (i64, &[ItemId])> {
        self.entries.iter().map(|(k, v)| (*k, v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ScriptedAnalyzer;
    use crate::types::BoundingBox;

    fn frame(index: i64) -> Frame {
        Frame::new(index, "cam", Vec::new())
    }

    #[test]
    fn test_second_lookup_is_served_from_cache() {
        let mut analyzer = ScriptedAnalyzer::new();
        analyzer.set(
            3,
            vec![ItemId::new(BoundingBox::new(1.0, 2.0, 3.0, 4.0), "car", 0.7)],
        );
        let mut cache = ResultCache::new();

        let (first, results) = cache.get_or_analyze(&frame(3), &[], &mut analyzer);
        assert_eq!(first, Lookup::Analyzed);
        let first_results = results.to_vec();

        let (second, results) = cache.get_or_analyze(&frame(3), &[], &mut analyzer);
        assert_eq!(second, Lookup::Hit);
        assert_eq!(results, first_results.as_slice());
        assert_eq!(analyzer.call_count(3), 1);
    }

    #[test]
    fn test_failure_cached_as_empty() {
        let mut analyzer = ScriptedAnalyzer::new();
        analyzer.set_failure(8);
        let mut cache = ResultCache::new();

        let (lookup, results) = cache.get_or_analyze(&frame(8), &[], &mut analyzer);
        assert_eq!(lookup, Lookup::Failed);
        assert!(results.is_empty());
        assert!(cache.contains(8));

        let (lookup, _) = cache.get_or_analyze(&frame(8), &[], &mut analyzer);
        assert_eq!(lookup, Lookup::Hit);
        assert_eq!(analyzer.call_count(8), 1);
    }

    #[test]
    fn test_prune_forces_fresh_call() {
        let mut analyzer = ScriptedAnalyzer::new();
        let mut cache = ResultCache::new();
        cache.get_or_analyze(&frame(1), &[], &mut analyzer);
        assert!(cache.prune(1));
        assert!(!cache.prune(1));
        assert!(!cache.contains(1));

        cache.get_or_analyze(&frame(1), &[], &mut analyzer);
        assert_eq!(analyzer.call_count(1), 2);
    }

    #[test]
    fn test_iter_is_in_frame_order() {
        let mut analyzer = ScriptedAnalyzer::new();
        let mut cache = ResultCache::new();
        for i in [9, 2, 5, 4] {
            cache.get_or_analyze(&frame(i), &[], &mut analyzer);
        }
        let keys: Vec<i64> = cache.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![2, 4, 5, 9]);
        assert_eq!(cache.len(), 4);
    }
}
