// src/pipeline/metrics.rs
//
// Counters for the confirmation pipeline. Clones share the same atomics, so
// a handle can be read from another thread while the scheduler runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_buffered: Arc<AtomicU64>,
    pub frames_evicted: Arc<AtomicU64>,
    pub cache_pruned: Arc<AtomicU64>,
    pub analyzer_calls: Arc<AtomicU64>,
    pub analyzer_failures: Arc<AtomicU64>,
    pub cache_hits: Arc<AtomicU64>,
    pub probes: Arc<AtomicU64>,
    pub candidates_confirmed: Arc<AtomicU64>,
    pub searches_exhausted: Arc<AtomicU64>,
    pub searches_abandoned: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_buffered: Arc::new(AtomicU64::new(0)),
            frames_evicted: Arc::new(AtomicU64::new(0)),
            cache_pruned: Arc::new(AtomicU64::new(0)),
            analyzer_calls: Arc::new(AtomicU64::new(0)),
            analyzer_failures: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            probes: Arc::new(AtomicU64::new(0)),
            candidates_confirmed: Arc::new(AtomicU64::new(0)),
            searches_exhausted: Arc::new(AtomicU64::new(0)),
            searches_abandoned: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Expensive-detector calls per buffered frame: the number the sparse
    /// search exists to keep low
    pub fn analyzer_calls_per_frame(&self) -> f64 {
        let frames = self.frames_buffered.load(Ordering::Relaxed);
        if frames > 0 {
            self.analyzer_calls.load(Ordering::Relaxed) as f64 / frames as f64
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_buffered: self.frames_buffered.load(Ordering::Relaxed),
            frames_evicted: self.frames_evicted.load(Ordering::Relaxed),
            cache_pruned: self.cache_pruned.load(Ordering::Relaxed),
            analyzer_calls: self.analyzer_calls.load(Ordering::Relaxed),
            analyzer_failures: self.analyzer_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
            candidates_confirmed: self.candidates_confirmed.load(Ordering::Relaxed),
            searches_exhausted: self.searches_exhausted.load(Ordering::Relaxed),
            searches_abandoned: self.searches_abandoned.load(Ordering::Relaxed),
            analyzer_calls_per_frame: self.analyzer_calls_per_frame(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_buffered: u64,
    pub frames_evicted: u64,
    pub cache_pruned: u64,
    pub analyzer_calls: u64,
    pub analyzer_failures: u64,
    pub cache_hits: u64,
    pub probes: u64,
    pub candidates_confirmed: u64,
    pub searches_exhausted: u64,
    pub searches_abandoned: u64,
    pub analyzer_calls_per_frame: f64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = PipelineMetrics::new();
        let handle = metrics.clone();
        for _ in 0..4 {
            metrics.inc(&metrics.frames_buffered);
        }
        handle.inc(&handle.analyzer_calls);

        let summary = metrics.summary();
        assert_eq!(summary.frames_buffered, 4);
        assert_eq!(summary.analyzer_calls, 1);
        assert!((summary.analyzer_calls_per_frame - 0.25).abs() < 1e-9);
    }
}
