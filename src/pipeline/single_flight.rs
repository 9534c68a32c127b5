// src/pipeline/single_flight.rs
//
// Per-key single-flight gate for analyzers that are offloaded to worker
// threads. While a call for a key is in flight, every other caller of the
// same key blocks and receives the leader's result instead of issuing a
// duplicate expensive call.
//
// The scheduler itself stays single-threaded; this only matters when the
// same detector instance is shared across threads.

use crate::analyzer::Analyzer;
use crate::types::{Frame, ItemId};
use anyhow::{anyhow, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};

struct Flight<V> {
    result: Mutex<Option<V>>,
    done: Condvar,
}

pub struct SingleFlight<K, V> {
    in_flight: Mutex<HashMap<K, Arc<Flight<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `call` for `key` unless a call is already in flight, in which case
    /// wait for it and share its value.
    pub fn run<F: FnOnce() -> V>(&self, key: K, call: F) -> V {
        let (flight, leader) = {
            let mut map = self.in_flight.lock();
            match map.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let flight = Arc::new(Flight {
                        result: Mutex::new(None),
                        done: Condvar::new(),
                    });
                    map.insert(key.clone(), flight.clone());
                    (flight, true)
                }
            }
        };

        if leader {
            let value = call();
            *flight.result.lock() = Some(value.clone());
            self.in_flight.lock().remove(&key);
            flight.done.notify_all();
            return value;
        }

        let mut result = flight.result.lock();
        loop {
            if let Some(value) = result.as_ref() {
                return value.clone();
            }
            flight.done.wait(&mut result);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

type DetectFn = dyn Fn(&Frame, &[String]) -> Result<Option<Vec<ItemId>>> + Send + Sync;

/// Analyzer handle that can be cloned onto worker threads. Concurrent calls
/// for the same frame index share one detector invocation.
///
/// Errors are flattened to "no result" before sharing, since every waiter
/// needs its own copy.
#[derive(Clone)]
pub struct SingleFlightAnalyzer {
    detect: Arc<DetectFn>,
    gate: Arc<SingleFlight<i64, Option<Vec<ItemId>>>>,
}

impl SingleFlightAnalyzer {
    pub fn new<F>(detect: F) -> Self
    where
        F: Fn(&Frame, &[String]) -> Result<Option<Vec<ItemId>>> + Send + Sync + 'static,
    {
        Self {
            detect: Arc::new(detect),
            gate: Arc::new(SingleFlight::new()),
        }
    }
}

impl Analyzer for SingleFlightAnalyzer {
    fn analyze(&mut self, frame: &Frame, categories: &[String]) -> Result<Option<Vec<ItemId>>> {
        let shared = self.gate.run(frame.index, || match (self.detect)(frame, categories) {
            Ok(result) => result,
            Err(e) => {
                warn!("detector failed on frame {}: {:#}", frame.index, e);
                None
            }
        });
        debug!("frame {} served through single-flight gate", frame.index);
        match shared {
            Some(results) => Ok(Some(results)),
            None => Err(anyhow!("no detector result for frame {}", frame.index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_concurrent_callers_share_one_call() {
        let gate = Arc::new(SingleFlight::<i64, usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    gate.run(7, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(200));
                        42
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_sequential_calls_are_not_deduplicated() {
        let gate = SingleFlight::<i64, i64>::new();
        assert_eq!(gate.run(1, || 10), 10);
        assert_eq!(gate.run(1, || 20), 20);
    }

    #[test]
    fn test_analyzer_flattens_errors() {
        let mut analyzer = SingleFlightAnalyzer::new(|frame, _| {
            if frame.index == 2 {
                Err(anyhow!("boom"))
            } else {
                Ok(Some(vec![ItemId::new(
                    BoundingBox::new(0.0, 0.0, 5.0, 5.0),
                    "car",
                    0.8,
                )]))
            }
        });
        let ok = analyzer
            .analyze(&Frame::new(1, "cam", Vec::new()), &[])
            .unwrap();
        assert_eq!(ok.map(|r| r.len()), Some(1));
        assert!(analyzer
            .analyze(&Frame::new(2, "cam", Vec::new()), &[])
            .is_err());
    }
}
