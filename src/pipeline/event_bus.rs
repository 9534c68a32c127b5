// src/pipeline/event_bus.rs
//
// Outcome events of the confirmation pipeline. The pipeline publishes,
// whoever drives it drains after each step.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    CandidateConfirmed {
        line_id: usize,
        line_name: String,
        trigger_frame: i64,
        confirmed_frame: i64,
        /// Interpolated crossing frame, or the probed frame for direct matches
        crossing_frame: f32,
        method: String,
        label: String,
        confidence: f32,
    },

    /// Search-range or window budget spent with candidates still pending
    SearchExhausted {
        latest_frame: i64,
        pending: usize,
        probes: usize,
    },

    /// Chooser gave up: nothing moving, treat as a false positive this step
    SearchAbandoned { latest_frame: i64, pending: usize },

    CandidateExpired { line_id: usize, trigger_frame: i64 },
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_bus_drops_oldest() {
        let mut bus = EventBus::new(2);
        for frame in 0..3 {
            bus.publish(PipelineEvent::SearchAbandoned {
                latest_frame: frame,
                pending: 1,
            });
        }
        assert_eq!(bus.pending_count(), 2);
        let drained = bus.drain();
        assert_eq!(
            drained[0],
            PipelineEvent::SearchAbandoned {
                latest_frame: 1,
                pending: 1
            }
        );
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let json = serde_json::to_string(&PipelineEvent::CandidateExpired {
            line_id: 3,
            trigger_frame: 40,
        })
        .unwrap();
        assert!(json.contains("\"event\":\"candidate_expired\""));
        assert!(json.contains("\"trigger_frame\":40"));
    }
}
