// src/pipeline/mod.rs

pub mod candidate;
pub mod confirmation;
pub mod event_bus;
pub mod metrics;
pub mod result_cache;
pub mod single_flight;

pub use candidate::{CandidateKey, TriggerCandidate};
pub use confirmation::{ConfirmationPipeline, LineCount, StepOutcome, StepState};
pub use event_bus::{EventBus, PipelineEvent};
pub use metrics::{MetricsSummary, PipelineMetrics};
pub use result_cache::{Lookup, ResultCache};
pub use single_flight::{SingleFlight, SingleFlightAnalyzer};
