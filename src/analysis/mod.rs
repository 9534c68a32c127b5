// src/analysis/mod.rs
//
// Probe selection for confirmation searches.
//
//   index_chooser  → common contract + strategy enum
//   stride_chooser → fixed-stride backward walk
//   sparse_chooser → bisection order, then path-aware localization
//   path_tracker   → window snapshot, object paths, jitter, crossing rank

pub mod index_chooser;
pub mod path_tracker;
pub mod sparse_chooser;
pub mod stride_chooser;

pub use index_chooser::{CrossingEstimate, IndexChooser, IndexStrategy, ProbeWindow};
pub use path_tracker::{CrossingRank, ObjectPath, PathTable, WindowSnapshot};
pub use sparse_chooser::SparseChooser;
pub use stride_chooser::StrideChooser;
