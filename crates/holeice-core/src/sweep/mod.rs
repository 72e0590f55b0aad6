pub mod derived;
pub mod grid;
pub mod indexer;

pub use derived::{DerivedError, DerivedRule, compute_derived};
pub use grid::{Axis, GridError, ParameterGrid};
pub use indexer::{IndexerError, JobIndexer, RunMode, SelectedSet, parse_task_index};
