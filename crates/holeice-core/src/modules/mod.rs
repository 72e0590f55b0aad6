pub mod aggregate;
pub mod cluster;
pub mod collect;
pub mod dispatch;
pub mod runner;
pub mod stage;

mod helpers;
mod traits;

pub use aggregate::{AggregateConfig, AggregateTable, ResultAggregator};
pub use cluster::{ClusterConfig, ClusterSubmission};
pub use collect::{CollectConfig, ResultCollector};
pub use dispatch::{DispatchOutcome, RunDispatcher};
pub use runner::{
    RunOptions, SweepReport, SweepRunner, render_aggregate_summary, render_human_summary,
};
pub use stage::{ProcessRunner, StageInvocation, StageOutcome, StageTemplate};
pub use traits::StageRunner;
