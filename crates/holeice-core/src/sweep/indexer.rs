use super::grid::ParameterGrid;
use crate::domain::{ParameterSet, SweepError};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// No task index: every parameter set runs in this process, in order.
    Local,
    /// One array-job task runs exactly one parameter set.
    ClusterTask { index: usize },
}

impl RunMode {
    pub fn from_task_index(index: Option<usize>) -> Self {
        match index {
            Some(index) => Self::ClusterTask { index },
            None => Self::Local,
        }
    }

    pub const fn is_cluster_task(self) -> bool {
        matches!(self, Self::ClusterTask { .. })
    }
}

impl Display for RunMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::ClusterTask { index } => write!(f, "cluster task {}", index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexerError {
    #[error("job index {index} is out of range; the sweep has {len} parameter sets (valid: 1..={len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("task index variable {variable}='{raw}' is not a positive integer")]
    InvalidTaskIndex { variable: String, raw: String },
}

impl From<IndexerError> for SweepError {
    fn from(error: IndexerError) -> Self {
        let placeholder = match error {
            IndexerError::IndexOutOfRange { .. } => "CONFIG.INDEX_OUT_OF_RANGE",
            IndexerError::InvalidTaskIndex { .. } => "CONFIG.TASK_INDEX",
        };
        SweepError::configuration(placeholder, error.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedSet<'g> {
    pub index: usize,
    pub parameters: &'g ParameterSet,
}

/// Maps array-job task indices onto grid entries.
pub struct JobIndexer<'g> {
    grid: &'g ParameterGrid,
}

impl<'g> JobIndexer<'g> {
    pub fn new(grid: &'g ParameterGrid) -> Self {
        Self { grid }
    }

    pub fn at(&self, index: usize) -> Result<&'g ParameterSet, IndexerError> {
        self.grid
            .get(index)
            .ok_or(IndexerError::IndexOutOfRange {
                index,
                len: self.grid.len(),
            })
    }

    pub fn select(&self, mode: RunMode) -> Result<Vec<SelectedSet<'g>>, IndexerError> {
        match mode {
            RunMode::Local => Ok(self
                .grid
                .iter()
                .map(|(index, parameters)| SelectedSet { index, parameters })
                .collect()),
            RunMode::ClusterTask { index } => {
                let parameters = self.at(index)?;
                Ok(vec![SelectedSet { index, parameters }])
            }
        }
    }
}

/// Parses the scheduler's task index. An empty value counts as absent.
pub fn parse_task_index(variable: &str, raw: Option<&str>) -> Result<Option<usize>, IndexerError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    // SGE exports "undefined" for non-array jobs.
    if raw.eq_ignore_ascii_case("undefined") {
        return Ok(None);
    }
    raw.parse::<usize>()
        .map(Some)
        .map_err(|_| IndexerError::InvalidTaskIndex {
            variable: variable.to_string(),
            raw: raw.to_string(),
        })
}
