//! Reduction of completed result directories into aggregate tables.
//!
//! Every root is walked recursively and each configuration record matching
//! `record_path` contributes one row: the swept parameter values plus the
//! columns of the first entry of the statistic mapping. Anything that does
//! not yield a complete row is dropped with a warning and listed in the
//! summary; aggregation itself only fails on I/O errors while writing.

mod plot;
mod record;
mod table;

pub use plot::{PlotConfig, plot_group, render_surface_script};
pub use record::{DropReason, ParsedRecord, parse_record};
pub use table::{AggregateRow, AggregateTable, DroppedRecord, TableGroup};

use super::helpers::{build_glob_set, collect_relative_files};
use super::stage::StageError;
use super::traits::StageRunner;
use crate::common::SweepConfig;
use crate::common::constants::{DEFAULT_RECORD_GLOB, DEFAULT_STATISTIC_KEY};
use crate::domain::{ParameterValue, SweepError};
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SUMMARY_FILE_NAME: &str = "aggregate-summary.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateConfig {
    /// Glob, relative to each result root, locating configuration records.
    #[serde(default = "default_record_path")]
    pub record_path: String,
    /// Key of the nested results mapping inside each record.
    #[serde(default = "default_statistic")]
    pub statistic: String,
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Column minimised when reporting the best parameters; defaults to the
    /// first statistic column.
    #[serde(default)]
    pub best_by: Option<String>,
    #[serde(default)]
    pub plot: Option<PlotConfig>,
}

fn default_record_path() -> String {
    DEFAULT_RECORD_GLOB.to_string()
}

fn default_statistic() -> String {
    DEFAULT_STATISTIC_KEY.to_string()
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            record_path: default_record_path(),
            statistic: default_statistic(),
            group_by: Vec::new(),
            best_by: None,
            plot: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    #[error("invalid record glob '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("failed to scan result root '{}': {message}", path.display())]
    Scan { path: PathBuf, message: String },
    #[error("failed to write '{}': {message}", path.display())]
    Write { path: PathBuf, message: String },
    #[error("failed to write table '{}': {message}", path.display())]
    Csv { path: PathBuf, message: String },
    #[error("aggregate table has no column '{name}'")]
    UnknownColumn { name: String },
    #[error(transparent)]
    Stage(#[from] StageError),
}

impl From<AggregateError> for SweepError {
    fn from(error: AggregateError) -> Self {
        let message = error.to_string();
        match error {
            AggregateError::InvalidPattern { .. } | AggregateError::UnknownColumn { .. } => {
                SweepError::configuration("CONFIG.AGGREGATE", message)
            }
            AggregateError::Scan { .. } => SweepError::io_system("IO.AGGREGATE_SCAN", message),
            AggregateError::Write { .. } | AggregateError::Csv { .. } => {
                SweepError::io_system("IO.AGGREGATE_WRITE", message)
            }
            AggregateError::Stage(source) => source.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestFit {
    pub column: String,
    pub value: f64,
    pub parameters: Map<String, Value>,
    pub source: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub rows: usize,
    pub table: PathBuf,
    pub plot: Option<PathBuf>,
    pub best: Option<BestFit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateSummary {
    pub rows: usize,
    pub columns: Vec<String>,
    pub best: Option<BestFit>,
    pub groups: Vec<GroupSummary>,
    pub dropped: Vec<DroppedRecord>,
}

/// Parameter name and how it appears in directory and group names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterColumn {
    pub name: String,
    pub label: String,
    pub suffix: String,
}

pub struct ResultAggregator<'a> {
    config: &'a AggregateConfig,
    parameters: Vec<ParameterColumn>,
    records: GlobSet,
}

impl<'a> ResultAggregator<'a> {
    pub fn new(
        config: &'a AggregateConfig,
        parameters: Vec<ParameterColumn>,
    ) -> Result<Self, AggregateError> {
        let records = build_glob_set(std::slice::from_ref(&config.record_path)).map_err(
            |error| AggregateError::InvalidPattern {
                pattern: config.record_path.clone(),
                message: error.to_string(),
            },
        )?;
        Ok(Self {
            config,
            parameters,
            records,
        })
    }

    /// Aggregator over the parameters of `sweep`'s grid.
    pub fn for_sweep(
        sweep: &'a SweepConfig,
        parameter_names: &[String],
    ) -> Result<Self, AggregateError> {
        let parameters = parameter_names
            .iter()
            .map(|name| ParameterColumn {
                name: name.clone(),
                label: sweep.label_for(name).to_string(),
                suffix: sweep.suffix_for(name).to_string(),
            })
            .collect();
        Self::new(&sweep.aggregate, parameters)
    }

    pub fn scan(&self, roots: &[PathBuf]) -> Result<AggregateTable, AggregateError> {
        let names: Vec<String> = self.parameters.iter().map(|column| column.name.clone()).collect();
        let mut table = AggregateTable::new(names.clone());

        for root in roots {
            let Some(files) = collect_relative_files(root).map_err(|source| AggregateError::Scan {
                path: root.clone(),
                message: source.to_string(),
            })?
            else {
                info!("Result root {} does not exist; skipping.", root.display());
                continue;
            };

            for relative in files.iter().filter(|path| self.records.is_match(path.as_str())) {
                let path = root.join(relative);
                let content = match fs::read_to_string(&path) {
                    Ok(content) => content,
                    Err(error) => {
                        table.drop_record(path, DropReason::Unreadable(error.to_string()));
                        continue;
                    }
                };
                match parse_record(&content, &names, &self.config.statistic) {
                    Ok(record) => table.push_record(path, record),
                    Err(reason) => table.drop_record(path, reason),
                }
            }
        }

        info!(
            rows = table.len(),
            dropped = table.dropped().len(),
            "Aggregated {} records",
            table.len() + table.dropped().len()
        );
        Ok(table)
    }

    /// Writes one table per group into `output_dir`, plots them when a plot
    /// is configured, and writes the JSON summary.
    pub fn write_outputs<R>(
        &self,
        table: &AggregateTable,
        output_dir: &Path,
        plotter: Option<&R>,
    ) -> Result<AggregateSummary, AggregateError>
    where
        R: StageRunner + ?Sized,
    {
        fs::create_dir_all(output_dir).map_err(|source| AggregateError::Write {
            path: output_dir.to_path_buf(),
            message: source.to_string(),
        })?;

        let best_column = self
            .config
            .best_by
            .clone()
            .or_else(|| table.statistic_columns().first().cloned());
        let best_of = |table: &AggregateTable| -> Option<BestFit> {
            let column = best_column.as_deref()?;
            let row = table.best_row(column)?;
            Some(BestFit {
                column: column.to_string(),
                value: table.value(row, column)?,
                parameters: table.parameters_of(row),
                source: row.source.clone(),
            })
        };

        let mut groups = Vec::new();
        for group in table.group_by(&self.config.group_by) {
            let name = self.group_name(&group.key);
            let csv_path = output_dir.join(format!("{name}.csv"));
            group.table.write_csv(&csv_path)?;

            let plot = match (&self.config.plot, plotter) {
                (Some(plot), Some(runner)) => {
                    match plot_group(runner, plot, &group.table, &csv_path, &name) {
                        Ok(image) => Some(image),
                        Err(AggregateError::Stage(error)) => {
                            warn!("Plotting {} failed: {}", name, error);
                            None
                        }
                        Err(error) => return Err(error),
                    }
                }
                _ => None,
            };

            let best = best_of(&group.table);
            if let Some(best) = &best {
                info!(
                    "{}: best {} = {} at {}",
                    name,
                    best.column,
                    best.value,
                    describe(&best.parameters)
                );
            }
            groups.push(GroupSummary {
                name,
                rows: group.table.len(),
                table: csv_path,
                plot,
                best,
            });
        }

        if table.is_empty() {
            warn!("No complete records found; the aggregate table is empty.");
        }

        let summary = AggregateSummary {
            rows: table.len(),
            columns: table.columns(),
            best: best_of(table),
            groups,
            dropped: table.dropped().to_vec(),
        };
        let summary_path = output_dir.join(SUMMARY_FILE_NAME);
        let content =
            serde_json::to_string_pretty(&summary).map_err(|source| AggregateError::Write {
                path: summary_path.clone(),
                message: source.to_string(),
            })?;
        fs::write(&summary_path, content).map_err(|source| AggregateError::Write {
            path: summary_path,
            message: source.to_string(),
        })?;
        Ok(summary)
    }

    /// `<label><value><suffix>` joined by `_`, or `all` without grouping.
    fn group_name(&self, key: &[(String, ParameterValue)]) -> String {
        if key.is_empty() {
            return "all".to_string();
        }
        key.iter()
            .map(|(name, value)| {
                match self.parameters.iter().find(|column| column.name == *name) {
                    Some(column) => format!("{}{}{}", column.label, value, column.suffix),
                    None => format!("{name}{value}"),
                }
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

fn describe(parameters: &Map<String, Value>) -> String {
    parameters
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}
