use super::AggregateError;
use super::record::{DropReason, ParsedRecord};
use crate::domain::ParameterValue;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub source: PathBuf,
    pub parameters: Vec<ParameterValue>,
    pub statistics: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedRecord {
    pub path: PathBuf,
    pub reason: String,
}

/// Swept parameters plus extracted statistics, one row per completed job.
///
/// The statistic column set is fixed by the first accepted row; later rows
/// with a different set are dropped.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AggregateTable {
    parameter_columns: Vec<String>,
    statistic_columns: Vec<String>,
    rows: Vec<AggregateRow>,
    dropped: Vec<DroppedRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableGroup {
    pub key: Vec<(String, ParameterValue)>,
    pub table: AggregateTable,
}

impl AggregateTable {
    pub fn new(parameter_columns: Vec<String>) -> Self {
        Self {
            parameter_columns,
            ..Self::default()
        }
    }

    pub fn parameter_columns(&self) -> &[String] {
        &self.parameter_columns
    }

    pub fn statistic_columns(&self) -> &[String] {
        &self.statistic_columns
    }

    /// Parameter columns followed by statistic columns.
    pub fn columns(&self) -> Vec<String> {
        self.parameter_columns
            .iter()
            .chain(self.statistic_columns.iter())
            .cloned()
            .collect()
    }

    pub fn rows(&self) -> &[AggregateRow] {
        &self.rows
    }

    pub fn dropped(&self) -> &[DroppedRecord] {
        &self.dropped
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_record(&mut self, source: PathBuf, record: ParsedRecord) {
        let found: Vec<String> = record
            .statistics
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        if self.rows.is_empty() && self.statistic_columns.is_empty() {
            self.statistic_columns = found;
        } else if found != self.statistic_columns {
            self.drop_record(
                source,
                DropReason::ColumnMismatch {
                    expected: self.statistic_columns.clone(),
                    found,
                },
            );
            return;
        }

        self.rows.push(AggregateRow {
            source,
            parameters: record.parameters,
            statistics: record.statistics.into_iter().map(|(_, value)| value).collect(),
        });
    }

    pub fn drop_record(&mut self, path: PathBuf, reason: DropReason) {
        warn!("Dropping record {}: {}", path.display(), reason);
        self.dropped.push(DroppedRecord {
            path,
            reason: reason.to_string(),
        });
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns().iter().position(|column| column == name)
    }

    /// Value of `column` in `row` as a float, parameters included.
    pub fn value(&self, row: &AggregateRow, column: &str) -> Option<f64> {
        if let Some(position) = self.parameter_columns.iter().position(|name| name == column) {
            return row.parameters.get(position).map(|value| value.as_f64());
        }
        self.statistic_columns
            .iter()
            .position(|name| name == column)
            .and_then(|position| row.statistics.get(position).copied())
    }

    /// Splits the rows by the values of `names`, in order of first
    /// appearance. Dropped records stay with the full table.
    pub fn group_by(&self, names: &[String]) -> Vec<TableGroup> {
        let positions: Vec<(String, usize)> = names
            .iter()
            .filter_map(|name| {
                self.parameter_columns
                    .iter()
                    .position(|column| column == name)
                    .map(|position| (name.clone(), position))
            })
            .collect();

        let mut groups: Vec<TableGroup> = Vec::new();
        for row in &self.rows {
            let key: Vec<(String, ParameterValue)> = positions
                .iter()
                .map(|(name, position)| (name.clone(), row.parameters[*position]))
                .collect();
            let group = match groups.iter_mut().position(|group| group.key == key) {
                Some(existing) => &mut groups[existing],
                None => {
                    groups.push(TableGroup {
                        key,
                        table: AggregateTable {
                            parameter_columns: self.parameter_columns.clone(),
                            statistic_columns: self.statistic_columns.clone(),
                            rows: Vec::new(),
                            dropped: Vec::new(),
                        },
                    });
                    let last = groups.len() - 1;
                    &mut groups[last]
                }
            };
            group.table.rows.push(row.clone());
        }
        groups
    }

    /// Row with the smallest value of a statistic column.
    pub fn best_row(&self, column: &str) -> Option<&AggregateRow> {
        let position = self.statistic_columns.iter().position(|name| name == column)?;
        self.rows
            .iter()
            .filter(|row| row.statistics[position].is_finite())
            .min_by(|left, right| left.statistics[position].total_cmp(&right.statistics[position]))
    }

    /// Parameter names mapped to the row's values.
    pub fn parameters_of(&self, row: &AggregateRow) -> Map<String, Value> {
        self.parameter_columns
            .iter()
            .zip(row.parameters.iter())
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }

    /// Space-separated table with a header row.
    pub fn write_csv(&self, path: &Path) -> Result<(), AggregateError> {
        let csv_error = |message: String| AggregateError::Csv {
            path: path.to_path_buf(),
            message,
        };
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .from_path(path)
            .map_err(|error| csv_error(error.to_string()))?;

        writer
            .write_record(self.columns())
            .map_err(|error| csv_error(error.to_string()))?;
        for row in &self.rows {
            let fields = row
                .parameters
                .iter()
                .map(ToString::to_string)
                .chain(row.statistics.iter().map(ToString::to_string));
            writer
                .write_record(fields)
                .map_err(|error| csv_error(error.to_string()))?;
        }
        writer.flush().map_err(|error| csv_error(error.to_string()))
    }
}
