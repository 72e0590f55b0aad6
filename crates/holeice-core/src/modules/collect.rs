use super::dispatch::staged_log_paths;
use super::helpers::{
    build_glob_set, collect_relative_files, expand_path_pattern, is_path_pattern, move_path,
};
use crate::common::SweepConfig;
use crate::common::constants::DEFAULT_RECORD_FILE;
use crate::domain::{Job, SweepError};
use globset::GlobSet;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectConfig {
    /// Directory the simulator leaves its results in; its entries are moved
    /// into the job's result directory. A glob such as `results/*/*` moves
    /// every match instead.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Glob patterns, relative to the result directory, of intermediate
    /// artifacts deleted after the move (raw detector frames and the like).
    #[serde(default)]
    pub remove_patterns: Vec<String>,
    #[serde(default)]
    pub expected_files: Vec<String>,
    /// Configuration record the job's parameters are merged into.
    #[serde(default = "default_record_file")]
    pub record_file: String,
}

fn default_record_file() -> String {
    DEFAULT_RECORD_FILE.to_string()
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            remove_patterns: Vec::new(),
            expected_files: Vec::new(),
            record_file: default_record_file(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectError {
    #[error("expected file '{}' is missing", path.display())]
    MissingFile { path: PathBuf },
    #[error("failed to move '{}' to '{}': {message}", from.display(), to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },
    #[error("failed to read '{}': {message}", path.display())]
    Read { path: PathBuf, message: String },
    #[error("failed to remove '{}': {message}", path.display())]
    Remove { path: PathBuf, message: String },
    #[error("failed to write record '{}': {message}", path.display())]
    WriteRecord { path: PathBuf, message: String },
    #[error("invalid removal pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl From<CollectError> for SweepError {
    fn from(error: CollectError) -> Self {
        let message = error.to_string();
        match error {
            CollectError::MissingFile { .. } => SweepError::io_system("IO.COLLECT_MISSING", message),
            CollectError::InvalidPattern { .. } => {
                SweepError::configuration("CONFIG.COLLECT_PATTERN", message)
            }
            CollectError::Move { .. } => SweepError::io_system("IO.COLLECT_MOVE", message),
            CollectError::Read { .. } | CollectError::Remove { .. } => {
                SweepError::io_system("IO.COLLECT_FILESYSTEM", message)
            }
            CollectError::WriteRecord { .. } => SweepError::io_system("IO.COLLECT_RECORD", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectReport {
    pub moved_entries: usize,
    pub removed_files: usize,
    pub record_path: PathBuf,
}

/// Moves a dispatched job's output into its result directory.
///
/// Only presence is checked, never content.
pub struct ResultCollector<'a> {
    config: &'a SweepConfig,
    removals: GlobSet,
}

impl<'a> ResultCollector<'a> {
    pub fn new(config: &'a SweepConfig) -> Result<Self, CollectError> {
        let removals = build_glob_set(&config.collect.remove_patterns).map_err(|source| {
            CollectError::InvalidPattern {
                pattern: config.collect.remove_patterns.join(","),
                message: source.to_string(),
            }
        })?;
        Ok(Self { config, removals })
    }

    pub fn collect(&self, job: &Job) -> Result<CollectReport, CollectError> {
        let result_dir = &job.result_dir;
        let mut report = CollectReport::default();

        let (stdout_log, stderr_log) =
            staged_log_paths(&self.config.staging_dir, &self.config.simulation.log_name);
        ensure_file(&stdout_log)?;
        for log in [&stdout_log, &stderr_log] {
            if log.exists() {
                move_into(log, result_dir)?;
                report.moved_entries += 1;
            }
        }

        if let Some(output_dir) = &self.config.collect.output_dir {
            let sources = if is_path_pattern(output_dir) {
                pattern_matches(output_dir)?
            } else {
                directory_entries(output_dir)?
            };
            for source in &sources {
                move_into(source, result_dir)?;
            }
            report.moved_entries += sources.len();
        }

        report.removed_files = self.remove_intermediate_files(result_dir)?;

        for expected in &self.config.collect.expected_files {
            ensure_file(&result_dir.join(expected))?;
        }

        report.record_path = result_dir.join(&self.config.collect.record_file);
        merge_configuration_record(&report.record_path, job)?;

        info!(
            moved = report.moved_entries,
            removed = report.removed_files,
            "Collected results into {}",
            result_dir.display()
        );
        Ok(report)
    }

    fn remove_intermediate_files(&self, result_dir: &Path) -> Result<usize, CollectError> {
        if self.removals.is_empty() {
            return Ok(0);
        }
        let files = collect_relative_files(result_dir)
            .map_err(|source| CollectError::Read {
                path: result_dir.to_path_buf(),
                message: source.to_string(),
            })?
            .unwrap_or_default();

        let mut removed = 0;
        for relative in files.iter().filter(|path| self.removals.is_match(path.as_str())) {
            let path = result_dir.join(relative);
            fs::remove_file(&path).map_err(|source| CollectError::Remove {
                path: path.clone(),
                message: source.to_string(),
            })?;
            removed += 1;
        }
        Ok(removed)
    }
}

pub fn ensure_file(path: &Path) -> Result<(), CollectError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CollectError::MissingFile {
            path: path.to_path_buf(),
        })
    }
}

fn directory_entries(dir: &Path) -> Result<Vec<PathBuf>, CollectError> {
    if !dir.is_dir() {
        return Err(CollectError::MissingFile {
            path: dir.to_path_buf(),
        });
    }
    let read_error = |source: std::io::Error| CollectError::Read {
        path: dir.to_path_buf(),
        message: source.to_string(),
    };
    fs::read_dir(dir)
        .map_err(read_error)?
        .map(|entry| entry.map(|entry| entry.path()).map_err(read_error))
        .collect()
}

fn pattern_matches(pattern: &Path) -> Result<Vec<PathBuf>, CollectError> {
    let matches = expand_path_pattern(pattern).map_err(|source| CollectError::Read {
        path: pattern.to_path_buf(),
        message: source.to_string(),
    })?;
    if matches.is_empty() {
        return Err(CollectError::MissingFile {
            path: pattern.to_path_buf(),
        });
    }
    Ok(matches)
}

fn move_into(source: &Path, dir: &Path) -> Result<(), CollectError> {
    let Some(name) = source.file_name() else {
        return Ok(());
    };
    let destination = dir.join(name);
    move_path(source, &destination).map_err(|error| CollectError::Move {
        from: source.to_path_buf(),
        to: destination,
        message: error.to_string(),
    })
}

/// Writes the job's configuration snapshot into the record at `path`.
///
/// Keys written by the simulator are kept; parameter keys are overwritten so
/// the record always names the parameter set that produced it. A record that
/// exists but is not a JSON object is left untouched and reported.
pub fn merge_configuration_record(path: &Path, job: &Job) -> Result<(), CollectError> {
    let mut record = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!(
                    "Record {} is not a JSON object; leaving it as written by the simulator.",
                    path.display()
                );
                return Ok(());
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(error) => {
            return Err(CollectError::Read {
                path: path.to_path_buf(),
                message: error.to_string(),
            });
        }
    };

    for (key, value) in job.configuration_snapshot() {
        record.insert(key, value);
    }

    let content = serde_json::to_string_pretty(&Value::Object(record)).map_err(|source| {
        CollectError::WriteRecord {
            path: path.to_path_buf(),
            message: source.to_string(),
        }
    })?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| CollectError::WriteRecord {
            path: path.to_path_buf(),
            message: source.to_string(),
        })?;
    }
    fs::write(path, content).map_err(|source| CollectError::WriteRecord {
        path: path.to_path_buf(),
        message: source.to_string(),
    })
}
