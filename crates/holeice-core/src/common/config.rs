//! Sweep configuration file.
//!
//! A sweep is described entirely by one JSON document: the axes (or explicit
//! points), derived quantities, fixed simulator arguments, the simulator
//! command template and the collection, aggregation and cluster settings.
//! Relative paths are resolved against the directory holding the file.

use super::constants::{
    DEFAULT_CLUSTER_RESULTS_DIR, DEFAULT_RESULTS_DIR, DEFAULT_STAGING_DIR,
};
use crate::domain::{ParameterValue, SweepError};
use crate::modules::aggregate::AggregateConfig;
use crate::modules::cluster::ClusterConfig;
use crate::modules::collect::CollectConfig;
use crate::modules::stage::{BindingError, StageTemplate};
use crate::sweep::derived::validate_rules;
use crate::sweep::{Axis, DerivedError, DerivedRule, GridError, ParameterGrid};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Placeholders bound for every job regardless of the configuration.
pub const BUILTIN_PLACEHOLDERS: [&str; 4] = ["index", "job_name", "result_dir", "staging_dir"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub axes: Vec<Axis>,
    #[serde(default)]
    pub points: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    pub derived: Vec<DerivedRule>,
    #[serde(default)]
    pub fixed: Map<String, Value>,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Further roots scanned by the aggregator, e.g. results copied back
    /// from cluster nodes.
    #[serde(default = "default_extra_result_roots")]
    pub extra_result_roots: Vec<PathBuf>,
    pub simulation: StageTemplate,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub aggregate: AggregateConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub prerequisites: PrerequisiteConfig,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RESULTS_DIR)
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STAGING_DIR)
}

fn default_extra_result_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(DEFAULT_CLUSTER_RESULTS_DIR)]
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read sweep configuration '{}': {message}", path.display())]
    Read { path: PathBuf, message: String },
    #[error("failed to parse sweep configuration '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("sweep configuration sets both 'axes' and 'points'; use one of them")]
    AxesAndPoints,
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Derived(#[from] DerivedError),
    #[error(transparent)]
    Template(#[from] BindingError),
    #[error("simulation program must not be empty")]
    EmptyProgram,
    #[error("argument placeholder '{{{name}}}' names no parameter, derived field or fixed value")]
    UnknownPlaceholder { name: String },
    #[error("aggregate.group_by names '{name}', which is not a sweep parameter")]
    UnknownGroupAxis { name: String },
    #[error("axis '{name}' is not configured")]
    UnknownAxis { name: String },
    #[error("invalid axis override '{raw}': {message}")]
    InvalidAxisOverride { raw: String, message: String },
    #[error("environment variable {name} must be set")]
    MissingEnv { name: String },
    #[error("path '{path}' from {name} does not exist")]
    MissingPath { name: String, path: String },
}

impl From<ConfigError> for SweepError {
    fn from(error: ConfigError) -> Self {
        let message = error.to_string();
        match error {
            ConfigError::Read { .. } => SweepError::io_system("IO.CONFIG_READ", message),
            ConfigError::Parse { .. } => SweepError::configuration("CONFIG.PARSE", message),
            ConfigError::Grid(source) => source.into(),
            ConfigError::Derived(source) => source.into(),
            ConfigError::Template(source) => source.into(),
            ConfigError::MissingEnv { .. } | ConfigError::MissingPath { .. } => {
                SweepError::configuration("CONFIG.PREREQUISITE", message)
            }
            ConfigError::AxesAndPoints
            | ConfigError::EmptyProgram
            | ConfigError::UnknownPlaceholder { .. }
            | ConfigError::UnknownGroupAxis { .. }
            | ConfigError::UnknownAxis { .. }
            | ConfigError::InvalidAxisOverride { .. } => {
                SweepError::configuration("CONFIG.INVALID", message)
            }
        }
    }
}

impl SweepConfig {
    /// Reads, resolves and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            message: source.to_string(),
        })?;
        let mut config: Self =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                message: source.to_string(),
            })?;
        let base = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.results_dir);
        resolve(&mut self.staging_dir);
        for root in &mut self.extra_result_roots {
            resolve(root);
        }
        if let Some(output_dir) = self.collect.output_dir.as_mut() {
            resolve(output_dir);
        }
        if let Some(working_dir) = self.simulation.working_dir.as_mut() {
            resolve(working_dir);
        }
    }

    pub fn grid(&self) -> Result<ParameterGrid, ConfigError> {
        match &self.points {
            Some(_) if !self.axes.is_empty() => Err(ConfigError::AxesAndPoints),
            Some(points) => Ok(ParameterGrid::from_points(points)?),
            None => Ok(ParameterGrid::from_axes(&self.axes)?),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let grid = self.grid()?;
        let parameter_names = grid.parameter_names();
        validate_rules(&self.derived, parameter_names)?;

        for name in &self.aggregate.group_by {
            if !parameter_names.contains(name) {
                return Err(ConfigError::UnknownGroupAxis { name: name.clone() });
            }
        }

        if self.simulation.program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }

        let derived_names: Vec<String> = self
            .derived
            .iter()
            .flat_map(DerivedRule::output_names)
            .collect();
        for placeholder in self.simulation.placeholders()? {
            let known = parameter_names.contains(&placeholder)
                || derived_names.contains(&placeholder)
                || self.fixed.contains_key(&placeholder)
                || BUILTIN_PLACEHOLDERS.contains(&placeholder.as_str());
            if !known {
                return Err(ConfigError::UnknownPlaceholder { name: placeholder });
            }
        }
        Ok(())
    }

    /// Replaces the values of a configured axis, keeping its position.
    pub fn apply_axis_override(
        &mut self,
        name: &str,
        values: Vec<ParameterValue>,
    ) -> Result<(), ConfigError> {
        let axis = self
            .axes
            .iter_mut()
            .find(|axis| axis.name == name)
            .ok_or_else(|| ConfigError::UnknownAxis {
                name: name.to_string(),
            })?;
        axis.values = values;
        Ok(())
    }

    /// Directory-name label of a parameter; points use the name itself.
    pub fn label_for<'a>(&'a self, name: &'a str) -> &'a str {
        self.axes
            .iter()
            .find(|axis| axis.name == name)
            .map(Axis::label)
            .unwrap_or(name)
    }

    pub fn suffix_for(&self, name: &str) -> &str {
        self.axes
            .iter()
            .find(|axis| axis.name == name)
            .map_or("", Axis::suffix)
    }

    /// Copy whose staging directory belongs to array-job task `index` alone.
    /// Result directories stay shared.
    pub fn for_task(&self, index: usize) -> Self {
        let mut scoped = self.clone();
        scoped.staging_dir = self.staging_dir.join(format!("task{index}"));
        scoped
    }

    /// Every root the aggregator scans, local results first.
    pub fn result_roots(&self) -> Vec<PathBuf> {
        std::iter::once(self.results_dir.clone())
            .chain(self.extra_result_roots.iter().cloned())
            .collect()
    }
}

/// Parses `name=v1,v2,...`. Values without a decimal point or exponent stay
/// integers.
pub fn parse_axis_override(raw: &str) -> Result<(String, Vec<ParameterValue>), ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidAxisOverride {
        raw: raw.to_string(),
        message: message.to_string(),
    };
    let (name, values) = raw
        .split_once('=')
        .ok_or_else(|| invalid("expected name=v1,v2,..."))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid("axis name is empty"));
    }

    let mut parsed = Vec::new();
    for token in values.split(',').map(str::trim).filter(|token| !token.is_empty()) {
        let value = if token.contains(['.', 'e', 'E']) {
            token
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(ParameterValue::Float)
        } else {
            token.parse::<i64>().ok().map(ParameterValue::Int)
        };
        parsed.push(value.ok_or_else(|| invalid(&format!("'{token}' is not a number")))?);
    }
    if parsed.is_empty() {
        return Err(invalid("no values given"));
    }
    Ok((name.to_string(), parsed))
}

/// Environment the simulator needs before a sweep may start.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrerequisiteConfig {
    #[serde(default)]
    pub env: Vec<String>,
    /// Variables whose value must name an existing path.
    #[serde(default)]
    pub paths_from_env: Vec<String>,
}

impl PrerequisiteConfig {
    pub fn check<F>(&self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value_of = |name: &String| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnv { name: name.clone() })
        };
        for name in &self.env {
            value_of(name)?;
        }
        for name in &self.paths_from_env {
            let path = value_of(name)?;
            if !Path::new(&path).exists() {
                return Err(ConfigError::MissingPath {
                    name: name.clone(),
                    path,
                });
            }
        }
        Ok(())
    }
}
