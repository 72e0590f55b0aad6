use super::CliError;
use holeice_core::common::{SweepConfig, parse_axis_override};
use holeice_core::domain::SweepError;
use holeice_core::sweep::parse_task_index;
use std::path::Path;
use tracing::debug;

pub(super) const DEFAULT_CONFIG_PATH: &str = "sweep.json";

/// Loads the sweep configuration and applies `--axis name=v1,v2` overrides.
pub(super) fn load_sweep_config(path: &Path, overrides: &[String]) -> Result<SweepConfig, CliError> {
    let mut config = SweepConfig::load(path).map_err(SweepError::from)?;
    debug!("Loaded sweep configuration {}", path.display());
    if overrides.is_empty() {
        return Ok(config);
    }

    for raw in overrides {
        let (name, values) = parse_axis_override(raw).map_err(SweepError::from)?;
        config
            .apply_axis_override(&name, values)
            .map_err(SweepError::from)?;
        debug!("Axis override {}", raw);
    }
    config.validate().map_err(SweepError::from)?;
    Ok(config)
}

/// Task index of this process, `None` outside an array job.
pub(super) fn task_index_from_env(variable: &str) -> Result<Option<usize>, CliError> {
    let raw = std::env::var(variable).ok();
    Ok(parse_task_index(variable, raw.as_deref()).map_err(SweepError::from)?)
}

pub(super) fn current_user() -> Option<String> {
    std::env::var("USER")
        .ok()
        .filter(|user| !user.trim().is_empty())
}
