//! Sweep phases: prerequisite check, staging cleanup, dispatch and
//! collection of the selected jobs, cluster submission and aggregation.

use super::aggregate::{AggregateSummary, ResultAggregator};
use super::cluster::ClusterSubmission;
use super::collect::ResultCollector;
use super::dispatch::{DispatchOutcome, RunDispatcher};
use super::helpers::{clear_directory, normalize_path};
use super::traits::StageRunner;
use crate::common::SweepConfig;
use crate::common::constants::REPORT_FILE_NAME;
use crate::domain::{Job, JobStatus, SweepError, SweepResult};
use crate::sweep::{JobIndexer, ParameterGrid, RunMode, compute_derived};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// 1-based array-job task index; `None` runs every parameter set.
    pub task_index: Option<usize>,
    pub submit_to_cluster: bool,
    pub skip_simulation: bool,
    /// Skip the sweep and only aggregate and plot.
    pub plot: bool,
    /// Keep the staging directory from a previous run.
    pub resume: bool,
    pub cpu: bool,
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub index: usize,
    pub directory: String,
    pub status: JobStatus,
    /// Stderr output or a failure marker was seen; the output is not trusted.
    pub failure_signal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub generated_at_unix_seconds: u64,
    pub name: String,
    pub mode: String,
    pub grid_size: usize,
    pub submitted_to_cluster: bool,
    pub selected_count: usize,
    pub skipped_count: usize,
    pub collected_count: usize,
    pub failed_count: usize,
    pub failure_signal_count: usize,
    pub jobs: Vec<JobReport>,
    pub aggregate: Option<AggregateSummary>,
}

impl SweepReport {
    pub fn has_failed_jobs(&self) -> bool {
        self.failed_count > 0
    }
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String>>;

pub struct SweepRunner<'a, R> {
    config: &'a SweepConfig,
    runner: R,
    env: EnvLookup,
}

impl<'a, R> SweepRunner<'a, R>
where
    R: StageRunner,
{
    pub fn new(config: &'a SweepConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replaces the process environment used for prerequisite checks.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'static,
    {
        self.env = Box::new(lookup);
        self
    }

    pub fn run(&self, options: &RunOptions) -> SweepResult<SweepReport> {
        let mode = RunMode::from_task_index(options.task_index);
        let task_config;
        let config = match mode {
            RunMode::ClusterTask { index } => {
                task_config = self.config.for_task(index);
                &task_config
            }
            RunMode::Local => self.config,
        };
        if !config.name.is_empty() {
            info!("{}", config.name);
        }
        if mode.is_cluster_task() {
            info!("This is {}.", mode);
        }

        let simulates = !options.plot && !options.skip_simulation;
        if simulates {
            config.prerequisites.check(|name| (self.env)(name))?;
        }

        if options.resume {
            info!("Resuming; keeping {}.", config.staging_dir.display());
        } else {
            clear_directory(&config.staging_dir).map_err(|source| {
                SweepError::io_system(
                    "IO.STAGING_CLEAR",
                    format!(
                        "failed to clear staging directory '{}': {}",
                        config.staging_dir.display(),
                        source
                    ),
                )
            })?;
        }

        let grid = config.grid()?;
        let mut jobs = Vec::new();
        let mut submitted_to_cluster = false;

        if options.plot {
            warn!("Skipping the sweep due to --plot. Continuing with aggregation.");
        } else if options.submit_to_cluster {
            ClusterSubmission::submit(
                &self.runner,
                &config.cluster,
                grid.len(),
                options.cpu,
                options.user.as_deref(),
            )?;
            submitted_to_cluster = true;
        } else if options.skip_simulation {
            warn!("Skipping simulation due to --skip-simulation. Continuing with aggregation.");
        } else {
            info!(
                "There are {} parameter configurations in total.",
                grid.len()
            );
            jobs = self.run_jobs(config, &grid, mode)?;
        }

        let aggregates = options.plot || (!submitted_to_cluster && !mode.is_cluster_task());
        let aggregate = if aggregates {
            Some(self.aggregate(config, &grid)?)
        } else {
            None
        };

        let report = build_report(config, mode, grid.len(), submitted_to_cluster, jobs, aggregate);
        write_report_file(&report_path(self.config, mode), &report)?;
        Ok(report)
    }

    /// Dispatches and collects every selected job. Job failures are recorded
    /// on the job and never stop the loop.
    fn run_jobs(
        &self,
        config: &SweepConfig,
        grid: &ParameterGrid,
        mode: RunMode,
    ) -> SweepResult<Vec<JobReport>> {
        let selected = JobIndexer::new(grid).select(mode)?;
        let dispatcher = RunDispatcher::new(config, &self.runner);
        let collector = ResultCollector::new(config)?;

        let mut reports = Vec::with_capacity(selected.len());
        for set in selected {
            let derived = compute_derived(&config.derived, set.parameters)?;
            let mut job = Job::new(
                set.index,
                set.parameters.clone(),
                derived,
                &config.results_dir,
            );

            let mut failure_signal = false;
            match dispatcher.dispatch(&mut job) {
                Ok(DispatchOutcome::Skipped) => {}
                Ok(DispatchOutcome::Ran(outcome)) => {
                    failure_signal = outcome.has_failure_signal();
                    match collector.collect(&job) {
                        Ok(_) => job.mark_collected(),
                        Err(collect_error) => {
                            error!("Run {} failed: {}", job.index, collect_error);
                            job.mark_failed(collect_error.to_string());
                        }
                    }
                }
                Err(dispatch_error) => {
                    error!("Run {} failed: {}", job.index, dispatch_error);
                    job.mark_failed(dispatch_error.to_string());
                }
            }

            reports.push(JobReport {
                index: job.index,
                directory: normalize_path(&job.result_dir),
                status: job.status,
                failure_signal,
            });
        }
        Ok(reports)
    }

    fn aggregate(&self, config: &SweepConfig, grid: &ParameterGrid) -> SweepResult<AggregateSummary> {
        info!("Aggregating results.");
        let aggregator = ResultAggregator::for_sweep(config, grid.parameter_names())?;
        let table = aggregator.scan(&config.result_roots())?;
        Ok(aggregator.write_outputs(&table, &config.staging_dir, Some(&self.runner))?)
    }
}

fn build_report(
    config: &SweepConfig,
    mode: RunMode,
    grid_size: usize,
    submitted_to_cluster: bool,
    jobs: Vec<JobReport>,
    aggregate: Option<AggregateSummary>,
) -> SweepReport {
    let count = |predicate: fn(&JobReport) -> bool| jobs.iter().filter(|job| predicate(job)).count();
    SweepReport {
        generated_at_unix_seconds: current_unix_timestamp_seconds(),
        name: config.name.clone(),
        mode: mode.to_string(),
        grid_size,
        submitted_to_cluster,
        selected_count: jobs.len(),
        skipped_count: count(|job| job.status == JobStatus::Skipped),
        collected_count: count(|job| job.status == JobStatus::Collected),
        failed_count: count(|job| matches!(job.status, JobStatus::Failed { .. })),
        failure_signal_count: count(|job| job.failure_signal),
        jobs,
        aggregate,
    }
}

pub fn render_human_summary(report: &SweepReport) -> String {
    let mut lines = Vec::new();
    let status = if report.has_failed_jobs() { "FAILURES" } else { "OK" };
    lines.push(format!("Sweep status: {} ({})", status, report.mode));
    lines.push(format!("Parameter sets: {}", report.grid_size));
    if report.submitted_to_cluster {
        lines.push(format!(
            "Submitted an array job with {} tasks",
            report.grid_size
        ));
    }
    if report.selected_count > 0 {
        lines.push(format!(
            "Jobs: {} selected ({} skipped, {} collected, {} failed, {} with failure signals)",
            report.selected_count,
            report.skipped_count,
            report.collected_count,
            report.failed_count,
            report.failure_signal_count
        ));
    }
    for job in &report.jobs {
        if let JobStatus::Failed { reason } = &job.status {
            lines.push(format!("  job {} ({}): {}", job.index, job.directory, reason));
        }
    }

    if let Some(aggregate) = &report.aggregate {
        lines.push(render_aggregate_summary(aggregate));
    }

    lines.join("\n")
}

pub fn render_aggregate_summary(summary: &AggregateSummary) -> String {
    let mut lines = vec![format!(
        "Aggregate: {} rows, {} dropped records",
        summary.rows,
        summary.dropped.len()
    )];
    for group in &summary.groups {
        lines.push(format!(
            "  {}: {} rows -> {}",
            group.name,
            group.rows,
            normalize_path(&group.table)
        ));
    }
    if let Some(best) = &summary.best {
        let parameters = best
            .parameters
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Best {}: {} at {}", best.column, best.value, parameters));
    }
    lines.join("\n")
}

fn write_report_file(report_path: &Path, report: &SweepReport) -> SweepResult<()> {
    let io_error = |path: &Path, message: String| {
        SweepError::io_system(
            "IO.REPORT_WRITE",
            format!("failed to write report '{}': {}", path.display(), message),
        )
    };
    if let Some(parent_dir) = report_path.parent() {
        fs::create_dir_all(parent_dir).map_err(|source| io_error(parent_dir, source.to_string()))?;
    }
    let report_json = serde_json::to_string_pretty(report)
        .map_err(|source| io_error(report_path, source.to_string()))?;
    fs::write(report_path, report_json).map_err(|source| io_error(report_path, source.to_string()))
}

/// Location of the report written by [`SweepRunner::run`]. Array-job tasks
/// write into their own staging directory.
pub fn report_path(config: &SweepConfig, mode: RunMode) -> PathBuf {
    match mode {
        RunMode::ClusterTask { index } => config.for_task(index).staging_dir.join(REPORT_FILE_NAME),
        RunMode::Local => config.staging_dir.join(REPORT_FILE_NAME),
    }
}

fn current_unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
