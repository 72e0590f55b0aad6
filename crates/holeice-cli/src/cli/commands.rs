use super::CliError;
use super::helpers::{DEFAULT_CONFIG_PATH, current_user, load_sweep_config, task_index_from_env};
use anyhow::Context;
use holeice_core::domain::SweepError;
use holeice_core::sweep::RunMode;
use holeice_core::modules::runner::report_path;
use holeice_core::modules::{
    ProcessRunner, ResultAggregator, RunOptions, SweepRunner, render_aggregate_summary,
    render_human_summary,
};
use std::io::Write;
use std::path::PathBuf;

#[derive(clap::Args)]
pub(super) struct RunArgs {
    /// Sweep configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Submit one array job covering the whole grid instead of running locally
    #[arg(long, visible_alias = "submit-to-cluster")]
    cluster: bool,

    /// Skip the simulation phase and continue with aggregation
    #[arg(long)]
    skip_simulation: bool,

    /// Only aggregate and plot existing results
    #[arg(long, conflicts_with_all = ["cluster", "skip_simulation"])]
    plot: bool,

    /// Keep the staging directory of a previous run
    #[arg(long)]
    resume: bool,

    /// Submit cluster tasks without a GPU
    #[arg(long, requires = "cluster")]
    cpu: bool,

    /// Replace the values of a configured axis, e.g. `--axis distance=1.0,2.0`
    #[arg(long = "axis", value_name = "NAME=V1,V2,...")]
    axes: Vec<String>,
}

#[derive(clap::Args)]
pub(super) struct ListArgs {
    /// Sweep configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Replace the values of a configured axis
    #[arg(long = "axis", value_name = "NAME=V1,V2,...")]
    axes: Vec<String>,
}

#[derive(clap::Args)]
pub(super) struct AggregateArgs {
    /// Sweep configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Result roots to scan instead of the configured ones
    #[arg(value_name = "ROOTS")]
    roots: Vec<PathBuf>,
}

pub(super) fn run_sweep_command(args: RunArgs) -> Result<i32, CliError> {
    let config = load_sweep_config(&args.config, &args.axes)?;
    let task_index = if args.cluster {
        None
    } else {
        task_index_from_env(&config.cluster.task_env)?
    };

    let options = RunOptions {
        task_index,
        submit_to_cluster: args.cluster,
        skip_simulation: args.skip_simulation,
        plot: args.plot,
        resume: args.resume,
        cpu: args.cpu,
        user: current_user(),
    };
    let report = SweepRunner::new(&config, ProcessRunner).run(&options)?;

    println!("{}", render_human_summary(&report));
    println!(
        "JSON report: {}",
        report_path(&config, RunMode::from_task_index(task_index)).display()
    );

    if task_index.is_some() && report.has_failed_jobs() {
        Ok(1)
    } else {
        Ok(0)
    }
}

pub(super) fn run_list_command(args: ListArgs) -> Result<i32, CliError> {
    let config = load_sweep_config(&args.config, &args.axes)?;
    let grid = config.grid().map_err(SweepError::from)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (index, set) in grid.iter() {
        writeln!(out, "{:>5}  {:<40}  {}", index, set.directory_name(), set.describe())
            .context("failed to write the parameter grid")?;
    }
    writeln!(out, "{} parameter sets", grid.len()).context("failed to write the parameter grid")?;
    Ok(0)
}

pub(super) fn run_aggregate_command(args: AggregateArgs) -> Result<i32, CliError> {
    let config = load_sweep_config(&args.config, &[])?;
    let grid = config.grid().map_err(SweepError::from)?;
    let roots = if args.roots.is_empty() {
        config.result_roots()
    } else {
        args.roots
    };

    let aggregator =
        ResultAggregator::for_sweep(&config, grid.parameter_names()).map_err(SweepError::from)?;
    let table = aggregator.scan(&roots).map_err(SweepError::from)?;
    let summary = aggregator
        .write_outputs(&table, &config.staging_dir, Some(&ProcessRunner))
        .map_err(SweepError::from)?;

    println!("{}", render_aggregate_summary(&summary));
    Ok(0)
}
