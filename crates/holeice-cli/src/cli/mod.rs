mod commands;
mod helpers;
mod logging;

use clap::Parser;
use holeice_core::domain::SweepError;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let sweep_error = error.as_sweep_error();
            eprintln!("{}", sweep_error.diagnostic_line());
            eprintln!("{}", sweep_error.fatal_exit_line());
            sweep_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("holeice-sweep".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            logging::init_logging(cli.log_level.as_deref())?;
            dispatch_parsed(cli.command)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "holeice-sweep",
    about = "Parameter sweeps over hole-ice photon propagation simulations"
)]
struct Cli {
    /// Log filter, e.g. `info` or `holeice_core=debug` (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Run the sweep locally, as one cluster task, or submit it to the cluster
    Run(commands::RunArgs),
    /// Print the parameter grid with its 1-based task indices
    List(commands::ListArgs),
    /// Aggregate existing results without running the sweep
    Aggregate(commands::AggregateArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Run(args) => commands::run_sweep_command(args),
        CliCommand::List(args) => commands::run_list_command(args),
        CliCommand::Aggregate(args) => commands::run_aggregate_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Sweep(SweepError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<SweepError> for CliError {
    fn from(error: SweepError) -> Self {
        Self::Sweep(error)
    }
}

impl CliError {
    fn as_sweep_error(&self) -> SweepError {
        match self {
            Self::Usage(message) => {
                SweepError::configuration("CONFIG.CLI_USAGE", message.trim_end().to_string())
            }
            Self::Sweep(error) => error.clone(),
            Self::Internal(error) => SweepError::internal("INTERNAL.CLI", format!("{error:#}")),
        }
    }
}
