use super::AggregateError;
use super::table::AggregateTable;
use crate::modules::stage::{Capture, StageError, StageInvocation};
use crate::modules::traits::StageRunner;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlotConfig {
    #[serde(default = "default_plot_program")]
    pub program: String,
    pub x: String,
    pub y: String,
    pub z: String,
    #[serde(default)]
    pub title: Option<String>,
}

fn default_plot_program() -> String {
    "gnuplot".to_string()
}

/// Surface-plot script over a space-separated table with a header row.
pub fn render_surface_script(
    config: &PlotConfig,
    table: &AggregateTable,
    csv_path: &Path,
    title: &str,
) -> Result<String, AggregateError> {
    let column = |name: &str| {
        table
            .column_index(name)
            .map(|index| index + 1)
            .ok_or_else(|| AggregateError::UnknownColumn {
                name: name.to_string(),
            })
    };
    let (x, y, z) = (column(&config.x)?, column(&config.y)?, column(&config.z)?);
    let title = config.title.as_deref().unwrap_or(title);

    Ok(format!(
        "set term png\n\
         set title \"{title}\"\n\
         set xlabel \"{xlabel}\"\n\
         set ylabel \"{ylabel}\"\n\
         set zlabel \"{zlabel}\"\n\
         set key autotitle columnhead\n\
         set dgrid3d 30,30\n\
         set hidden3d\n\
         splot \"{data}\" using {x}:{y}:{z} with lines notitle\n",
        xlabel = config.x,
        ylabel = config.y,
        zlabel = config.z,
        data = csv_path.display(),
    ))
}

/// Writes `<stem>.gnuplot` next to the table and renders `<stem>.png`.
pub fn plot_group<R>(
    runner: &R,
    config: &PlotConfig,
    table: &AggregateTable,
    csv_path: &Path,
    title: &str,
) -> Result<PathBuf, AggregateError>
where
    R: StageRunner + ?Sized,
{
    let script_path = csv_path.with_extension("gnuplot");
    let image_path = csv_path.with_extension("png");
    let script = render_surface_script(config, table, csv_path, title)?;
    fs::write(&script_path, script).map_err(|source| AggregateError::Write {
        path: script_path.clone(),
        message: source.to_string(),
    })?;

    let mut invocation = StageInvocation::new(
        config.program.clone(),
        vec![script_path.to_string_lossy().into_owned()],
    );
    invocation.stdout = Capture::File(image_path.clone());
    invocation.stderr = Capture::File(csv_path.with_extension("plot.err"));

    let outcome = runner.run(&invocation)?;
    if !outcome.exited_cleanly() {
        return Err(StageError::Failed {
            command: invocation.command_line(),
            detail: outcome.stderr_output.trim().to_string(),
        }
        .into());
    }
    if !outcome.stderr_output.trim().is_empty() {
        warn!("{}", outcome.stderr_output.trim_end());
    }
    info!("Plot: {}", image_path.display());
    Ok(image_path)
}
