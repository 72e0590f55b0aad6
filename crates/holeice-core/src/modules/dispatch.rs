use super::helpers::{read_lossy, tail_lines};
use super::stage::{BindingContext, BindingError, Capture, StageError, StageOutcome};
use super::traits::StageRunner;
use crate::common::SweepConfig;
use crate::common::constants::LOG_TAIL_LINES;
use crate::domain::{Job, SweepError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The result directory already existed; nothing was run.
    Skipped,
    Ran(StageOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to create directory '{}': {message}", path.display())]
    CreateDirectory { path: PathBuf, message: String },
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Stage(#[from] StageError),
}

impl From<DispatchError> for SweepError {
    fn from(error: DispatchError) -> Self {
        let message = error.to_string();
        match error {
            DispatchError::CreateDirectory { .. } => {
                SweepError::io_system("IO.DISPATCH_DIRECTORY", message)
            }
            DispatchError::Binding(source) => source.into(),
            DispatchError::Stage(source) => source.into(),
        }
    }
}

/// Paths of the per-job stdout and stderr logs inside the staging directory.
pub fn staged_log_paths(staging_dir: &Path, log_name: &str) -> (PathBuf, PathBuf) {
    (
        staging_dir.join(format!("{log_name}.log")),
        staging_dir.join(format!("{log_name}.err")),
    )
}

/// Runs the simulator for one job unless its result directory exists.
pub struct RunDispatcher<'a, R> {
    config: &'a SweepConfig,
    runner: R,
}

impl<'a, R> RunDispatcher<'a, R>
where
    R: StageRunner,
{
    pub fn new(config: &'a SweepConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn dispatch(&self, job: &mut Job) -> Result<DispatchOutcome, DispatchError> {
        info!(
            index = job.index,
            "Parameters: {}",
            job.parameters.describe()
        );

        // Existence is the only completion check; a directory left behind by
        // a killed run is skipped as well.
        if job.result_dir.exists() {
            warn!(
                "Skipping already existing run {}.",
                job.result_dir.display()
            );
            job.mark_skipped();
            return Ok(DispatchOutcome::Skipped);
        }

        let staging_dir = &self.config.staging_dir;
        for dir in [job.result_dir.as_path(), staging_dir.as_path()] {
            fs::create_dir_all(dir).map_err(|source| DispatchError::CreateDirectory {
                path: dir.to_path_buf(),
                message: source.to_string(),
            })?;
        }

        let template = &self.config.simulation;
        let (stdout_path, stderr_path) = staged_log_paths(staging_dir, &template.log_name);
        let mut context = BindingContext::for_job(job, &self.config.fixed);
        context.set("staging_dir", staging_dir.to_string_lossy().into_owned());
        let invocation = template.bind(
            &context,
            Capture::File(stdout_path.clone()),
            Capture::File(stderr_path),
        )?;

        info!("Running {}", invocation.command_line());
        let outcome = self.runner.run(&invocation)?;
        job.mark_dispatched();

        if !outcome.stderr_output.trim().is_empty() {
            error!("This simulation run has produced errors:");
            error!("{}", outcome.stderr_output.trim_end());
            if let Some(log) = read_lossy(&stdout_path) {
                info!("{}", tail_lines(&log, LOG_TAIL_LINES));
            }
        }
        if let Some(marker) = &outcome.failure_marker {
            error!(
                "The simulation log of {} contains the failure marker '{}'.",
                job.parameters.directory_name(),
                marker
            );
        }
        if !outcome.exited_cleanly() {
            warn!(
                exit_code = ?outcome.exit_code,
                "The simulation exited with a non-zero status."
            );
        }

        Ok(DispatchOutcome::Ran(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::{DispatchOutcome, RunDispatcher};
    use crate::common::SweepConfig;
    use crate::domain::{DerivedFields, Job, JobStatus, ParameterSet, ParameterValue};
    use crate::modules::stage::{StageError, StageInvocation, StageOutcome};
    use crate::modules::traits::StageRunner;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRunner {
        invocations: RefCell<Vec<StageInvocation>>,
        stderr_output: String,
    }

    impl StageRunner for RecordingRunner {
        fn run(&self, invocation: &StageInvocation) -> Result<StageOutcome, StageError> {
            self.invocations.borrow_mut().push(invocation.clone());
            Ok(StageOutcome {
                exit_code: Some(0),
                stderr_output: self.stderr_output.clone(),
                failure_marker: None,
            })
        }
    }

    fn config_in(root: &Path) -> SweepConfig {
        let mut config: SweepConfig = serde_json::from_str(
            r#"{
              "axes": [ { "name": "distance", "label": "dst", "values": [1.0] } ],
              "fixed": { "photons": 100 },
              "simulation": {
                "program": "simulate",
                "args": ["--distance={distance}", "--photons={photons}", "--out={staging_dir}"],
                "log_name": "angular_acceptance"
              }
            }"#,
        )
        .expect("config should parse");
        config.resolve_paths(root);
        config
    }

    fn job_for(config: &SweepConfig) -> Job {
        Job::new(
            1,
            ParameterSet::from_pairs([("distance", ParameterValue::Float(1.0))]),
            DerivedFields::default(),
            &config.results_dir,
        )
    }

    #[test]
    fn existing_result_directory_is_never_dispatched() {
        let temp = TempDir::new().expect("tempdir should be created");
        let config = config_in(temp.path());
        let mut job = job_for(&config);
        fs::create_dir_all(&job.result_dir).expect("result dir should be created");

        let runner = RecordingRunner::default();
        let outcome = RunDispatcher::new(&config, &runner)
            .dispatch(&mut job)
            .expect("dispatch should succeed");

        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert_eq!(job.status, JobStatus::Skipped);
        assert!(runner.invocations.borrow().is_empty());
    }

    #[test]
    fn new_job_creates_directories_and_binds_arguments() {
        let temp = TempDir::new().expect("tempdir should be created");
        let config = config_in(temp.path());
        let mut job = job_for(&config);

        let runner = RecordingRunner::default();
        let outcome = RunDispatcher::new(&config, &runner)
            .dispatch(&mut job)
            .expect("dispatch should succeed");

        assert!(matches!(outcome, DispatchOutcome::Ran(_)));
        assert_eq!(job.status, JobStatus::Dispatched);
        assert!(job.result_dir.ends_with("results/dst1.0"));
        assert!(job.result_dir.is_dir());
        assert!(config.staging_dir.is_dir());

        let invocations = runner.invocations.borrow();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].program, "simulate");
        assert_eq!(invocations[0].args[0], "--distance=1.0");
        assert_eq!(invocations[0].args[1], "--photons=100");
        assert_eq!(
            invocations[0].args[2],
            format!("--out={}", config.staging_dir.display())
        );
    }

    #[test]
    fn stderr_output_does_not_abort_the_job() {
        let temp = TempDir::new().expect("tempdir should be created");
        let config = config_in(temp.path());
        let mut job = job_for(&config);

        let runner = RecordingRunner {
            stderr_output: "Traceback: geometry file missing\n".to_string(),
            ..RecordingRunner::default()
        };
        let outcome = RunDispatcher::new(&config, &runner)
            .dispatch(&mut job)
            .expect("dispatch should still succeed");

        match outcome {
            DispatchOutcome::Ran(stage) => assert!(stage.has_failure_signal()),
            DispatchOutcome::Skipped => panic!("job should have run"),
        }
        assert_eq!(job.status, JobStatus::Dispatched);
    }
}
