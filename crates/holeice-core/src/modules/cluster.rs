use super::stage::{StageError, StageInvocation};
use super::traits::StageRunner;
use crate::common::constants::DEFAULT_TASK_ENV;
use serde::Deserialize;
use tracing::{info, warn};

/// Array-job submission settings for a Grid Engine style scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Variable carrying the 1-based task index inside each task.
    #[serde(default = "default_task_env")]
    pub task_env: String,
    #[serde(default = "default_submit_program")]
    pub submit_program: String,
    #[serde(default = "default_job_script")]
    pub job_script: String,
    /// `-l` resource requests for GPU tasks.
    #[serde(default = "default_resources")]
    pub resources: Vec<String>,
    /// `-l` resource requests when submitting with `--cpu`.
    #[serde(default = "default_cpu_resources")]
    pub cpu_resources: Vec<String>,
    #[serde(default = "default_mail_events")]
    pub mail_events: String,
    #[serde(default = "default_status_program")]
    pub status_program: String,
}

fn default_task_env() -> String {
    DEFAULT_TASK_ENV.to_string()
}

fn default_submit_program() -> String {
    "qsub".to_string()
}

fn default_job_script() -> String {
    "batch-job.sh".to_string()
}

fn default_resources() -> Vec<String> {
    ["gpu", "tmpdir_size=10G", "s_rt=0:29:00", "h_rss=2G"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_cpu_resources() -> Vec<String> {
    ["tmpdir_size=10G", "s_rt=1:00:00", "h_rss=2G"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_mail_events() -> String {
    "ae".to_string()
}

fn default_status_program() -> String {
    "qstat".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            task_env: default_task_env(),
            submit_program: default_submit_program(),
            job_script: default_job_script(),
            resources: default_resources(),
            cpu_resources: default_cpu_resources(),
            mail_events: default_mail_events(),
            status_program: default_status_program(),
        }
    }
}

pub struct ClusterSubmission;

impl ClusterSubmission {
    /// `qsub -l <res> ... -m <events> -t 1-<N> <script> [--cpu]`
    pub fn build(config: &ClusterConfig, job_count: usize, cpu: bool) -> StageInvocation {
        let resources = if cpu {
            &config.cpu_resources
        } else {
            &config.resources
        };
        let mut args = Vec::with_capacity(resources.len() * 2 + 6);
        for resource in resources {
            args.push("-l".to_string());
            args.push(resource.clone());
        }
        if !config.mail_events.is_empty() {
            args.push("-m".to_string());
            args.push(config.mail_events.clone());
        }
        args.push("-t".to_string());
        args.push(format!("1-{job_count}"));
        args.push(config.job_script.clone());
        if cpu {
            args.push("--cpu".to_string());
        }
        StageInvocation::new(config.submit_program.clone(), args)
    }

    pub fn status(config: &ClusterConfig, user: &str) -> StageInvocation {
        StageInvocation::new(
            config.status_program.clone(),
            vec!["-u".to_string(), user.to_string()],
        )
    }

    /// Submits one array job covering `job_count` tasks, then lists the
    /// user's queue. Only the submission is checked.
    pub fn submit<R>(
        runner: &R,
        config: &ClusterConfig,
        job_count: usize,
        cpu: bool,
        user: Option<&str>,
    ) -> Result<(), StageError>
    where
        R: StageRunner + ?Sized,
    {
        info!("There are {} parameter configurations in total.", job_count);
        let invocation = Self::build(config, job_count, cpu);
        info!("Submitting: {}", invocation.command_line());
        let outcome = runner.run(&invocation)?;
        if !outcome.exited_cleanly() {
            return Err(StageError::Failed {
                command: invocation.command_line(),
                detail: format!("exit status {:?}", outcome.exit_code),
            });
        }
        info!("Each task copies its results below the cluster results root.");

        let Some(user) = user else {
            warn!("USER is not set; not listing cluster jobs.");
            return Ok(());
        };
        info!("These are your current cluster jobs:");
        let status = Self::status(config, user);
        match runner.run(&status) {
            Ok(outcome) if outcome.exited_cleanly() => {}
            Ok(outcome) => warn!(exit_code = ?outcome.exit_code, "{} failed.", status.command_line()),
            Err(error) => warn!("{}", error),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ClusterConfig, ClusterSubmission};
    use crate::modules::stage::{StageError, StageInvocation, StageOutcome};
    use crate::modules::traits::StageRunner;
    use std::cell::RefCell;

    #[test]
    fn gpu_submission_requests_an_array_job_over_the_whole_grid() {
        let invocation = ClusterSubmission::build(&ClusterConfig::default(), 36, false);
        assert_eq!(
            invocation.command_line(),
            "qsub -l gpu -l tmpdir_size=10G -l s_rt=0:29:00 -l h_rss=2G -m ae -t 1-36 batch-job.sh"
        );
    }

    #[test]
    fn cpu_submission_uses_cpu_resources_and_forwards_the_flag() {
        let invocation = ClusterSubmission::build(&ClusterConfig::default(), 4, true);
        assert_eq!(
            invocation.command_line(),
            "qsub -l tmpdir_size=10G -l s_rt=1:00:00 -l h_rss=2G -m ae -t 1-4 batch-job.sh --cpu"
        );
    }

    struct ScriptedRunner {
        exit_codes: RefCell<Vec<i32>>,
        commands: RefCell<Vec<String>>,
    }

    impl StageRunner for ScriptedRunner {
        fn run(&self, invocation: &StageInvocation) -> Result<StageOutcome, StageError> {
            self.commands.borrow_mut().push(invocation.command_line());
            let exit_code = self.exit_codes.borrow_mut().remove(0);
            Ok(StageOutcome {
                exit_code: Some(exit_code),
                ..StageOutcome::default()
            })
        }
    }

    #[test]
    fn failed_submission_is_an_error_but_failed_status_is_not() {
        let config = ClusterConfig::default();
        let runner = ScriptedRunner {
            exit_codes: RefCell::new(vec![1]),
            commands: RefCell::new(Vec::new()),
        };
        let error = ClusterSubmission::submit(&runner, &config, 2, false, Some("alice"))
            .expect_err("submission should fail");
        assert!(matches!(error, StageError::Failed { .. }));
        assert_eq!(runner.commands.borrow().len(), 1);

        let runner = ScriptedRunner {
            exit_codes: RefCell::new(vec![0, 2]),
            commands: RefCell::new(Vec::new()),
        };
        ClusterSubmission::submit(&runner, &config, 2, false, Some("alice"))
            .expect("status failures are only logged");
        assert_eq!(runner.commands.borrow()[1], "qstat -u alice");
    }
}
