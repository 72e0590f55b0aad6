//! External stage interface: command template, argument binding, log
//! capture and failure-signal detection.
//!
//! The simulator, the plotting tool and the cluster submission commands all
//! go through this module, so a sweep is described entirely by data in the
//! sweep configuration.

use super::helpers::read_lossy;
use super::traits::StageRunner;
use crate::common::constants::DEFAULT_LOG_NAME;
use crate::domain::{Job, SweepError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_log_name")]
    pub log_name: String,
    /// Substrings that mark a run as failed when found in its logs.
    #[serde(default)]
    pub failure_markers: Vec<String>,
}

fn default_log_name() -> String {
    DEFAULT_LOG_NAME.to_string()
}

impl StageTemplate {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            log_name: default_log_name(),
            failure_markers: Vec::new(),
        }
    }

    /// Every placeholder name used by the program and arguments.
    pub fn placeholders(&self) -> Result<Vec<String>, BindingError> {
        let mut names = Vec::new();
        for template in std::iter::once(&self.program).chain(self.args.iter()) {
            for segment in parse_template(template)? {
                if let Segment::Placeholder(name) = segment {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        Ok(names)
    }

    pub fn bind(
        &self,
        context: &BindingContext,
        stdout: Capture,
        stderr: Capture,
    ) -> Result<StageInvocation, BindingError> {
        let program = context.render(&self.program)?;
        let args = self
            .args
            .iter()
            .map(|arg| context.render(arg))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StageInvocation {
            program,
            args,
            working_dir: self.working_dir.clone(),
            stdout,
            stderr,
            failure_markers: self.failure_markers.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("unknown placeholder '{{{name}}}' in '{template}'")]
    UnknownPlaceholder { name: String, template: String },
    #[error("unterminated placeholder in '{template}'")]
    Unterminated { template: String },
    #[error("empty placeholder in '{template}'")]
    EmptyPlaceholder { template: String },
    #[error("unmatched '}}' in '{template}'")]
    UnmatchedClose { template: String },
}

impl From<BindingError> for SweepError {
    fn from(error: BindingError) -> Self {
        SweepError::configuration("CONFIG.STAGE_TEMPLATE", error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

fn parse_template(template: &str) -> Result<Vec<Segment>, BindingError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    name.push(inner);
                }
                if !closed {
                    return Err(BindingError::Unterminated {
                        template: template.to_string(),
                    });
                }
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(BindingError::EmptyPlaceholder {
                        template: template.to_string(),
                    });
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
            }
            '}' => {
                return Err(BindingError::UnmatchedClose {
                    template: template.to_string(),
                });
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Named values available to `{placeholder}` substitution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingContext {
    values: Vec<(String, String)>,
}

impl BindingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters, derived fields, fixed values and job builtins
    /// (`index`, `result_dir`, `job_name`).
    pub fn for_job(job: &Job, fixed: &Map<String, Value>) -> Self {
        let mut context = Self::new();
        for (name, value) in fixed {
            context.set(name.clone(), render_fixed_value(value));
        }
        for entry in job.parameters.entries() {
            context.set(entry.name.clone(), entry.value.to_string());
        }
        for (name, value) in job.derived.iter() {
            context.set(name, value.to_string());
        }
        context.set("index", job.index.to_string());
        context.set("job_name", job.parameters.directory_name());
        context.set("result_dir", job.result_dir.to_string_lossy().into_owned());
        context
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self.values.iter_mut().find(|(key, _)| *key == name) {
            existing.1 = value;
        } else {
            self.values.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn render(&self, template: &str) -> Result<String, BindingError> {
        let mut rendered = String::new();
        for segment in parse_template(template)? {
            match segment {
                Segment::Literal(text) => rendered.push_str(&text),
                Segment::Placeholder(name) => {
                    let value =
                        self.get(&name)
                            .ok_or_else(|| BindingError::UnknownPlaceholder {
                                name: name.clone(),
                                template: template.to_string(),
                            })?;
                    rendered.push_str(value);
                }
            }
        }
        Ok(rendered)
    }
}

/// Lists are joined with commas (`--angles=0,10,20`).
pub fn render_fixed_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_fixed_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    Inherit,
    Null,
    File(PathBuf),
}

impl Capture {
    fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            _ => None,
        }
    }
}

/// A fully bound command ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub stdout: Capture,
    pub stderr: Capture,
    pub failure_markers: Vec<String>,
}

impl StageInvocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            stdout: Capture::Inherit,
            stderr: Capture::Inherit,
            failure_markers: Vec::new(),
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StageOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stderr_output: String,
    pub failure_marker: Option<String>,
}

impl StageOutcome {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn has_failure_signal(&self) -> bool {
        !self.stderr_output.trim().is_empty() || self.failure_marker.is_some()
    }

    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error("failed to start '{program}': {message}")]
    Spawn { program: String, message: String },
    #[error("failed to open capture file '{}': {message}", path.display())]
    CaptureFile { path: PathBuf, message: String },
    #[error("'{command}' reported a failure: {detail}")]
    Failed { command: String, detail: String },
}

impl From<StageError> for SweepError {
    fn from(error: StageError) -> Self {
        let message = error.to_string();
        match error {
            StageError::Spawn { .. } => SweepError::stage("STAGE.SPAWN", message),
            StageError::CaptureFile { .. } => SweepError::io_system("IO.STAGE_CAPTURE", message),
            StageError::Failed { .. } => SweepError::stage("STAGE.FAILED", message),
        }
    }
}

/// Runs stages as blocking child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl StageRunner for ProcessRunner {
    fn run(&self, invocation: &StageInvocation) -> Result<StageOutcome, StageError> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(working_dir) = &invocation.working_dir {
            command.current_dir(working_dir);
        }
        command.stdout(open_capture(&invocation.stdout)?);
        command.stderr(open_capture(&invocation.stderr)?);

        let status = command.status().map_err(|source| StageError::Spawn {
            program: invocation.program.clone(),
            message: source.to_string(),
        })?;

        let stderr_output = invocation
            .stderr
            .path()
            .and_then(read_lossy)
            .unwrap_or_default();
        let failure_marker = detect_failure_marker(invocation, &stderr_output);

        Ok(StageOutcome {
            exit_code: status.code(),
            stderr_output,
            failure_marker,
        })
    }
}

fn open_capture(capture: &Capture) -> Result<Stdio, StageError> {
    match capture {
        Capture::Inherit => Ok(Stdio::inherit()),
        Capture::Null => Ok(Stdio::null()),
        Capture::File(path) => File::create(path)
            .map(Stdio::from)
            .map_err(|source| StageError::CaptureFile {
                path: path.clone(),
                message: source.to_string(),
            }),
    }
}

/// First configured marker found in the captured stdout log or stderr text.
pub fn detect_failure_marker(invocation: &StageInvocation, stderr_output: &str) -> Option<String> {
    if invocation.failure_markers.is_empty() {
        return None;
    }
    let stdout_log = invocation
        .stdout
        .path()
        .and_then(read_lossy)
        .unwrap_or_default();
    invocation
        .failure_markers
        .iter()
        .find(|marker| stdout_log.contains(marker.as_str()) || stderr_output.contains(marker.as_str()))
        .cloned()
}
