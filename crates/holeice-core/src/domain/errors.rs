pub type SweepResult<T> = Result<T, SweepError>;

/// What went wrong, coarse enough to pick a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepErrorCategory {
    /// Bad configuration, command line, or environment. Nothing has run yet.
    ConfigurationError,
    IoSystemError,
    /// An external tool could not be started or rejected a submission.
    StageError,
    InternalError,
}

impl SweepErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::ConfigurationError => 2,
            Self::IoSystemError => 3,
            Self::StageError => 4,
            Self::InternalError => 5,
        }
    }
}

/// Fatal sweep error with a stable code such as `CONFIG.AXIS_EMPTY` or
/// `IO.COLLECT_MOVE`, so failures can be grepped in cluster logs
/// independently of the message wording.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{placeholder}] {message}")]
pub struct SweepError {
    category: SweepErrorCategory,
    placeholder: &'static str,
    message: String,
}

impl SweepError {
    pub fn configuration(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(SweepErrorCategory::ConfigurationError, placeholder, message)
    }

    pub fn io_system(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(SweepErrorCategory::IoSystemError, placeholder, message)
    }

    pub fn stage(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(SweepErrorCategory::StageError, placeholder, message)
    }

    pub fn internal(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(SweepErrorCategory::InternalError, placeholder, message)
    }

    fn new(
        category: SweepErrorCategory,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            placeholder,
            message: message.into(),
        }
    }

    pub const fn category(&self) -> SweepErrorCategory {
        self.category
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    /// `ERROR: [CODE] message`, the first line printed on stderr.
    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: {self}")
    }

    pub fn fatal_exit_line(&self) -> String {
        format!("FATAL EXIT CODE: {}", self.exit_code())
    }
}
