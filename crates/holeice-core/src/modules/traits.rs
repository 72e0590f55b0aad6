use super::stage::{StageError, StageInvocation, StageOutcome};

/// Runs one bound external command to completion.
///
/// The process-backed implementation is [`super::stage::ProcessRunner`];
/// tests substitute recording doubles.
pub trait StageRunner {
    fn run(&self, invocation: &StageInvocation) -> Result<StageOutcome, StageError>;
}

impl<T> StageRunner for &T
where
    T: StageRunner + ?Sized,
{
    fn run(&self, invocation: &StageInvocation) -> Result<StageOutcome, StageError> {
        (**self).run(invocation)
    }
}
