//! Failure classification for chunk processing.

use crate::error::BatchError;

/// What the chunk processor does with a failed item or chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Exclude the offending item and keep going.
    Skip,
    /// Roll back and attempt the same chunk again.
    Retry,
    /// Fail the step.
    Fatal,
}

/// Pure classification of a processing or sink error.
pub trait FailurePolicy: Send + Sync {
    fn classify(&self, error: &BatchError) -> FailureAction;
}

/// Default policy: every error fails the step.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysFatal;

impl FailurePolicy for AlwaysFatal {
    fn classify(&self, _error: &BatchError) -> FailureAction {
        FailureAction::Fatal
    }
}

/// Skips every item-level error.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSkip;

impl FailurePolicy for AlwaysSkip {
    fn classify(&self, _error: &BatchError) -> FailureAction {
        FailureAction::Skip
    }
}

impl<F> FailurePolicy for F
where
    F: Fn(&BatchError) -> FailureAction + Send + Sync,
{
    fn classify(&self, error: &BatchError) -> FailureAction {
        self(error)
    }
}
