//! Callbacks around steps and chunks.
//!
//! Listeners are stored in registration order and invoked in that order. Every
//! hook gets the current [`StepExecution`] together with the job-scoped
//! [`ExecutionContext`], which is the only way step-local data reaches later
//! steps.

use log::warn;

use crate::error::BatchError;

use super::{
    context::ExecutionContext,
    execution::{ExitStatus, JobExecution, StepExecution},
};

/// Logs a failed listener hook and swallows it, unless the step lets
/// listeners veto its outcome.
pub(crate) fn handle_listener_result<T>(
    result: Result<T, BatchError>,
    veto: bool,
    hook: &str,
) -> Result<Option<T>, BatchError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(error) if veto => Err(BatchError::Listener(format!("{}: {}", hook, error))),
        Err(error) => {
            warn!("Listener {} failed: {}", hook, error);
            Ok(None)
        }
    }
}

pub trait JobExecutionListener: Send + Sync {
    fn before_job(&self, _job_execution: &mut JobExecution) -> Result<(), BatchError> {
        Ok(())
    }

    fn after_job(&self, _job_execution: &mut JobExecution) -> Result<(), BatchError> {
        Ok(())
    }
}

pub trait StepExecutionListener: Send + Sync {
    fn before_step(
        &self,
        _step_execution: &mut StepExecution,
        _job_context: &mut ExecutionContext,
    ) -> Result<(), BatchError> {
        Ok(())
    }

    /// Called once when the step ends, successfully or not. Returning an exit
    /// status replaces the one computed by the step.
    fn after_step(
        &self,
        _step_execution: &mut StepExecution,
        _job_context: &mut ExecutionContext,
    ) -> Result<Option<ExitStatus>, BatchError> {
        Ok(None)
    }
}

pub trait ChunkListener: Send + Sync {
    fn before_chunk(
        &self,
        _step_execution: &mut StepExecution,
        _job_context: &mut ExecutionContext,
    ) -> Result<(), BatchError> {
        Ok(())
    }

    /// Called after the chunk transaction committed.
    fn after_chunk(
        &self,
        _step_execution: &mut StepExecution,
        _job_context: &mut ExecutionContext,
    ) -> Result<(), BatchError> {
        Ok(())
    }

    /// Called after the chunk transaction rolled back for good.
    fn after_chunk_error(&self, _step_execution: &StepExecution, _error: &BatchError) {}
}

/// Adapts a closure into an `after_step` listener.
pub struct AfterStepListener<F> {
    callback: F,
}

impl<F> AfterStepListener<F>
where
    F: Fn(&mut StepExecution, &mut ExecutionContext) -> Result<Option<ExitStatus>, BatchError>
        + Send
        + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> StepExecutionListener for AfterStepListener<F>
where
    F: Fn(&mut StepExecution, &mut ExecutionContext) -> Result<Option<ExitStatus>, BatchError>
        + Send
        + Sync,
{
    fn after_step(
        &self,
        step_execution: &mut StepExecution,
        job_context: &mut ExecutionContext,
    ) -> Result<Option<ExitStatus>, BatchError> {
        (self.callback)(step_execution, job_context)
    }
}

/// Adapts a closure into a `before_step` listener.
pub struct BeforeStepListener<F> {
    callback: F,
}

impl<F> BeforeStepListener<F>
where
    F: Fn(&mut StepExecution, &mut ExecutionContext) -> Result<(), BatchError> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> StepExecutionListener for BeforeStepListener<F>
where
    F: Fn(&mut StepExecution, &mut ExecutionContext) -> Result<(), BatchError> + Send + Sync,
{
    fn before_step(
        &self,
        step_execution: &mut StepExecution,
        job_context: &mut ExecutionContext,
    ) -> Result<(), BatchError> {
        (self.callback)(step_execution, job_context)
    }
}

/// Adapts a closure into an `after_chunk` listener.
pub struct AfterChunkListener<F> {
    callback: F,
}

impl<F> AfterChunkListener<F>
where
    F: Fn(&mut StepExecution, &mut ExecutionContext) -> Result<(), BatchError> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ChunkListener for AfterChunkListener<F>
where
    F: Fn(&mut StepExecution, &mut ExecutionContext) -> Result<(), BatchError> + Send + Sync,
{
    fn after_chunk(
        &self,
        step_execution: &mut StepExecution,
        job_context: &mut ExecutionContext,
    ) -> Result<(), BatchError> {
        (self.callback)(step_execution, job_context)
    }
}
