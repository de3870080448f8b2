use std::{sync::Arc, time::Duration};

use log::debug;

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        execution::StepExecution,
        sleeper::{Sleeper, ThreadSleeper},
        step::{RepeatStatus, Tasklet},
    },
};

/// Step context key holding the number of completed iterations.
pub const ITERATION_KEY: &str = "SleepTasklet.iteration";

/// Waits `delay` once per call, reporting `Continuable` until `iterations`
/// calls have been made.
///
/// Progress lives in the step context, so a stopped step picks up where it
/// left off.
pub struct SleepTasklet {
    iterations: u32,
    delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl SleepTasklet {
    pub fn new(iterations: u32, delay: Duration) -> Self {
        Self {
            iterations,
            delay,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }
}

impl Tasklet for SleepTasklet {
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        _job_context: &mut ExecutionContext,
    ) -> Result<RepeatStatus, BatchError> {
        let done = step_execution
            .execution_context
            .get_int(ITERATION_KEY)
            .unwrap_or(0);
        if done >= i64::from(self.iterations) {
            return Ok(RepeatStatus::Finished);
        }

        self.sleeper.sleep(self.delay);
        let done = done + 1;
        step_execution.execution_context.put_int(ITERATION_KEY, done);
        debug!("Sleep iteration {}/{}", done, self.iterations);

        if done >= i64::from(self.iterations) {
            Ok(RepeatStatus::Finished)
        } else {
            Ok(RepeatStatus::Continuable)
        }
    }
}
