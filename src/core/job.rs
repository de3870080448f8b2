use std::collections::HashSet;

use log::{error, info, warn};

use crate::BatchError;

use super::{
    execution::{BatchStatus, ExitStatus, JobExecution, StepExecution},
    launcher::StopSignal,
    listener::JobExecutionListener,
    parameters::JobParametersIncrementer,
    repository::JobRepository,
    step::{Step, StepContext},
};

/// A named, ordered sequence of steps.
///
/// Job definitions are immutable and can be executed many times; every run is
/// recorded as a separate [`JobExecution`].
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Derives the parameters of the next run, see
    /// [`JobLauncher::start_next_instance`](super::launcher::JobLauncher::start_next_instance).
    fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        None
    }

    /// Runs the steps of the job and leaves `job_execution` in a terminal status.
    ///
    /// # Returns
    /// - `Ok(())`: the execution ended COMPLETED, FAILED or STOPPED
    /// - `Err(BatchError::Repository)`: execution records could not be
    ///   persisted and the run was aborted
    fn execute(
        &self,
        job_execution: &mut JobExecution,
        repository: &dyn JobRepository,
        stop_signal: &StopSignal,
    ) -> Result<(), BatchError>;
}

/// Job running its steps one after the other, halting at the first failure.
pub struct SimpleJob {
    name: String,
    steps: Vec<Box<dyn Step>>,
    listeners: Vec<Box<dyn JobExecutionListener>>,
    incrementer: Option<Box<dyn JobParametersIncrementer>>,
}

impl SimpleJob {
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.get_name()).collect()
    }

    /// Runs the steps in order, resuming after the ones a previous execution
    /// of the same signature completed.
    fn run_steps(
        &self,
        job_execution: &mut JobExecution,
        repository: &dyn JobRepository,
        stop_signal: &StopSignal,
    ) -> Result<(BatchStatus, ExitStatus), BatchError> {
        for step in &self.steps {
            let step_name = step.get_name();

            if stop_signal.is_stop_requested() {
                info!("Stop requested, job {} stops before step {}", self.name, step_name);
                return Ok((
                    BatchStatus::Stopped,
                    ExitStatus::stopped().with_description(format!("Stopped before step {}", step_name)),
                ));
            }

            let previous = repository.find_last_step_execution(&job_execution.signature, step_name)?;
            let mut step_execution = StepExecution::new(step_name, job_execution.id);
            match previous {
                Some(previous) if previous.status == BatchStatus::Completed => {
                    info!("Step {} already completed, skipping", step_name);
                    continue;
                }
                Some(previous) => {
                    info!(
                        "Resuming step {} from its {} execution {}",
                        step_name, previous.status, previous.id
                    );
                    step_execution.execution_context = previous.execution_context;
                }
                None => {}
            }
            job_execution.upsert_step_execution(&step_execution);

            let result = {
                let mut context = StepContext {
                    parameters: &job_execution.parameters,
                    job_context: &mut job_execution.execution_context,
                    repository,
                    stop_signal,
                };
                step.execute(&mut step_execution, &mut context)
            };
            job_execution.upsert_step_execution(&step_execution);

            match result {
                Err(error) if error.is_repository() => return Err(error),
                Err(error) => {
                    repository.save_job_execution(job_execution)?;
                    return Ok((
                        BatchStatus::Failed,
                        ExitStatus::failed()
                            .with_description(format!("Step {} failed: {}", step_name, error)),
                    ));
                }
                Ok(()) if step_execution.status == BatchStatus::Stopped => {
                    repository.save_job_execution(job_execution)?;
                    return Ok((
                        BatchStatus::Stopped,
                        ExitStatus::stopped()
                            .with_description(format!("Stopped in step {}", step_name)),
                    ));
                }
                Ok(()) => repository.save_job_execution(job_execution)?,
            }
        }

        Ok((BatchStatus::Completed, ExitStatus::completed()))
    }
}

impl Job for SimpleJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        self.incrementer.as_deref()
    }

    fn execute(
        &self,
        job_execution: &mut JobExecution,
        repository: &dyn JobRepository,
        stop_signal: &StopSignal,
    ) -> Result<(), BatchError> {
        info!("Start of job: {}, id: {}", self.name, job_execution.id);

        job_execution.status = BatchStatus::Started;
        repository.save_job_execution(job_execution)?;

        for listener in &self.listeners {
            if let Err(error) = listener.before_job(job_execution) {
                warn!("Listener before_job failed: {}", error);
            }
        }

        let (status, exit_status) = match self.run_steps(job_execution, repository, stop_signal) {
            Ok(outcome) => outcome,
            Err(error) => {
                error!("Job {} aborted: {}", self.name, error);
                job_execution.finish(
                    BatchStatus::Failed,
                    ExitStatus::failed().with_description(error.to_string()),
                );
                if let Err(save_error) = repository.save_job_execution(job_execution) {
                    warn!("Could not record the aborted job execution: {}", save_error);
                }
                return Err(error);
            }
        };

        job_execution.finish(status, exit_status);

        for listener in &self.listeners {
            if let Err(error) = listener.after_job(job_execution) {
                warn!("Listener after_job failed: {}", error);
            }
        }

        repository.save_job_execution(job_execution)?;

        info!(
            "End of job: {}, id: {}, status: {}",
            self.name, job_execution.id, job_execution.status
        );

        Ok(())
    }
}

/// Builder for [`SimpleJob`].
///
/// # Example
///
/// ```rust,no_run
/// use chunk_batch::core::{
///     context::ExecutionContext,
///     execution::StepExecution,
///     job::JobBuilder,
///     parameters::RunIdIncrementer,
///     step::{RepeatStatus, StepBuilder},
/// };
/// use chunk_batch::BatchError;
///
/// fn hello(_: &mut StepExecution, _: &mut ExecutionContext) -> Result<RepeatStatus, BatchError> {
///     println!("Hello");
///     Ok(RepeatStatus::Finished)
/// }
///
/// let job = JobBuilder::new("hello-job")
///     .start(StepBuilder::new("hello").tasklet(hello).build()?)
///     .incrementer(RunIdIncrementer)
///     .build()?;
/// # Ok::<(), BatchError>(())
/// ```
pub struct JobBuilder {
    name: String,
    steps: Vec<Box<dyn Step>>,
    listeners: Vec<Box<dyn JobExecutionListener>>,
    incrementer: Option<Box<dyn JobParametersIncrementer>>,
}

impl JobBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: Vec::new(),
            listeners: Vec::new(),
            incrementer: None,
        }
    }

    /// Sets the first step of the job.
    pub fn start<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.insert(0, Box::new(step));
        self
    }

    /// Appends a step after the ones already configured.
    pub fn next<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn incrementer<P: JobParametersIncrementer + 'static>(mut self, incrementer: P) -> Self {
        self.incrementer = Some(Box::new(incrementer));
        self
    }

    pub fn listener<L: JobExecutionListener + 'static>(mut self, listener: L) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn build(self) -> Result<SimpleJob, BatchError> {
        if self.name.is_empty() {
            return Err(BatchError::Configuration(
                "Job name must not be empty".to_string(),
            ));
        }

        if self.steps.is_empty() {
            return Err(BatchError::Configuration(format!(
                "Job {} needs at least one step",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.get_name()) {
                return Err(BatchError::Configuration(format!(
                    "Job {} has more than one step named {}",
                    self.name,
                    step.get_name()
                )));
            }
        }

        Ok(SimpleJob {
            name: self.name,
            steps: self.steps,
            listeners: self.listeners,
            incrementer: self.incrementer,
        })
    }
}
