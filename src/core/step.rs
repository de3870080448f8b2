use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::BatchError;

use super::{
    chunk::{ChunkProcessor, DEFAULT_RETRY_LIMIT, DEFAULT_SKIP_LIMIT},
    context::ExecutionContext,
    execution::{BatchStatus, ExitStatus, StepExecution},
    item::{ItemProcessor, ItemReader, ItemWriter},
    launcher::StopSignal,
    listener::{AfterStepListener, ChunkListener, StepExecutionListener, handle_listener_result},
    parameters::JobParameters,
    policy::{AlwaysFatal, FailurePolicy},
    repository::JobRepository,
    transaction::{ResourcelessTransactionManager, TransactionManager},
};

/// Whether a repeatable unit of work wants to be called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The work can continue to execute.
    Continuable,
    /// The work has finished executing.
    Finished,
}

/// Everything a step needs from the running job besides its own execution.
pub struct StepContext<'a> {
    pub parameters: &'a JobParameters,
    /// Job-scoped context shared by all steps of the run
    pub job_context: &'a mut ExecutionContext,
    pub repository: &'a dyn JobRepository,
    pub stop_signal: &'a StopSignal,
}

pub trait Step: Send + Sync {
    fn get_name(&self) -> &str;

    /// Executes the step.
    ///
    /// # Returns
    /// - `Ok(())`: the step execution ended COMPLETED or STOPPED
    /// - `Err(BatchError)`: the step execution ended FAILED
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &mut StepContext<'_>,
    ) -> Result<(), BatchError>;
}

/// Lifecycle shared by every step kind: listeners, status transitions and
/// persistence around `body`, which returns the status the step ended with.
fn run_step<F>(
    listeners: &[Box<dyn StepExecutionListener>],
    listener_veto: bool,
    step_execution: &mut StepExecution,
    context: &mut StepContext<'_>,
    body: F,
) -> Result<(), BatchError>
where
    F: FnOnce(&mut StepExecution, &mut StepContext<'_>) -> Result<BatchStatus, BatchError>,
{
    info!(
        "Start of step: {}, id: {}",
        step_execution.name, step_execution.id
    );

    step_execution.status = BatchStatus::Started;
    context.repository.save_step_execution(step_execution)?;

    let mut before = Ok(());
    for listener in listeners {
        before = handle_listener_result(
            listener.before_step(step_execution, context.job_context),
            listener_veto,
            "before_step",
        )
        .map(|_| ());
        if before.is_err() {
            break;
        }
    }

    let outcome = before.and_then(|()| body(step_execution, context));

    let (mut status, mut exit_status, mut failure) = match outcome {
        Ok(BatchStatus::Stopped) => (
            BatchStatus::Stopped,
            ExitStatus::stopped().with_description("Stop requested"),
            None,
        ),
        Ok(_) => (BatchStatus::Completed, ExitStatus::completed(), None),
        Err(error) if error.is_repository() => {
            error!("Step {} aborted: {}", step_execution.name, error);
            step_execution.finish(
                BatchStatus::Failed,
                ExitStatus::failed().with_description(error.to_string()),
            );
            return Err(error);
        }
        Err(error) => {
            error!("Step {} failed: {}", step_execution.name, error);
            (
                BatchStatus::Failed,
                ExitStatus::failed().with_description(error.to_string()),
                Some(error),
            )
        }
    };

    step_execution.status = status;
    step_execution.exit_status = exit_status.clone();

    for listener in listeners {
        match listener.after_step(step_execution, context.job_context) {
            Ok(Some(overridden)) => exit_status = overridden,
            Ok(None) => {}
            Err(error) if listener_veto && failure.is_none() => {
                error!("Listener after_step vetoed step {}: {}", step_execution.name, error);
                status = BatchStatus::Failed;
                exit_status = ExitStatus::failed().with_description(error.to_string());
                failure = Some(BatchError::Listener(format!("after_step: {}", error)));
            }
            Err(error) => warn!("Listener after_step failed: {}", error),
        }
    }

    step_execution.finish(status, exit_status);
    context.repository.save_step_execution(step_execution)?;

    info!(
        "End of step: {}, id: {}, status: {}",
        step_execution.name, step_execution.id, step_execution.status
    );

    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

type ReaderFactory<I> =
    Box<dyn Fn(&JobParameters) -> Result<Box<dyn ItemReader<I>>, BatchError> + Send + Sync>;

/// Step that reads, processes and writes items in chunks.
pub struct ChunkOrientedStep<I, O> {
    name: String,
    /// Creates a fresh source for every execution of the step
    reader_factory: ReaderFactory<I>,
    processor: Arc<dyn ItemProcessor<I, O> + Send + Sync>,
    writer: Arc<dyn ItemWriter<O> + Send + Sync>,
    transaction_manager: Arc<dyn TransactionManager>,
    failure_policy: Arc<dyn FailurePolicy>,
    listeners: Vec<Box<dyn StepExecutionListener>>,
    chunk_listeners: Vec<Box<dyn ChunkListener>>,
    /// Number of items per transaction
    chunk_size: usize,
    retry_limit: usize,
    skip_limit: usize,
    listener_veto: bool,
}

impl<I, O> ChunkOrientedStep<I, O> {
    fn run_chunks(
        &self,
        reader: &dyn ItemReader<I>,
        step_execution: &mut StepExecution,
        context: &mut StepContext<'_>,
    ) -> Result<BatchStatus, BatchError> {
        let processor = ChunkProcessor::new(
            reader,
            self.processor.as_ref(),
            self.writer.as_ref(),
            self.chunk_size,
        )
        .transaction_manager(self.transaction_manager.as_ref())
        .failure_policy(self.failure_policy.as_ref())
        .chunk_listeners(&self.chunk_listeners)
        .limits(self.retry_limit, self.skip_limit)
        .listener_veto(self.listener_veto);

        loop {
            if context.stop_signal.is_stop_requested() {
                info!("Stop requested, step {} stops at chunk boundary", self.name);
                return Ok(BatchStatus::Stopped);
            }

            match processor.process(step_execution, context.job_context)? {
                RepeatStatus::Continuable => {
                    context.repository.save_step_execution(step_execution)?;
                }
                RepeatStatus::Finished => return Ok(BatchStatus::Completed),
            }
        }
    }

    /// Helper method to handle errors from operations that must not fail the step.
    fn manage_error(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

impl<I, O> Step for ChunkOrientedStep<I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &mut StepContext<'_>,
    ) -> Result<(), BatchError> {
        run_step(
            &self.listeners,
            self.listener_veto,
            step_execution,
            context,
            |step_execution, context| {
                let reader = (self.reader_factory)(context.parameters)?;
                reader.open(&step_execution.execution_context)?;
                self.writer.open()?;

                let result = self.run_chunks(reader.as_ref(), step_execution, context);

                Self::manage_error(reader.close());
                Self::manage_error(self.writer.close());
                result
            },
        )
    }
}

/// Builder for [`ChunkOrientedStep`], validated once in [`build`](Self::build).
pub struct ChunkOrientedStepBuilder<I, O> {
    name: String,
    reader_factory: Option<ReaderFactory<I>>,
    processor: Option<Arc<dyn ItemProcessor<I, O> + Send + Sync>>,
    writer: Option<Arc<dyn ItemWriter<O> + Send + Sync>>,
    transaction_manager: Arc<dyn TransactionManager>,
    failure_policy: Arc<dyn FailurePolicy>,
    listeners: Vec<Box<dyn StepExecutionListener>>,
    chunk_listeners: Vec<Box<dyn ChunkListener>>,
    chunk_size: usize,
    retry_limit: usize,
    skip_limit: usize,
    listener_veto: bool,
}

impl<I: 'static, O: 'static> ChunkOrientedStepBuilder<I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader_factory: None,
            processor: None,
            writer: None,
            transaction_manager: Arc::new(ResourcelessTransactionManager),
            failure_policy: Arc::new(AlwaysFatal),
            listeners: Vec::new(),
            chunk_listeners: Vec::new(),
            chunk_size: 10,
            retry_limit: DEFAULT_RETRY_LIMIT,
            skip_limit: DEFAULT_SKIP_LIMIT,
            listener_veto: false,
        }
    }

    /// Sets the factory creating the source of each step execution from the
    /// job parameters.
    pub fn reader<R, F>(mut self, factory: F) -> Self
    where
        R: ItemReader<I> + 'static,
        F: Fn(&JobParameters) -> Result<R, BatchError> + Send + Sync + 'static,
    {
        self.reader_factory = Some(Box::new(move |parameters: &JobParameters| {
            factory(parameters).map(|reader| Box::new(reader) as Box<dyn ItemReader<I>>)
        }));
        self
    }

    pub fn processor<P>(mut self, processor: P) -> Self
    where
        P: ItemProcessor<I, O> + Send + Sync + 'static,
    {
        self.processor = Some(Arc::new(processor));
        self
    }

    pub fn writer<W>(mut self, writer: W) -> Self
    where
        W: ItemWriter<O> + Send + Sync + 'static,
    {
        self.writer = Some(Arc::new(writer));
        self
    }

    pub fn transaction_manager<T>(mut self, transaction_manager: T) -> Self
    where
        T: TransactionManager + 'static,
    {
        self.transaction_manager = Arc::new(transaction_manager);
        self
    }

    pub fn failure_policy<P>(mut self, failure_policy: P) -> Self
    where
        P: FailurePolicy + 'static,
    {
        self.failure_policy = Arc::new(failure_policy);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: StepExecutionListener + 'static,
    {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn chunk_listener<L>(mut self, listener: L) -> Self
    where
        L: ChunkListener + 'static,
    {
        self.chunk_listeners.push(Box::new(listener));
        self
    }

    /// Registers a closure called once the step has ended.
    pub fn after_step<F>(self, callback: F) -> Self
    where
        F: Fn(&mut StepExecution, &mut ExecutionContext) -> Result<Option<ExitStatus>, BatchError>
            + Send
            + Sync
            + 'static,
    {
        self.listener(AfterStepListener::new(callback))
    }

    /// When set, a failing listener fails the step instead of being logged.
    pub fn listener_veto(mut self, listener_veto: bool) -> Self {
        self.listener_veto = listener_veto;
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<I, O>, BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "Chunk size of step {} must be greater than 0",
                self.name
            )));
        }

        let reader_factory = self.reader_factory.ok_or_else(|| {
            BatchError::Configuration(format!("Reader is required for step {}", self.name))
        })?;
        let processor = self.processor.ok_or_else(|| {
            BatchError::Configuration(format!("Processor is required for step {}", self.name))
        })?;
        let writer = self.writer.ok_or_else(|| {
            BatchError::Configuration(format!("Writer is required for step {}", self.name))
        })?;

        debug!(
            "Built chunk step {} with commit interval {}",
            self.name, self.chunk_size
        );

        Ok(ChunkOrientedStep {
            name: self.name,
            reader_factory,
            processor,
            writer,
            transaction_manager: self.transaction_manager,
            failure_policy: self.failure_policy,
            listeners: self.listeners,
            chunk_listeners: self.chunk_listeners,
            chunk_size: self.chunk_size,
            retry_limit: self.retry_limit,
            skip_limit: self.skip_limit,
            listener_veto: self.listener_veto,
        })
    }
}

/// A single unit of work called repeatedly until it reports `Finished`.
pub trait Tasklet: Send + Sync {
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        job_context: &mut ExecutionContext,
    ) -> Result<RepeatStatus, BatchError>;
}

impl<F> Tasklet for F
where
    F: Fn(&mut StepExecution, &mut ExecutionContext) -> Result<RepeatStatus, BatchError>
        + Send
        + Sync,
{
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        job_context: &mut ExecutionContext,
    ) -> Result<RepeatStatus, BatchError> {
        self(step_execution, job_context)
    }
}

pub struct TaskletStep {
    name: String,
    tasklet: Box<dyn Tasklet>,
    transaction_manager: Arc<dyn TransactionManager>,
    listeners: Vec<Box<dyn StepExecutionListener>>,
    listener_veto: bool,
}

impl TaskletStep {
    /// Calls the tasklet until it is finished, one transaction per call.
    fn run_tasklet(
        &self,
        step_execution: &mut StepExecution,
        context: &mut StepContext<'_>,
    ) -> Result<BatchStatus, BatchError> {
        loop {
            if context.stop_signal.is_stop_requested() {
                info!("Stop requested, tasklet step {} stops", self.name);
                return Ok(BatchStatus::Stopped);
            }

            let step_snapshot = step_execution.execution_context.clone();
            let job_snapshot = context.job_context.clone();

            self.transaction_manager.begin()?;
            let status = match self.tasklet.execute(step_execution, context.job_context) {
                Ok(status) => {
                    self.transaction_manager.commit()?;
                    step_execution.commit_count += 1;
                    status
                }
                Err(error) => {
                    // Context changes of the failed call are rolled back with it.
                    step_execution.execution_context = step_snapshot;
                    *context.job_context = job_snapshot;
                    step_execution.rollback_count += 1;
                    self.transaction_manager.rollback()?;
                    return Err(error);
                }
            };
            context.repository.save_step_execution(step_execution)?;

            if status == RepeatStatus::Finished {
                return Ok(BatchStatus::Completed);
            }
            debug!("Tasklet of step {} is continuable", self.name);
        }
    }
}

impl Step for TaskletStep {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &mut StepContext<'_>,
    ) -> Result<(), BatchError> {
        run_step(
            &self.listeners,
            self.listener_veto,
            step_execution,
            context,
            |step_execution, context| self.run_tasklet(step_execution, context),
        )
    }
}

pub struct TaskletStepBuilder {
    name: String,
    tasklet: Box<dyn Tasklet>,
    transaction_manager: Arc<dyn TransactionManager>,
    listeners: Vec<Box<dyn StepExecutionListener>>,
    listener_veto: bool,
}

impl TaskletStepBuilder {
    pub fn new<T: Tasklet + 'static>(name: &str, tasklet: T) -> Self {
        Self {
            name: name.to_string(),
            tasklet: Box::new(tasklet),
            transaction_manager: Arc::new(ResourcelessTransactionManager),
            listeners: Vec::new(),
            listener_veto: false,
        }
    }

    pub fn transaction_manager<T>(mut self, transaction_manager: T) -> Self
    where
        T: TransactionManager + 'static,
    {
        self.transaction_manager = Arc::new(transaction_manager);
        self
    }

    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: StepExecutionListener + 'static,
    {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn after_step<F>(self, callback: F) -> Self
    where
        F: Fn(&mut StepExecution, &mut ExecutionContext) -> Result<Option<ExitStatus>, BatchError>
            + Send
            + Sync
            + 'static,
    {
        self.listener(AfterStepListener::new(callback))
    }

    pub fn listener_veto(mut self, listener_veto: bool) -> Self {
        self.listener_veto = listener_veto;
        self
    }

    pub fn build(self) -> Result<TaskletStep, BatchError> {
        if self.name.is_empty() {
            return Err(BatchError::Configuration(
                "Tasklet step name must not be empty".to_string(),
            ));
        }

        Ok(TaskletStep {
            name: self.name,
            tasklet: self.tasklet,
            transaction_manager: self.transaction_manager,
            listeners: self.listeners,
            listener_veto: self.listener_veto,
        })
    }
}

/// Entry point for configuring a step.
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn tasklet<T: Tasklet + 'static>(self, tasklet: T) -> TaskletStepBuilder {
        TaskletStepBuilder::new(&self.name, tasklet)
    }

    pub fn chunk<I: 'static, O: 'static>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}
