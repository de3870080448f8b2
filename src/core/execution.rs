use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    context::ExecutionContext,
    parameters::{JobParameters, JobSignature},
};

/// Lifecycle status shared by job and step executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Status of a batch job prior to its execution.
    Starting,
    /// Status of a batch job that is running.
    Started,
    /// The batch job has successfully completed its execution.
    Completed,
    /// Status of a batch job that has failed during its execution.
    Failed,
    /// Status of a batch job that has been stopped by request.
    Stopped,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, BatchStatus::Starting | BatchStatus::Started)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Stopped => "STOPPED",
        };
        f.write_str(label)
    }
}

/// Outcome code and human readable description of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    fn code(exit_code: &str) -> Self {
        Self {
            exit_code: exit_code.to_string(),
            exit_description: String::new(),
        }
    }

    pub fn executing() -> Self {
        Self::code("EXECUTING")
    }

    pub fn completed() -> Self {
        Self::code("COMPLETED")
    }

    pub fn failed() -> Self {
        Self::code("FAILED")
    }

    pub fn stopped() -> Self {
        Self::code("STOPPED")
    }

    pub fn unknown() -> Self {
        Self::code("UNKNOWN")
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.exit_description = description.into();
        self
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exit_description.is_empty() {
            f.write_str(&self.exit_code)
        } else {
            write!(f, "{}: {}", self.exit_code, self.exit_description)
        }
    }
}

/// One run of a step within a [`JobExecution`].
///
/// Counters only ever reflect committed chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    /// Name of the step definition
    pub name: String,
    /// Owning job execution (non-owning back reference)
    pub job_execution_id: Uuid,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Number of items read and part of a committed chunk
    pub read_count: usize,
    /// Number of items handed to the sink in committed chunks
    pub write_count: usize,
    /// Number of items dropped by the processor
    pub filter_count: usize,
    pub process_skip_count: usize,
    pub write_skip_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    /// Step-scoped context
    pub execution_context: ExecutionContext,
}

impl StepExecution {
    pub fn new(name: &str, job_execution_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            job_execution_id,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            start_time: Utc::now(),
            end_time: None,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            execution_context: ExecutionContext::new(),
        }
    }

    pub fn skip_count(&self) -> usize {
        self.process_skip_count + self.write_skip_count
    }

    /// Seals the execution with its terminal status.
    pub fn finish(&mut self, status: BatchStatus, exit_status: ExitStatus) {
        self.status = status;
        self.exit_status = exit_status;
        self.end_time = Some(Utc::now());
    }
}

/// One invocation of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    /// Unique identifier of this run
    pub id: Uuid,
    pub job_name: String,
    pub parameters: JobParameters,
    pub signature: JobSignature,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Job-scoped context
    pub execution_context: ExecutionContext,
    /// Steps attempted by this run, in execution order
    pub step_executions: Vec<StepExecution>,
    /// Execution this one resumes, when restarting a failed or stopped run
    pub restart_of: Option<Uuid>,
}

impl JobExecution {
    pub fn new(job_name: &str, parameters: JobParameters) -> Self {
        let signature = JobSignature::new(job_name, &parameters);
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            parameters,
            signature,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            start_time: Utc::now(),
            end_time: None,
            execution_context: ExecutionContext::new(),
            step_executions: Vec::new(),
            restart_of: None,
        }
    }

    /// Creates the next execution of a failed or stopped lineage, carrying the
    /// persisted job-scoped context forward.
    pub fn resume_from(previous: &JobExecution) -> Self {
        let mut execution = JobExecution::new(&previous.job_name, previous.parameters.clone());
        execution.execution_context = previous.execution_context.clone();
        execution.restart_of = Some(previous.id);
        execution
    }

    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|step_execution| step_execution.name == step_name)
    }

    /// Inserts or replaces the step execution with the same id.
    pub fn upsert_step_execution(&mut self, step_execution: &StepExecution) {
        match self
            .step_executions
            .iter_mut()
            .find(|existing| existing.id == step_execution.id)
        {
            Some(existing) => *existing = step_execution.clone(),
            None => self.step_executions.push(step_execution.clone()),
        }
    }

    pub fn finish(&mut self, status: BatchStatus, exit_status: ExitStatus) {
        self.status = status;
        self.exit_status = exit_status;
        self.end_time = Some(Utc::now());
    }
}

/// What a caller of `JobLauncher::launch` gets back.
#[derive(Debug, Clone)]
pub struct JobExecutionResult {
    pub status: BatchStatus,
    /// Summary of the first fatal cause, empty on success
    pub exit_description: String,
    /// Full record of the run, including per step counters
    pub execution: JobExecution,
}

impl JobExecutionResult {
    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    pub fn step(&self, step_name: &str) -> Option<&StepExecution> {
        self.execution.step_execution(step_name)
    }
}

impl From<JobExecution> for JobExecutionResult {
    fn from(execution: JobExecution) -> Self {
        Self {
            status: execution.status,
            exit_description: execution.exit_status.exit_description.clone(),
            execution,
        }
    }
}
