use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{error, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::BatchError;

use super::{
    execution::{BatchStatus, ExitStatus, JobExecution, JobExecutionResult},
    job::Job,
    parameters::{JobParameters, JobSignature},
    repository::JobRepository,
};

/// Cooperative cancellation flag shared between a launcher and a running job.
///
/// Steps only look at it between chunks, between tasklet iterations and
/// between steps, so a stop never interrupts a chunk transaction.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

struct RunningExecution {
    job_name: String,
    stop_signal: StopSignal,
}

/// Entry point running registered jobs against a shared repository.
pub struct JobLauncher {
    repository: Arc<dyn JobRepository>,
    jobs: HashMap<String, Arc<dyn Job>>,
    running: Mutex<HashMap<Uuid, RunningExecution>>,
}

impl JobLauncher {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self {
            repository,
            jobs: HashMap::new(),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a job definition under its name.
    pub fn register<J: Job + 'static>(&mut self, job: J) -> Result<(), BatchError> {
        let name = job.name().to_string();
        if self.jobs.contains_key(&name) {
            return Err(BatchError::Configuration(format!(
                "Job {} is already registered",
                name
            )));
        }
        self.jobs.insert(name, Arc::new(job));
        Ok(())
    }

    pub fn repository(&self) -> Arc<dyn JobRepository> {
        Arc::clone(&self.repository)
    }

    fn job(&self, job_name: &str) -> Result<Arc<dyn Job>, BatchError> {
        self.jobs
            .get(job_name)
            .cloned()
            .ok_or_else(|| BatchError::Configuration(format!("Unknown job {}", job_name)))
    }

    fn running(&self) -> MutexGuard<'_, HashMap<Uuid, RunningExecution>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs the job to a terminal status and returns its outcome.
    ///
    /// # Errors
    /// - `BatchError::Configuration` for an unknown job name
    /// - `BatchError::DuplicateRun` when the signature already completed
    /// - `BatchError::JobExecutionAlreadyRunning` when the signature is running
    /// - `BatchError::Repository` when execution records could not be persisted
    ///
    /// A job whose steps fail is not an error: the result carries `FAILED`.
    pub fn launch(
        &self,
        job_name: &str,
        parameters: JobParameters,
    ) -> Result<JobExecutionResult, BatchError> {
        self.launch_with_signal(job_name, parameters, StopSignal::new())
    }

    /// Same as [`launch`](Self::launch), with a caller-owned stop signal.
    pub fn launch_with_signal(
        &self,
        job_name: &str,
        parameters: JobParameters,
        stop_signal: StopSignal,
    ) -> Result<JobExecutionResult, BatchError> {
        let job = self.job(job_name)?;
        let mut execution = self
            .repository
            .create_or_resume_execution(job_name, &parameters)?;

        info!(
            "Launching job {} with execution {} and parameters {}",
            job_name, execution.id, execution.signature
        );

        self.running().insert(
            execution.id,
            RunningExecution {
                job_name: job_name.to_string(),
                stop_signal: stop_signal.clone(),
            },
        );

        let result = job.execute(&mut execution, self.repository.as_ref(), &stop_signal);
        self.running().remove(&execution.id);

        match result {
            Ok(()) => {
                info!(
                    "Job {} execution {} ended with status {}",
                    job_name, execution.id, execution.status
                );
                Ok(JobExecutionResult::from(execution))
            }
            Err(error) => {
                error!("Job {} execution {} aborted: {}", job_name, execution.id, error);
                Err(error)
            }
        }
    }

    /// Launches the job with the parameters its incrementer derives from the
    /// latest execution of that job.
    pub fn start_next_instance(&self, job_name: &str) -> Result<JobExecutionResult, BatchError> {
        let job = self.job(job_name)?;
        let incrementer = job.incrementer().ok_or_else(|| {
            BatchError::Configuration(format!("Job {} has no parameters incrementer", job_name))
        })?;

        let previous = self.repository.find_latest_execution_by_name(job_name)?;
        let parameters = incrementer.next(previous.as_ref().map(|execution| &execution.parameters));

        self.launch(job_name, parameters)
    }

    /// Asks a running execution to stop at its next chunk boundary.
    ///
    /// Returns `false` when no execution with that id is running.
    pub fn stop(&self, execution_id: &Uuid) -> bool {
        match self.running().get(execution_id) {
            Some(running) => {
                info!(
                    "Stop requested for job {} execution {}",
                    running.job_name, execution_id
                );
                running.stop_signal.request_stop();
                true
            }
            None => {
                warn!("No running execution {} to stop", execution_id);
                false
            }
        }
    }

    /// Marks the latest execution of a signature FAILED when it was left
    /// running by a process that no longer exists, so the lineage can resume.
    ///
    /// Its running step executions are failed as well; their contexts hold
    /// the last committed position and are inherited on restart.
    ///
    /// # Errors
    /// - `BatchError::JobExecutionAlreadyRunning` when this launcher runs it
    /// - `BatchError::Configuration` when the latest execution is not running
    pub fn abandon(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        let signature = JobSignature::new(job_name, parameters);
        let running = self.running();

        let mut execution = self
            .repository
            .find_latest_execution(&signature)?
            .filter(|execution| execution.status.is_running())
            .ok_or_else(|| {
                BatchError::Configuration(format!("No running execution of {}", signature))
            })?;

        if running.contains_key(&execution.id) {
            return Err(BatchError::JobExecutionAlreadyRunning(signature.to_string()));
        }

        let description = format!("Abandoned execution {}", execution.id);
        for step_execution in &mut execution.step_executions {
            if step_execution.status.is_running() {
                step_execution.finish(
                    BatchStatus::Failed,
                    ExitStatus::failed().with_description(description.clone()),
                );
            }
        }
        execution.finish(
            BatchStatus::Failed,
            ExitStatus::failed().with_description(description),
        );
        self.repository.save_job_execution(&execution)?;

        warn!("Abandoned job {} execution {}", job_name, execution.id);
        Ok(execution)
    }

    /// Ids and job names of the executions currently running.
    pub fn running_executions(&self) -> Vec<(Uuid, String)> {
        self.running()
            .iter()
            .map(|(id, running)| (*id, running.job_name.clone()))
            .collect()
    }

    /// Runs a launch on the blocking thread pool of the current tokio runtime.
    ///
    /// Launches of distinct signatures only share the repository, so any
    /// number of them can run at the same time.
    pub fn spawn(
        self: &Arc<Self>,
        job_name: &str,
        parameters: JobParameters,
    ) -> JoinHandle<Result<JobExecutionResult, BatchError>> {
        let launcher = Arc::clone(self);
        let job_name = job_name.to_string();
        tokio::task::spawn_blocking(move || launcher.launch(&job_name, parameters))
    }
}
