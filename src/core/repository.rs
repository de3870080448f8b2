//! Durable storage of job and step execution records.
//!
//! Repositories are shared by every launch of a [`JobLauncher`](super::launcher::JobLauncher),
//! possibly from several threads, so implementations isolate the records of
//! distinct run signatures from each other.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use log::{debug, info};
use uuid::Uuid;

use crate::error::BatchError;

use super::{
    execution::{BatchStatus, JobExecution, StepExecution},
    parameters::{JobParameters, JobSignature},
};

pub trait JobRepository: Send + Sync {
    /// Records a new execution for the signature of `job_name` and `parameters`.
    ///
    /// When the latest execution of that signature failed or was stopped, the
    /// new execution resumes it and inherits its job-scoped context.
    ///
    /// # Errors
    /// - `BatchError::DuplicateRun` when the signature already completed
    /// - `BatchError::JobExecutionAlreadyRunning` when it is still running
    fn create_or_resume_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError>;

    fn save_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError>;

    /// Stores the step execution inside the record of its owning job execution.
    fn save_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError>;

    fn find_latest_execution(
        &self,
        signature: &JobSignature,
    ) -> Result<Option<JobExecution>, BatchError>;

    /// Latest execution of `step_name` across every execution of the signature.
    fn find_last_step_execution(
        &self,
        signature: &JobSignature,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError>;

    /// Latest execution of any signature of the job, used to compute the next
    /// run parameters.
    fn find_latest_execution_by_name(
        &self,
        job_name: &str,
    ) -> Result<Option<JobExecution>, BatchError>;
}

/// Decides what a launch of `parameters` turns into, given the latest
/// execution of the same signature.
pub fn resolve_execution(
    job_name: &str,
    parameters: &JobParameters,
    latest: Option<&JobExecution>,
) -> Result<JobExecution, BatchError> {
    match latest {
        None => Ok(JobExecution::new(job_name, parameters.clone())),
        Some(previous) if previous.status == BatchStatus::Completed => {
            Err(BatchError::DuplicateRun(previous.signature.to_string()))
        }
        Some(previous) if previous.status.is_running() => Err(
            BatchError::JobExecutionAlreadyRunning(previous.signature.to_string()),
        ),
        Some(previous) => {
            info!(
                "Resuming {} execution {} of {}",
                previous.status, previous.id, previous.signature
            );
            let mut execution = JobExecution::resume_from(previous);
            execution.parameters = parameters.clone();
            Ok(execution)
        }
    }
}

/// Searches executions, newest last, for the latest run of `step_name`.
pub(crate) fn last_step_execution<'a>(
    executions: impl DoubleEndedIterator<Item = &'a JobExecution>,
    step_name: &str,
) -> Option<StepExecution> {
    executions
        .rev()
        .find_map(|execution| execution.step_execution(step_name))
        .cloned()
}

#[derive(Default)]
struct Store {
    /// Executions per signature key, oldest first
    lineages: HashMap<String, Vec<JobExecution>>,
    /// Signature key of every execution id
    index: HashMap<Uuid, String>,
    /// Execution ids in creation order
    created: Vec<Uuid>,
}

impl Store {
    fn execution_mut(&mut self, id: &Uuid) -> Option<&mut JobExecution> {
        let key = self.index.get(id)?;
        self.lineages
            .get_mut(key)?
            .iter_mut()
            .find(|execution| execution.id == *id)
    }

    fn execution(&self, id: &Uuid) -> Option<&JobExecution> {
        let key = self.index.get(id)?;
        self.lineages
            .get(key)?
            .iter()
            .find(|execution| execution.id == *id)
    }
}

/// Repository keeping every record in memory.
#[derive(Default)]
pub struct InMemoryJobRepository {
    store: Mutex<Store>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>, BatchError> {
        self.store
            .lock()
            .map_err(|error| BatchError::Repository(format!("store lock poisoned: {}", error)))
    }

    /// Every execution of the signature, oldest first.
    pub fn executions(&self, signature: &JobSignature) -> Result<Vec<JobExecution>, BatchError> {
        let store = self.lock()?;
        Ok(store
            .lineages
            .get(&signature.key())
            .cloned()
            .unwrap_or_default())
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_or_resume_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        let signature = JobSignature::new(job_name, parameters);
        let key = signature.key();

        let mut store = self.lock()?;
        let execution = resolve_execution(
            job_name,
            parameters,
            store.lineages.get(&key).and_then(|lineage| lineage.last()),
        )?;

        debug!("Created job execution {} for {}", execution.id, key);
        store.index.insert(execution.id, key.clone());
        store.created.push(execution.id);
        store
            .lineages
            .entry(key)
            .or_default()
            .push(execution.clone());

        Ok(execution)
    }

    fn save_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        let mut store = self.lock()?;
        match store.execution_mut(&job_execution.id) {
            Some(existing) => {
                *existing = job_execution.clone();
                Ok(())
            }
            None => Err(BatchError::Repository(format!(
                "unknown job execution {}",
                job_execution.id
            ))),
        }
    }

    fn save_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        let mut store = self.lock()?;
        match store.execution_mut(&step_execution.job_execution_id) {
            Some(job_execution) => {
                job_execution.upsert_step_execution(step_execution);
                Ok(())
            }
            None => Err(BatchError::Repository(format!(
                "unknown job execution {} for step {}",
                step_execution.job_execution_id, step_execution.name
            ))),
        }
    }

    fn find_latest_execution(
        &self,
        signature: &JobSignature,
    ) -> Result<Option<JobExecution>, BatchError> {
        let store = self.lock()?;
        Ok(store
            .lineages
            .get(&signature.key())
            .and_then(|lineage| lineage.last())
            .cloned())
    }

    fn find_last_step_execution(
        &self,
        signature: &JobSignature,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        let store = self.lock()?;
        Ok(store
            .lineages
            .get(&signature.key())
            .and_then(|lineage| last_step_execution(lineage.iter(), step_name)))
    }

    fn find_latest_execution_by_name(
        &self,
        job_name: &str,
    ) -> Result<Option<JobExecution>, BatchError> {
        let store = self.lock()?;
        Ok(store
            .created
            .iter()
            .rev()
            .filter_map(|id| store.execution(id))
            .find(|execution| execution.job_name == job_name)
            .cloned())
    }
}

#[cfg(feature = "json")]
pub use file::FileJobRepository;

#[cfg(feature = "json")]
mod file {
    use std::{
        collections::HashMap,
        fs,
        path::{Path, PathBuf},
        sync::{Mutex, MutexGuard},
    };

    use log::debug;
    use uuid::Uuid;

    use crate::{
        core::{
            execution::{JobExecution, StepExecution},
            parameters::{JobParameters, JobSignature},
        },
        error::BatchError,
    };

    use super::{JobRepository, last_step_execution, resolve_execution};

    /// Repository storing each signature lineage as one JSON document.
    ///
    /// File names are the hex encoded signature key, so every lineage lives in
    /// its own file and launches of distinct signatures never touch the same
    /// document.
    pub struct FileJobRepository {
        directory: PathBuf,
        /// Guards file access and maps execution ids to their document
        index: Mutex<HashMap<Uuid, PathBuf>>,
    }

    impl FileJobRepository {
        /// Opens a repository in `directory`, creating it when missing.
        pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, BatchError> {
            let directory = directory.as_ref().to_path_buf();
            fs::create_dir_all(&directory)?;
            Ok(Self {
                directory,
                index: Mutex::new(HashMap::new()),
            })
        }

        fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, PathBuf>>, BatchError> {
            self.index
                .lock()
                .map_err(|error| BatchError::Repository(format!("index lock poisoned: {}", error)))
        }

        fn path_of(&self, signature: &JobSignature) -> PathBuf {
            let encoded: String = signature
                .key()
                .bytes()
                .map(|byte| format!("{:02x}", byte))
                .collect();
            self.directory.join(format!("{}.json", encoded))
        }

        fn read(path: &Path) -> Result<Vec<JobExecution>, BatchError> {
            if !path.exists() {
                return Ok(Vec::new());
            }
            let content = fs::read(path).map_err(repository_error)?;
            serde_json::from_slice(&content).map_err(repository_error)
        }

        /// Writes to a temporary file first so a crash never leaves a torn document.
        fn write(path: &Path, lineage: &[JobExecution]) -> Result<(), BatchError> {
            let content = serde_json::to_vec_pretty(lineage).map_err(repository_error)?;
            let temporary = path.with_extension("json.tmp");
            fs::write(&temporary, content).map_err(repository_error)?;
            fs::rename(&temporary, path).map_err(repository_error)?;
            debug!("Persisted {}", path.display());
            Ok(())
        }

        /// Finds the document holding `id`, scanning the directory for
        /// executions created by another process.
        fn locate(
            &self,
            index: &mut HashMap<Uuid, PathBuf>,
            id: &Uuid,
        ) -> Result<PathBuf, BatchError> {
            if let Some(path) = index.get(id) {
                return Ok(path.clone());
            }

            for path in self.documents()? {
                if Self::read(&path)?.iter().any(|execution| execution.id == *id) {
                    index.insert(*id, path.clone());
                    return Ok(path);
                }
            }

            Err(BatchError::Repository(format!("unknown job execution {}", id)))
        }

        fn documents(&self) -> Result<Vec<PathBuf>, BatchError> {
            let mut documents = Vec::new();
            for entry in fs::read_dir(&self.directory).map_err(repository_error)? {
                let path = entry.map_err(repository_error)?.path();
                if path.extension().is_some_and(|extension| extension == "json") {
                    documents.push(path);
                }
            }
            Ok(documents)
        }

        fn update<F>(&self, id: &Uuid, change: F) -> Result<(), BatchError>
        where
            F: FnOnce(&mut JobExecution),
        {
            let mut index = self.lock()?;
            let path = self.locate(&mut index, id)?;
            let mut lineage = Self::read(&path)?;
            let execution = lineage
                .iter_mut()
                .find(|execution| execution.id == *id)
                .ok_or_else(|| BatchError::Repository(format!("unknown job execution {}", id)))?;
            change(execution);
            Self::write(&path, &lineage)
        }
    }

    fn repository_error<E: std::fmt::Display>(error: E) -> BatchError {
        BatchError::Repository(error.to_string())
    }

    impl JobRepository for FileJobRepository {
        fn create_or_resume_execution(
            &self,
            job_name: &str,
            parameters: &JobParameters,
        ) -> Result<JobExecution, BatchError> {
            let signature = JobSignature::new(job_name, parameters);
            let path = self.path_of(&signature);

            let mut index = self.lock()?;
            let mut lineage = Self::read(&path)?;
            let execution = resolve_execution(job_name, parameters, lineage.last())?;

            lineage.push(execution.clone());
            Self::write(&path, &lineage)?;
            index.insert(execution.id, path);

            Ok(execution)
        }

        fn save_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
            self.update(&job_execution.id, |existing| *existing = job_execution.clone())
        }

        fn save_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
            self.update(&step_execution.job_execution_id, |job_execution| {
                job_execution.upsert_step_execution(step_execution)
            })
        }

        fn find_latest_execution(
            &self,
            signature: &JobSignature,
        ) -> Result<Option<JobExecution>, BatchError> {
            let _index = self.lock()?;
            Ok(Self::read(&self.path_of(signature))?.pop())
        }

        fn find_last_step_execution(
            &self,
            signature: &JobSignature,
            step_name: &str,
        ) -> Result<Option<StepExecution>, BatchError> {
            let _index = self.lock()?;
            let lineage = Self::read(&self.path_of(signature))?;
            Ok(last_step_execution(lineage.iter(), step_name))
        }

        fn find_latest_execution_by_name(
            &self,
            job_name: &str,
        ) -> Result<Option<JobExecution>, BatchError> {
            let _index = self.lock()?;
            let mut latest: Option<JobExecution> = None;
            for path in self.documents()? {
                for execution in Self::read(&path)? {
                    if execution.job_name != job_name {
                        continue;
                    }
                    if latest
                        .as_ref()
                        .is_none_or(|current| execution.start_time >= current.start_time)
                    {
                        latest = Some(execution);
                    }
                }
            }
            Ok(latest)
        }
    }
}
