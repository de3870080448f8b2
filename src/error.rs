use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    #[error("ItemReader from: {0}")]
    ItemReader(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    /// Failure reported by a sink. `item` is the index, within the chunk, of the
    /// item that caused it when the sink is able to tell.
    #[error("ItemWriter from: {message}")]
    ItemWriter { message: String, item: Option<usize> },

    #[error("Job instance already completed: {0}")]
    DuplicateRun(String),

    #[error("Job execution already running: {0}")]
    JobExecutionAlreadyRunning(String),

    #[error("JobRepository from: {0}")]
    Repository(String),

    #[error("Listener from: {0}")]
    Listener(String),

    #[error("Tasklet from: {0}")]
    Tasklet(String),

    #[error("Step failed: {0}")]
    Step(String),

    #[error("Transaction from: {0}")]
    Transaction(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BatchError {
    /// Sink failure without knowledge of the offending item.
    pub fn writer(message: impl Into<String>) -> Self {
        BatchError::ItemWriter {
            message: message.into(),
            item: None,
        }
    }

    /// Sink failure caused by the item at `index` within the written chunk.
    pub fn writer_at(index: usize, message: impl Into<String>) -> Self {
        BatchError::ItemWriter {
            message: message.into(),
            item: Some(index),
        }
    }

    /// Returns true for errors that must stop the whole job regardless of policy.
    pub fn is_repository(&self) -> bool {
        matches!(self, BatchError::Repository(_))
    }
}
