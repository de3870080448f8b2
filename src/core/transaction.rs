use log::debug;

use crate::error::BatchError;

/// Transaction boundary opened by the engine around every chunk write.
///
/// Sinks that have durable state expose it through this trait so that a
/// failed chunk leaves no trace: the engine calls `begin`, hands the chunk
/// to the writer, then either `commit` or `rollback`.
pub trait TransactionManager: Send + Sync {
    fn begin(&self) -> Result<(), BatchError>;

    fn commit(&self) -> Result<(), BatchError>;

    fn rollback(&self) -> Result<(), BatchError>;

    /// Whether `rollback` discards everything written since `begin`.
    ///
    /// Trial writes used to find an item the sink rejects without naming it
    /// are only made when this holds.
    fn supports_rollback(&self) -> bool {
        true
    }
}

/// Transaction manager for sinks without transactional resources.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourcelessTransactionManager;

impl TransactionManager for ResourcelessTransactionManager {
    fn begin(&self) -> Result<(), BatchError> {
        debug!("Begin resourceless transaction");
        Ok(())
    }

    fn commit(&self) -> Result<(), BatchError> {
        debug!("Commit resourceless transaction");
        Ok(())
    }

    fn rollback(&self) -> Result<(), BatchError> {
        debug!("Rollback resourceless transaction");
        Ok(())
    }

    fn supports_rollback(&self) -> bool {
        false
    }
}
