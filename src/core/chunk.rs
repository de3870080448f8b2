use std::slice;

use log::{debug, error, warn};

use crate::error::BatchError;

use super::{
    context::ExecutionContext,
    execution::StepExecution,
    item::{ItemProcessor, ItemReader, ItemWriter},
    listener::{ChunkListener, handle_listener_result},
    policy::{AlwaysFatal, FailureAction, FailurePolicy},
    step::RepeatStatus,
    transaction::{ResourcelessTransactionManager, TransactionManager},
};

/// Default number of chunk re-attempts for `Retry` classified errors.
pub const DEFAULT_RETRY_LIMIT: usize = 3;

/// Default number of items a step may skip before failing.
pub const DEFAULT_SKIP_LIMIT: usize = 10;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ChunkStatus {
    /// More items can be added.
    Continuable,
    /// The chunk reached its commit interval.
    Full,
    /// The source is exhausted.
    Finished,
}

/// Items pulled from the source for one read/write cycle. Never persisted.
pub struct Chunk<I> {
    items: Vec<I>,
    status: ChunkStatus,
    chunk_size: usize,
}

impl<I> Chunk<I> {
    pub fn new(chunk_size: usize) -> Chunk<I> {
        Chunk {
            items: Vec::with_capacity(chunk_size),
            status: ChunkStatus::Continuable,
            chunk_size,
        }
    }

    pub fn add_item(&mut self, item: I) {
        self.items.push(item);
        if self.items.len() >= self.chunk_size {
            self.status = ChunkStatus::Full;
        }
    }

    pub fn mark_finished(&mut self) {
        self.status = ChunkStatus::Finished;
    }

    pub fn get_items(&self) -> &[I] {
        &self.items
    }

    pub fn get_status(&self) -> ChunkStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True while more items should be pulled into this chunk.
    pub fn is_open(&self) -> bool {
        self.status == ChunkStatus::Continuable
    }
}

/// Counters earned by a chunk, applied to the step execution only on commit.
#[derive(Default)]
struct ChunkContribution {
    read: usize,
    written: usize,
    filtered: usize,
    process_skips: usize,
    write_skips: usize,
}

impl ChunkContribution {
    fn skips(&self) -> usize {
        self.process_skips + self.write_skips
    }

    fn apply(&self, step_execution: &mut StepExecution) {
        step_execution.read_count += self.read;
        step_execution.write_count += self.written;
        step_execution.filter_count += self.filtered;
        step_execution.process_skip_count += self.process_skips;
        step_execution.write_skip_count += self.write_skips;
        step_execution.commit_count += 1;
    }
}

/// Drives one chunk: pull, process, write under a transaction, commit.
///
/// A chunk is either fully committed or not visible at all: the sink only
/// ever sees the chunk inside a transaction that is rolled back on failure.
pub struct ChunkProcessor<'a, I, O> {
    reader: &'a dyn ItemReader<I>,
    processor: &'a dyn ItemProcessor<I, O>,
    writer: &'a dyn ItemWriter<O>,
    transaction_manager: &'a dyn TransactionManager,
    failure_policy: &'a dyn FailurePolicy,
    chunk_listeners: &'a [Box<dyn ChunkListener>],
    chunk_size: usize,
    retry_limit: usize,
    skip_limit: usize,
    listener_veto: bool,
}

impl<'a, I, O> ChunkProcessor<'a, I, O> {
    pub fn new(
        reader: &'a dyn ItemReader<I>,
        processor: &'a dyn ItemProcessor<I, O>,
        writer: &'a dyn ItemWriter<O>,
        chunk_size: usize,
    ) -> Self {
        Self {
            reader,
            processor,
            writer,
            transaction_manager: &ResourcelessTransactionManager,
            failure_policy: &AlwaysFatal,
            chunk_listeners: &[],
            chunk_size: chunk_size.max(1),
            retry_limit: DEFAULT_RETRY_LIMIT,
            skip_limit: DEFAULT_SKIP_LIMIT,
            listener_veto: false,
        }
    }

    pub fn transaction_manager(mut self, transaction_manager: &'a dyn TransactionManager) -> Self {
        self.transaction_manager = transaction_manager;
        self
    }

    pub fn failure_policy(mut self, failure_policy: &'a dyn FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn chunk_listeners(mut self, chunk_listeners: &'a [Box<dyn ChunkListener>]) -> Self {
        self.chunk_listeners = chunk_listeners;
        self
    }

    pub fn limits(mut self, retry_limit: usize, skip_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self.skip_limit = skip_limit;
        self
    }

    pub fn listener_veto(mut self, listener_veto: bool) -> Self {
        self.listener_veto = listener_veto;
        self
    }

    /// Processes one chunk.
    ///
    /// # Returns
    /// - `Ok(RepeatStatus::Continuable)`: a chunk was committed
    /// - `Ok(RepeatStatus::Finished)`: the source yielded nothing, the step is done
    /// - `Err(BatchError)`: the chunk was rolled back and the step must fail
    pub fn process(
        &self,
        step_execution: &mut StepExecution,
        job_context: &mut ExecutionContext,
    ) -> Result<RepeatStatus, BatchError> {
        for listener in self.chunk_listeners {
            handle_listener_result(
                listener.before_chunk(step_execution, job_context),
                self.listener_veto,
                "before_chunk",
            )?;
        }

        let chunk = self.read_chunk()?;
        if chunk.is_empty() {
            debug!("No more items to read, step {} finished", step_execution.name);
            return Ok(RepeatStatus::Finished);
        }

        let mut contribution = ChunkContribution {
            read: chunk.len(),
            ..ChunkContribution::default()
        };

        let outcome = self
            .process_chunk(&chunk, step_execution, &mut contribution)
            .and_then(|items| self.write_chunk(items, step_execution, &mut contribution));

        if let Err(error) = outcome {
            error!(
                "Chunk of {} items rolled back in step {}: {}",
                chunk.len(),
                step_execution.name,
                error
            );
            for listener in self.chunk_listeners {
                listener.after_chunk_error(step_execution, &error);
            }
            return Err(error);
        }

        contribution.apply(step_execution);
        self.reader.update(&mut step_execution.execution_context)?;
        debug!(
            "Committed chunk of {} items (read: {}, written: {})",
            chunk.len(),
            step_execution.read_count,
            step_execution.write_count
        );

        for listener in self.chunk_listeners {
            handle_listener_result(
                listener.after_chunk(step_execution, job_context),
                self.listener_veto,
                "after_chunk",
            )?;
        }

        Ok(RepeatStatus::Continuable)
    }

    /// Pulls up to `chunk_size` items. A read error discards the partial chunk.
    fn read_chunk(&self) -> Result<Chunk<I>, BatchError> {
        debug!("Start reading chunk");
        let mut chunk = Chunk::new(self.chunk_size);

        while chunk.is_open() {
            match self.reader.read() {
                Ok(Some(item)) => chunk.add_item(item),
                Ok(None) => chunk.mark_finished(),
                Err(error) => {
                    warn!("Error reading item: {}", error);
                    return Err(error);
                }
            }
        }

        debug!("End reading chunk: {:?}", chunk.get_status());
        Ok(chunk)
    }

    fn process_chunk(
        &self,
        chunk: &Chunk<I>,
        step_execution: &StepExecution,
        contribution: &mut ChunkContribution,
    ) -> Result<Vec<O>, BatchError> {
        debug!("Processing chunk of {} items", chunk.len());
        let mut processed = Vec::with_capacity(chunk.len());

        for item in chunk.get_items() {
            match self.processor.process(item) {
                Ok(Some(output)) => processed.push(output),
                Ok(None) => contribution.filtered += 1,
                Err(error) => match self.failure_policy.classify(&error) {
                    FailureAction::Skip => {
                        self.check_skip_limit(step_execution, contribution, &error)?;
                        warn!("Skipping item after processing error: {}", error);
                        contribution.process_skips += 1;
                    }
                    FailureAction::Retry | FailureAction::Fatal => return Err(error),
                },
            }
        }

        Ok(processed)
    }

    /// Writes the processed items, applying the failure policy until the chunk
    /// commits or the step has to fail.
    fn write_chunk(
        &self,
        mut items: Vec<O>,
        step_execution: &mut StepExecution,
        contribution: &mut ChunkContribution,
    ) -> Result<(), BatchError> {
        let mut retries = 0;

        loop {
            let error = match self.write_in_transaction(&items) {
                Ok(()) => {
                    contribution.written = items.len();
                    return Ok(());
                }
                Err(error) => error,
            };
            step_execution.rollback_count += 1;

            if matches!(error, BatchError::Transaction(_)) {
                return Err(error);
            }

            match self.failure_policy.classify(&error) {
                FailureAction::Fatal => return Err(error),
                FailureAction::Retry => {
                    if retries >= self.retry_limit {
                        warn!("Retry limit of {} reached", self.retry_limit);
                        return Err(error);
                    }
                    retries += 1;
                    warn!("Retrying chunk (attempt {}): {}", retries, error);
                }
                FailureAction::Skip => {
                    let offenders = match &error {
                        BatchError::ItemWriter {
                            item: Some(index), ..
                        } if *index < items.len() => vec![*index],
                        _ if !self.transaction_manager.supports_rollback() => {
                            return Err(BatchError::Step(format!(
                                "write error names no item and the transaction manager cannot roll back trial writes: {}",
                                error
                            )));
                        }
                        _ => self.scan_chunk(&items)?,
                    };

                    if offenders.is_empty() {
                        warn!("Write error could not be traced to a single item");
                        return Err(error);
                    }

                    // Highest index first so earlier positions stay valid.
                    for index in offenders.into_iter().rev() {
                        self.check_skip_limit(step_execution, contribution, &error)?;
                        warn!("Skipping item at position {} after write error: {}", index, error);
                        items.remove(index);
                        contribution.write_skips += 1;
                    }
                }
            }
        }
    }

    /// Writes each item alone in a transaction that is always rolled back, to
    /// find the items the sink rejects with a skippable error.
    fn scan_chunk(&self, items: &[O]) -> Result<Vec<usize>, BatchError> {
        debug!("Scanning chunk of {} items for skippable failures", items.len());
        let mut offenders = Vec::new();

        for (index, item) in items.iter().enumerate() {
            self.transaction_manager.begin()?;
            let result = self.writer.write(slice::from_ref(item));
            self.transaction_manager.rollback()?;

            if let Err(error) = result {
                match self.failure_policy.classify(&error) {
                    FailureAction::Skip => offenders.push(index),
                    FailureAction::Retry | FailureAction::Fatal => return Err(error),
                }
            }
        }

        Ok(offenders)
    }

    fn write_in_transaction(&self, items: &[O]) -> Result<(), BatchError> {
        self.transaction_manager.begin()?;

        let result = if items.is_empty() {
            debug!("No items to write, skipping write call");
            Ok(())
        } else {
            debug!("Writing chunk of {} items", items.len());
            self.writer.write(items).and_then(|()| self.writer.flush())
        };

        match result {
            Ok(()) => self.transaction_manager.commit(),
            Err(error) => {
                warn!("Error writing items: {}", error);
                if let Err(rollback_error) = self.transaction_manager.rollback() {
                    error!("Rollback failed: {}", rollback_error);
                    return Err(rollback_error);
                }
                Err(error)
            }
        }
    }

    fn check_skip_limit(
        &self,
        step_execution: &StepExecution,
        contribution: &ChunkContribution,
        error: &BatchError,
    ) -> Result<(), BatchError> {
        if step_execution.skip_count() + contribution.skips() >= self.skip_limit {
            warn!("Skip limit of {} reached", self.skip_limit);
            return Err(BatchError::Step(format!(
                "skip limit of {} exceeded: {}",
                self.skip_limit, error
            )));
        }
        Ok(())
    }
}
