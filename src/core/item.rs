use crate::error::BatchError;

use super::context::ExecutionContext;

/// Result of reading one item: `Ok(None)` marks the end of the stream.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item: `Ok(None)` filters the item out of the chunk.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

pub type ItemWriterResult = Result<(), BatchError>;

/// Lazily produces the input records of a step.
///
/// A fresh reader is created for every step execution, so implementations
/// can keep their cursor in interior mutable state.
pub trait ItemReader<I> {
    fn read(&self) -> ItemReaderResult<I>;

    /// Restores the reader position from the step context of a previous run.
    fn open(&self, _execution_context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    /// Records the position after a committed chunk into the step context.
    fn update(&self, _execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Transforms one read item into the item handed to the writer.
pub trait ItemProcessor<I, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Consumes one chunk of items.
///
/// `write` runs inside a transaction opened by the engine; a writer must not
/// commit or roll back on its own.
pub trait ItemWriter<O> {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Processor handing every item to the writer unchanged.
///
/// Chunk steps always name their processor; use this one when `I` and `O`
/// are the same type and no transformation is needed.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<I: Clone> ItemProcessor<I, I> for PassThroughProcessor {
    fn process(&self, item: &I) -> ItemProcessorResult<I> {
        Ok(Some(item.clone()))
    }
}

impl<I, O, F> ItemProcessor<I, O> for F
where
    F: Fn(&I) -> ItemProcessorResult<O>,
{
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        self(item)
    }
}
