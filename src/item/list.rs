use std::{
    cell::Cell,
    sync::{Arc, Mutex, MutexGuard},
};

use log::debug;

use crate::{
    BatchError,
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
        transaction::TransactionManager,
    },
};

/// Step context key holding the number of items already consumed.
pub const READ_COUNT_KEY: &str = "ListItemReader.read.count";

/// Reads the items of a vector, in order.
///
/// The position is saved after every committed chunk, so a restarted step
/// continues right after the last committed item.
pub struct ListItemReader<T> {
    items: Vec<T>,
    position: Cell<usize>,
}

impl<T: Clone> ListItemReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            position: Cell::new(0),
        }
    }

    pub fn position(&self) -> usize {
        self.position.get()
    }
}

impl<T: Clone> ItemReader<T> for ListItemReader<T> {
    fn read(&self) -> ItemReaderResult<T> {
        let position = self.position.get();
        match self.items.get(position) {
            Some(item) => {
                self.position.set(position + 1);
                Ok(Some(item.clone()))
            }
            None => Ok(None),
        }
    }

    fn open(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        if let Some(count) = execution_context.get_int(READ_COUNT_KEY) {
            let position = usize::try_from(count).map_err(|_| {
                BatchError::ItemReader(format!("invalid {}: {}", READ_COUNT_KEY, count))
            })?;
            debug!("Restarting list reader at position {}", position);
            self.position.set(position.min(self.items.len()));
        }
        Ok(())
    }

    fn update(&self, execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        execution_context.put(READ_COUNT_KEY, self.position.get());
        Ok(())
    }
}

struct WriterState<T> {
    committed: Vec<T>,
    pending: Vec<T>,
    active: bool,
    commit_sizes: Vec<usize>,
    rollbacks: usize,
}

/// Sink keeping written items in memory, visible only once committed.
///
/// The writer is its own [`TransactionManager`]: items written inside a
/// transaction are staged and either published by `commit` or discarded by
/// `rollback`. Clones share the same storage.
pub struct InMemoryItemWriter<T> {
    state: Arc<Mutex<WriterState<T>>>,
}

impl<T> Clone for InMemoryItemWriter<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for InMemoryItemWriter<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(WriterState {
                committed: Vec::new(),
                pending: Vec::new(),
                active: false,
                commit_sizes: Vec::new(),
                rollbacks: 0,
            })),
        }
    }
}

impl<T> InMemoryItemWriter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WriterState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Size of every committed transaction, in commit order.
    pub fn commit_sizes(&self) -> Vec<usize> {
        self.lock().commit_sizes.clone()
    }

    pub fn rollback_count(&self) -> usize {
        self.lock().rollbacks
    }
}

impl<T: Clone> InMemoryItemWriter<T> {
    /// Committed items, in write order.
    pub fn items(&self) -> Vec<T> {
        self.lock().committed.clone()
    }
}

impl<T: Clone> ItemWriter<T> for InMemoryItemWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        let mut state = self.lock();
        if !state.active {
            return Err(BatchError::Transaction(
                "write called outside of a transaction".to_string(),
            ));
        }
        state.pending.extend_from_slice(items);
        Ok(())
    }
}

impl<T: Send> TransactionManager for InMemoryItemWriter<T> {
    fn begin(&self) -> Result<(), BatchError> {
        let mut state = self.lock();
        if state.active {
            return Err(BatchError::Transaction(
                "a transaction is already active".to_string(),
            ));
        }
        state.active = true;
        state.pending.clear();
        Ok(())
    }

    fn commit(&self) -> Result<(), BatchError> {
        let mut state = self.lock();
        if !state.active {
            return Err(BatchError::Transaction("no active transaction".to_string()));
        }
        let mut pending = std::mem::take(&mut state.pending);
        state.commit_sizes.push(pending.len());
        state.committed.append(&mut pending);
        state.active = false;
        Ok(())
    }

    fn rollback(&self) -> Result<(), BatchError> {
        let mut state = self.lock();
        state.pending.clear();
        state.active = false;
        state.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_resumes_from_saved_position() {
        let reader = ListItemReader::new(vec!["a", "b", "c"]);
        let mut context = ExecutionContext::new();

        assert_eq!(reader.read().unwrap(), Some("a"));
        reader.update(&mut context).unwrap();
        assert_eq!(context.get_int(READ_COUNT_KEY), Some(1));

        let restarted = ListItemReader::new(vec!["a", "b", "c"]);
        restarted.open(&context).unwrap();
        assert_eq!(restarted.read().unwrap(), Some("b"));
        assert_eq!(restarted.read().unwrap(), Some("c"));
        assert_eq!(restarted.read().unwrap(), None);
    }

    #[test]
    fn reader_rejects_negative_position() {
        let reader = ListItemReader::new(vec![1]);
        let mut context = ExecutionContext::new();
        context.put_int(READ_COUNT_KEY, -1);
        assert!(matches!(reader.open(&context), Err(BatchError::ItemReader(_))));
    }

    #[test]
    fn writes_are_visible_only_after_commit() {
        let writer = InMemoryItemWriter::<i32>::new();

        writer.begin().unwrap();
        writer.write(&[1, 2]).unwrap();
        assert!(writer.items().is_empty());
        writer.commit().unwrap();

        writer.begin().unwrap();
        writer.write(&[3]).unwrap();
        writer.rollback().unwrap();

        assert_eq!(writer.items(), vec![1, 2]);
        assert_eq!(writer.commit_sizes(), vec![2]);
        assert_eq!(writer.rollback_count(), 1);
    }

    #[test]
    fn write_outside_transaction_fails() {
        let writer = InMemoryItemWriter::<i32>::new();
        assert!(matches!(writer.write(&[1]), Err(BatchError::Transaction(_))));
    }

    #[test]
    fn clones_share_storage() {
        let writer = InMemoryItemWriter::<&str>::new();
        let clone = writer.clone();

        clone.begin().unwrap();
        clone.write(&["x"]).unwrap();
        clone.commit().unwrap();

        assert_eq!(writer.items(), vec!["x"]);
    }
}
