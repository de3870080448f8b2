use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use chunk_batch::{
    BatchError,
    core::{
        context::ExecutionContext,
        execution::StepExecution,
        item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
        parameters::JobParameters,
        step::RepeatStatus,
    },
    item::list::{InMemoryItemWriter, ListItemReader},
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn run_id(run_id: i64) -> JobParameters {
    JobParameters::new().with("run.id", run_id)
}

pub fn finished(
    _: &mut StepExecution,
    _: &mut ExecutionContext,
) -> Result<RepeatStatus, BatchError> {
    Ok(RepeatStatus::Finished)
}

/// Creates list readers over `0..len` and counts how many were created.
#[derive(Clone, Default)]
pub struct ReaderFactory {
    created: Arc<AtomicUsize>,
}

impl ReaderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, len: i32) -> ListItemReader<i32> {
        self.created.fetch_add(1, Ordering::SeqCst);
        ListItemReader::new((0..len).collect())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

/// Reader failing when it reaches a given item.
pub struct FailingReader {
    inner: ListItemReader<i32>,
    fail_on: i32,
}

impl FailingReader {
    pub fn new(len: i32, fail_on: i32) -> Self {
        Self {
            inner: ListItemReader::new((0..len).collect()),
            fail_on,
        }
    }
}

impl ItemReader<i32> for FailingReader {
    fn read(&self) -> ItemReaderResult<i32> {
        match self.inner.read()? {
            Some(item) if item == self.fail_on => {
                Err(BatchError::ItemReader(format!("cannot read {}", item)))
            }
            other => Ok(other),
        }
    }
}

/// Transactional sink rejecting some items without telling which one.
#[derive(Clone)]
pub struct RejectingWriter {
    pub sink: InMemoryItemWriter<i32>,
    rejected: Arc<HashSet<i32>>,
}

impl RejectingWriter {
    pub fn new(rejected: &[i32]) -> Self {
        Self {
            sink: InMemoryItemWriter::new(),
            rejected: Arc::new(rejected.iter().copied().collect()),
        }
    }
}

impl ItemWriter<i32> for RejectingWriter {
    fn write(&self, items: &[i32]) -> ItemWriterResult {
        if items.iter().any(|item| self.rejected.contains(item)) {
            return Err(BatchError::writer("rejected item in chunk"));
        }
        self.sink.write(items)
    }
}

/// Thread safe sink counting written items, for concurrent runs.
#[derive(Clone, Default)]
pub struct CountingWriter {
    written: Arc<AtomicUsize>,
    chunks: Arc<Mutex<Vec<usize>>>,
}

impl CountingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    pub fn chunks(&self) -> Vec<usize> {
        self.chunks.lock().unwrap().clone()
    }
}

impl ItemWriter<i32> for CountingWriter {
    fn write(&self, items: &[i32]) -> ItemWriterResult {
        self.written.fetch_add(items.len(), Ordering::SeqCst);
        self.chunks.lock().unwrap().push(items.len());
        Ok(())
    }
}

/// Sink without transactions rejecting chunks that contain some items,
/// without telling which one.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    items: Arc<Mutex<Vec<i32>>>,
    rejected: Arc<HashSet<i32>>,
}

impl RecordingWriter {
    pub fn rejecting(rejected: &[i32]) -> Self {
        Self {
            items: Arc::default(),
            rejected: Arc::new(rejected.iter().copied().collect()),
        }
    }

    pub fn items(&self) -> Vec<i32> {
        self.items.lock().unwrap().clone()
    }
}

impl ItemWriter<i32> for RecordingWriter {
    fn write(&self, items: &[i32]) -> ItemWriterResult {
        if items.iter().any(|item| self.rejected.contains(item)) {
            return Err(BatchError::writer("rejected item in chunk"));
        }
        self.items.lock().unwrap().extend_from_slice(items);
        Ok(())
    }
}
