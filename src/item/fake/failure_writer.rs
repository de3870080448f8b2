use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use log::{debug, warn};
use rand::{
    SeedableRng,
    distr::{Distribution, Uniform},
    rngs::StdRng,
};

use crate::{
    core::{
        item::{ItemWriter, ItemWriterResult},
        sleeper::{NoopSleeper, Sleeper},
    },
    error::BatchError,
};

/// Decides which items a [`FailureInjectingWriter`] rejects.
pub enum FailureMode<T> {
    Never,
    /// Rejects the items matching the predicate.
    When(Arc<dyn Fn(&T) -> bool + Send + Sync>),
    /// Draws a value in `0..bound` for every item and rejects the item when
    /// the value is a multiple of `modulus`.
    Random { bound: u64, modulus: u64 },
}

impl<T> Clone for FailureMode<T> {
    fn clone(&self) -> Self {
        match self {
            FailureMode::Never => FailureMode::Never,
            FailureMode::When(predicate) => FailureMode::When(Arc::clone(predicate)),
            FailureMode::Random { bound, modulus } => FailureMode::Random {
                bound: *bound,
                modulus: *modulus,
            },
        }
    }
}

/// Writer decorator simulating a slow and unreliable sink.
///
/// Items are checked one by one before anything reaches the delegate, so a
/// rejected chunk never partially reaches it. The failure names the index of
/// the offending item, which lets a skip policy drop exactly that item.
///
/// Clones share the failure counter and the random generator.
pub struct FailureInjectingWriter<T, W> {
    delegate: W,
    mode: FailureMode<T>,
    max_failures: Option<usize>,
    failures: Arc<AtomicUsize>,
    max_latency: Duration,
    sleeper: Arc<dyn Sleeper>,
    rng: Arc<Mutex<StdRng>>,
}

impl<T, W: Clone> Clone for FailureInjectingWriter<T, W> {
    fn clone(&self) -> Self {
        Self {
            delegate: self.delegate.clone(),
            mode: self.mode.clone(),
            max_failures: self.max_failures,
            failures: Arc::clone(&self.failures),
            max_latency: self.max_latency,
            sleeper: Arc::clone(&self.sleeper),
            rng: Arc::clone(&self.rng),
        }
    }
}

impl<T, W> FailureInjectingWriter<T, W> {
    /// Number of failures injected so far.
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn delegate(&self) -> &W {
        &self.delegate
    }

    fn exhausted(&self) -> bool {
        self.max_failures
            .is_some_and(|max_failures| self.failure_count() >= max_failures)
    }

    /// Draws a value in `0..bound` from the shared generator.
    fn draw(&self, bound: u64) -> Result<u64, BatchError> {
        let range = Uniform::new(0, bound).map_err(|error| BatchError::writer(error.to_string()))?;
        let mut rng = self
            .rng
            .lock()
            .map_err(|error| BatchError::writer(format!("random generator poisoned: {}", error)))?;
        Ok(range.sample(&mut *rng))
    }

    fn wait(&self) -> Result<(), BatchError> {
        if self.max_latency.is_zero() {
            return Ok(());
        }
        let bound = u64::try_from(self.max_latency.as_millis()).unwrap_or(u64::MAX);
        let millis = self.draw(bound)?;
        self.sleeper.sleep(Duration::from_millis(millis));
        Ok(())
    }

    fn rejects(&self, item: &T) -> Result<bool, BatchError> {
        if self.exhausted() {
            return Ok(false);
        }
        match &self.mode {
            FailureMode::Never => Ok(false),
            FailureMode::When(predicate) => Ok(predicate(item)),
            FailureMode::Random { bound, modulus } => {
                let value = self.draw(*bound)?;
                Ok(*modulus != 0 && value % modulus == 0)
            }
        }
    }
}

impl<T, W> ItemWriter<T> for FailureInjectingWriter<T, W>
where
    W: ItemWriter<T>,
{
    fn write(&self, items: &[T]) -> ItemWriterResult {
        for (index, item) in items.iter().enumerate() {
            self.wait()?;
            if self.rejects(item)? {
                self.failures.fetch_add(1, Ordering::SeqCst);
                warn!("Injected failure at item {} of {}", index, items.len());
                return Err(BatchError::writer_at(index, "Boom!"));
            }
        }
        debug!("Delegating write of {} items", items.len());
        self.delegate.write(items)
    }

    fn flush(&self) -> ItemWriterResult {
        self.delegate.flush()
    }

    fn open(&self) -> ItemWriterResult {
        self.delegate.open()
    }

    fn close(&self) -> ItemWriterResult {
        self.delegate.close()
    }
}

pub struct FailureInjectingWriterBuilder<T> {
    mode: FailureMode<T>,
    max_failures: Option<usize>,
    max_latency: Duration,
    sleeper: Arc<dyn Sleeper>,
    seed: u64,
}

impl<T> Default for FailureInjectingWriterBuilder<T> {
    fn default() -> Self {
        Self {
            mode: FailureMode::Never,
            max_failures: None,
            max_latency: Duration::ZERO,
            sleeper: Arc::new(NoopSleeper),
            seed: 0,
        }
    }
}

impl<T> FailureInjectingWriterBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.mode = FailureMode::When(Arc::new(predicate));
        self
    }

    pub fn fail_randomly(mut self, bound: u64, modulus: u64) -> Self {
        self.mode = FailureMode::Random { bound, modulus };
        self
    }

    /// Stops injecting failures once this many were injected.
    pub fn max_failures(mut self, max_failures: usize) -> Self {
        self.max_failures = Some(max_failures);
        self
    }

    /// Waits a random duration up to `max_latency` before each item.
    pub fn latency<S: Sleeper + 'static>(mut self, max_latency: Duration, sleeper: S) -> Self {
        self.max_latency = max_latency;
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build<W>(self, delegate: W) -> Result<FailureInjectingWriter<T, W>, BatchError> {
        if let FailureMode::Random { bound: 0, .. } = self.mode {
            return Err(BatchError::Configuration(
                "random failure bound must be greater than 0".to_string(),
            ));
        }

        Ok(FailureInjectingWriter {
            delegate,
            mode: self.mode,
            max_failures: self.max_failures,
            failures: Arc::new(AtomicUsize::new(0)),
            max_latency: self.max_latency,
            sleeper: self.sleeper,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(self.seed))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::transaction::TransactionManager, item::list::InMemoryItemWriter};

    #[derive(Default)]
    struct RecordingSleeper {
        calls: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.calls.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn rejects_matching_item_with_its_index() {
        let sink = InMemoryItemWriter::<i32>::new();
        let writer = FailureInjectingWriterBuilder::new()
            .fail_when(|item: &i32| *item == 5)
            .build(sink.clone())
            .unwrap();

        sink.begin().unwrap();
        let result = writer.write(&[3, 4, 5, 6]);
        sink.rollback().unwrap();

        assert!(matches!(
            result,
            Err(BatchError::ItemWriter { item: Some(2), .. })
        ));
        assert!(sink.items().is_empty());
        assert_eq!(writer.failure_count(), 1);
    }

    #[test]
    fn stops_failing_after_max_failures() {
        let sink = InMemoryItemWriter::<i32>::new();
        let writer = FailureInjectingWriterBuilder::new()
            .fail_when(|_: &i32| true)
            .max_failures(1)
            .build(sink.clone())
            .unwrap();

        sink.begin().unwrap();
        assert!(writer.write(&[1]).is_err());
        assert!(writer.write(&[1]).is_ok());
        sink.commit().unwrap();

        assert_eq!(sink.items(), vec![1]);
    }

    #[test]
    fn latency_goes_through_the_sleeper() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let sink = InMemoryItemWriter::<i32>::new();
        let writer = FailureInjectingWriterBuilder::<i32>::new()
            .latency(Duration::from_millis(1000), Arc::clone(&sleeper))
            .seed(1)
            .build(sink.clone())
            .unwrap();

        sink.begin().unwrap();
        writer.write(&[1, 2, 3]).unwrap();
        sink.commit().unwrap();

        let calls = sleeper.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|duration| *duration < Duration::from_millis(1000)));
    }

    #[test]
    fn random_failures_are_reproducible_from_the_seed() {
        let outcomes = |seed: u64| {
            let sink = InMemoryItemWriter::<i32>::new();
            let writer = FailureInjectingWriterBuilder::<i32>::new()
                .fail_randomly(10, 3)
                .seed(seed)
                .build(sink.clone())
                .unwrap();
            (0..20)
                .map(|item| {
                    sink.begin().unwrap();
                    let failed = writer.write(&[item]).is_err();
                    sink.rollback().unwrap();
                    failed
                })
                .collect::<Vec<bool>>()
        };

        assert_eq!(outcomes(9), outcomes(9));
    }

    #[test]
    fn zero_random_bound_is_rejected() {
        let result = FailureInjectingWriterBuilder::<i32>::new()
            .fail_randomly(0, 3)
            .build(InMemoryItemWriter::<i32>::new());
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }
}
