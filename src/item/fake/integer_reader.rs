use std::cell::Cell;

use log::debug;
use rand::{
    SeedableRng,
    distr::{Distribution, Uniform},
    rngs::StdRng,
};

use crate::{
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult},
    },
    error::BatchError,
};

/// Step context key holding the number of integers already consumed.
pub const READ_COUNT_KEY: &str = "RandomIntegerReader.read.count";

/// Reads the integers `0..length`, where `length` is drawn from the seed.
///
/// The same seed always yields the same sequence, which keeps a restarted
/// step aligned with the run it resumes.
///
/// # Examples
///
/// ```
/// use chunk_batch::core::item::ItemReader;
/// use chunk_batch::item::fake::integer_reader::RandomIntegerReaderBuilder;
///
/// let reader = RandomIntegerReaderBuilder::new()
///     .max_items(100)
///     .seed(42)
///     .build()
///     .unwrap();
///
/// let mut count = 0;
/// while let Some(item) = reader.read().unwrap() {
///     assert_eq!(item, count);
///     count += 1;
/// }
/// assert_eq!(count, reader.len() as i64);
/// ```
pub struct RandomIntegerReader {
    length: usize,
    position: Cell<usize>,
}

impl RandomIntegerReader {
    /// Number of items this reader yields in total.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl ItemReader<i64> for RandomIntegerReader {
    fn read(&self) -> ItemReaderResult<i64> {
        let position = self.position.get();
        if position >= self.length {
            return Ok(None);
        }
        self.position.set(position + 1);
        i64::try_from(position)
            .map(Some)
            .map_err(|error| BatchError::ItemReader(error.to_string()))
    }

    fn open(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        if let Some(count) = execution_context.get_int(READ_COUNT_KEY) {
            let position = usize::try_from(count)
                .map_err(|_| BatchError::ItemReader(format!("invalid {}: {}", READ_COUNT_KEY, count)))?;
            self.position.set(position.min(self.length));
        }
        Ok(())
    }

    fn update(&self, execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        execution_context.put(READ_COUNT_KEY, self.position.get());
        Ok(())
    }
}

pub struct RandomIntegerReaderBuilder {
    max_items: usize,
    seed: u64,
}

impl Default for RandomIntegerReaderBuilder {
    fn default() -> Self {
        Self {
            max_items: 100,
            seed: 0,
        }
    }
}

impl RandomIntegerReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive upper bound of the drawn length.
    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<RandomIntegerReader, BatchError> {
        let range = Uniform::new(0, self.max_items)
            .map_err(|error| BatchError::Configuration(format!("max_items: {}", error)))?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let length = range.sample(&mut rng);

        debug!("Random integer reader yields {} items (seed {})", length, self.seed);

        Ok(RandomIntegerReader {
            length,
            position: Cell::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(reader: &RandomIntegerReader) -> Vec<i64> {
        let mut items = Vec::new();
        while let Some(item) = reader.read().unwrap() {
            items.push(item);
        }
        items
    }

    #[test]
    fn same_seed_yields_same_sequence() {
        let first = RandomIntegerReaderBuilder::new().seed(3).build().unwrap();
        let second = RandomIntegerReaderBuilder::new().seed(3).build().unwrap();

        assert_eq!(first.len(), second.len());
        assert_eq!(drain(&first), drain(&second));
        assert!(first.len() < 100);
    }

    #[test]
    fn zero_max_items_is_rejected() {
        let result = RandomIntegerReaderBuilder::new().max_items(0).build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn single_possible_length_is_empty() {
        let reader = RandomIntegerReaderBuilder::new().max_items(1).build().unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn reopening_skips_consumed_items() {
        let reader = RandomIntegerReaderBuilder::new()
            .max_items(1000)
            .seed(11)
            .build()
            .unwrap();
        let mut context = ExecutionContext::new();
        context.put_int(READ_COUNT_KEY, 2);

        reader.open(&context).unwrap();

        let expected: Vec<i64> = (2..reader.len() as i64).collect();
        assert_eq!(drain(&reader), expected);
    }
}
