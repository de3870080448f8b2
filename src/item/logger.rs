use std::fmt::Debug;

use log::{Level, log};

use crate::{BatchError, core::item::ItemWriter};

/// Writes every item of a chunk to the log, one record per line.
pub struct LoggerWriter {
    level: Level,
    prefix: String,
}

impl Default for LoggerWriter {
    fn default() -> Self {
        Self {
            level: Level::Info,
            prefix: "Record".to_string(),
        }
    }
}

impl LoggerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> Result<(), BatchError> {
        items
            .iter()
            .for_each(|item| log!(self.level, "{}:{:?}", self.prefix, item));
        Ok(())
    }
}
