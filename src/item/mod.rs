/// In-memory reader and transactional writer.
pub mod list;

#[cfg(feature = "logger")]
/// This module provides a logger item writer implementation.
pub mod logger;

#[cfg(feature = "fake")]
/// This module provides generated items and failure injection for testing jobs.
pub mod fake;
