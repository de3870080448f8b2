/// Chunk buffering and the read-process-write transaction cycle
pub mod chunk;

pub mod context;

/// Execution records: what happened during a run
pub mod execution;

pub mod item;

pub mod job;

pub mod launcher;

pub mod listener;

pub mod parameters;

pub mod policy;

/// Storage of execution records
pub mod repository;

pub mod sleeper;

pub mod step;

pub mod transaction;
