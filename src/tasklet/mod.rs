//! # Tasklet Module
//!
//! Ready-made tasklets for steps that do not follow the chunk-oriented pattern.

pub mod sleep;
