/// Generated test data and simulated sinks.
///
/// Every random decision is taken from a seeded [`StdRng`](rand::rngs::StdRng)
/// owned by the component, so a run can be reproduced from its seed:
///
/// 1. **RandomIntegerReader**: reads `0, 1, ..` up to a length drawn once per
///    reader from `0..max_items`.
///
/// 2. **FailureInjectingWriter**: wraps another writer and fails on chosen
///    items, optionally waiting a random latency per item through a
///    [`Sleeper`](crate::core::sleeper::Sleeper).
pub mod failure_writer;

pub mod integer_reader;
