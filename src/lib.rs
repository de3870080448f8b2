#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Chunk Batch

 A toolkit for building restartable batch jobs that read, process and write
 records in transactional chunks.

 ## Core Concepts

- **Job:** An ordered sequence of `Step`s, identified per run by its name and identifying `JobParameters`.
- **Step:** Either chunk oriented (reader, processor, writer) or a `Tasklet` called until it reports `Finished`.
- **Chunk:** Up to `chunk_size` items written and committed in a single transaction. A chunk is either fully committed or not visible at all.
- **JobRepository:** Durable store of `JobExecution` and `StepExecution` records. Failed or stopped runs are resumed from the first step that did not complete; completed runs are never repeated.
- **JobLauncher:** Runs registered jobs, synchronously with `launch` or on the tokio blocking pool with `spawn`.

 ## Features

| **Feature** | **Description**                                                       |
|-------------|-----------------------------------------------------------------------|
| json        | Enables `FileJobRepository`, storing execution records as JSON files   |
| fake        | Enables a random `ItemReader` and a failure injecting `ItemWriter`     |
| logger      | Enables a logger `ItemWriter`, useful for debugging purposes          |
| full        | Enables all available features                                        |

 ## Getting Started

```rust
# use std::sync::Arc;
# use chunk_batch::{
#     core::{
#         context::ExecutionContext,
#         execution::{BatchStatus, StepExecution},
#         item::PassThroughProcessor,
#         job::JobBuilder,
#         launcher::JobLauncher,
#         parameters::JobParameters,
#         repository::InMemoryJobRepository,
#         step::StepBuilder,
#     },
#     item::list::{InMemoryItemWriter, ListItemReader},
#     BatchError,
# };
fn main() -> Result<(), BatchError> {
    let writer = InMemoryItemWriter::<i32>::new();

    let step = StepBuilder::new("copy")
        .chunk::<i32, i32>(3)
        .reader(|_| Ok(ListItemReader::new((0..10).collect())))
        .processor(PassThroughProcessor)
        .writer(writer.clone())
        .transaction_manager(writer.clone())
        .after_step(|step_execution: &mut StepExecution, job_context: &mut ExecutionContext| {
            job_context.put("readCount", step_execution.read_count);
            Ok(None)
        })
        .build()?;

    let job = JobBuilder::new("copy-job").start(step).build()?;

    let mut launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
    launcher.register(job)?;

    let result = launcher.launch("copy-job", JobParameters::new().with("run.id", 1))?;

    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(writer.commit_sizes(), vec![3, 3, 3, 1]);
    Ok(())
}
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of item readers / writers
pub mod item;

/// Reusable tasklets
pub mod tasklet;
