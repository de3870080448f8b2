pub mod common;

use std::sync::Arc;

use anyhow::Result;
use chunk_batch::{
    BatchError,
    core::{
        execution::{BatchStatus, JobExecutionResult},
        item::PassThroughProcessor,
        job::JobBuilder,
        launcher::JobLauncher,
        policy::FailureAction,
        repository::InMemoryJobRepository,
        step::{ChunkOrientedStep, StepBuilder},
    },
    item::{
        fake::failure_writer::{FailureInjectingWriter, FailureInjectingWriterBuilder},
        list::{InMemoryItemWriter, ListItemReader},
    },
};

use common::{FailingReader, RecordingWriter, RejectingWriter, init_logger, run_id};

type FailingSink = FailureInjectingWriter<i32, InMemoryItemWriter<i32>>;

fn launch_step(step: ChunkOrientedStep<i32, i32>) -> Result<JobExecutionResult> {
    let job = JobBuilder::new("job").start(step).build()?;
    let mut launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
    launcher.register(job)?;
    Ok(launcher.launch("job", run_id(1))?)
}

fn failing_sink<P>(predicate: P) -> (InMemoryItemWriter<i32>, FailingSink)
where
    P: Fn(&i32) -> bool + Send + Sync + 'static,
{
    let sink = InMemoryItemWriter::<i32>::new();
    let writer = FailureInjectingWriterBuilder::new()
        .fail_when(predicate)
        .build(sink.clone())
        .unwrap();
    (sink, writer)
}

fn skip(_: &BatchError) -> FailureAction {
    FailureAction::Skip
}

fn retry(_: &BatchError) -> FailureAction {
    FailureAction::Retry
}

#[test]
fn commits_once_per_chunk_for_every_size() -> Result<()> {
    init_logger();

    for chunk_size in 1..=5usize {
        for len in 0..=12i32 {
            let sink = InMemoryItemWriter::<i32>::new();
            let step = StepBuilder::new("step1")
                .chunk::<i32, i32>(chunk_size)
                .reader(move |_| Ok(ListItemReader::new((0..len).collect())))
                .processor(PassThroughProcessor)
                .writer(sink.clone())
                .transaction_manager(sink.clone())
                .build()?;

            let result = launch_step(step)?;
            let len = len as usize;

            assert_eq!(result.status, BatchStatus::Completed);
            let step1 = result.step("step1").unwrap();
            assert_eq!(step1.write_count, len);
            assert_eq!(step1.read_count, len);
            assert_eq!(step1.commit_count, len.div_ceil(chunk_size));
            assert_eq!(sink.commit_sizes().len(), len.div_ceil(chunk_size));
            assert_eq!(sink.items().len(), len);
        }
    }

    Ok(())
}

#[test]
fn ten_items_in_chunks_of_three() -> Result<()> {
    let sink = InMemoryItemWriter::<i32>::new();
    let step = StepBuilder::new("step1")
        .chunk::<i32, i32>(3)
        .reader(|_| Ok(ListItemReader::new((0..10).collect())))
        .processor(PassThroughProcessor)
        .writer(sink.clone())
        .transaction_manager(sink.clone())
        .build()?;

    let result = launch_step(step)?;

    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(sink.commit_sizes(), vec![3, 3, 3, 1]);
    assert_eq!(sink.items(), (0..10).collect::<Vec<i32>>());
    let step1 = result.step("step1").unwrap();
    assert_eq!(step1.read_count, 10);
    assert_eq!(step1.write_count, 10);
    assert_eq!(step1.status, BatchStatus::Completed);
    Ok(())
}

#[test]
fn fatal_write_error_keeps_only_committed_chunks() -> Result<()> {
    let (sink, writer) = failing_sink(|item| *item == 4);
    let step = StepBuilder::new("step1")
        .chunk::<i32, i32>(3)
        .reader(|_| Ok(ListItemReader::new((0..10).collect())))
        .processor(PassThroughProcessor)
        .writer(writer)
        .transaction_manager(sink.clone())
        .build()?;

    let result = launch_step(step)?;

    assert_eq!(result.status, BatchStatus::Failed);
    assert!(result.exit_description.contains("Step step1 failed"));
    assert!(result.exit_description.contains("Boom!"));

    let step1 = result.step("step1").unwrap();
    assert_eq!(step1.status, BatchStatus::Failed);
    assert_eq!(step1.write_count, 3);
    assert_eq!(step1.read_count, 3);
    assert_eq!(step1.commit_count, 1);
    assert_eq!(step1.rollback_count, 1);

    // Nothing of the failed chunk [3, 4, 5] reached the sink.
    assert_eq!(sink.items(), vec![0, 1, 2]);
    assert_eq!(sink.commit_sizes(), vec![3]);
    Ok(())
}

#[test]
fn read_error_discards_the_partial_chunk() -> Result<()> {
    let sink = InMemoryItemWriter::<i32>::new();
    let step = StepBuilder::new("step1")
        .chunk::<i32, i32>(3)
        .reader(|_| Ok(FailingReader::new(10, 4)))
        .processor(PassThroughProcessor)
        .writer(sink.clone())
        .transaction_manager(sink.clone())
        .failure_policy(skip)
        .build()?;

    let result = launch_step(step)?;

    assert_eq!(result.status, BatchStatus::Failed);
    assert_eq!(sink.items(), vec![0, 1, 2]);
    assert_eq!(result.step("step1").unwrap().read_count, 3);
    Ok(())
}

#[test]
fn indexed_write_error_skips_the_offending_item() -> Result<()> {
    let (sink, writer) = failing_sink(|item| *item == 4);
    let step = StepBuilder::new("step1")
        .chunk::<i32, i32>(3)
        .reader(|_| Ok(ListItemReader::new((0..10).collect())))
        .processor(PassThroughProcessor)
        .writer(writer)
        .transaction_manager(sink.clone())
        .failure_policy(skip)
        .build()?;

    let result = launch_step(step)?;

    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(sink.items(), vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);
    assert_eq!(sink.commit_sizes(), vec![3, 2, 3, 1]);

    let step1 = result.step("step1").unwrap();
    assert_eq!(step1.read_count, 10);
    assert_eq!(step1.write_count, 9);
    assert_eq!(step1.write_skip_count, 1);
    assert_eq!(step1.rollback_count, 1);
    Ok(())
}

#[test]
fn unindexed_write_error_is_found_by_scanning() -> Result<()> {
    let writer = RejectingWriter::new(&[4, 8]);
    let sink = writer.sink.clone();
    let step = StepBuilder::new("step1")
        .chunk::<i32, i32>(3)
        .reader(|_| Ok(ListItemReader::new((0..10).collect())))
        .processor(PassThroughProcessor)
        .writer(writer)
        .transaction_manager(sink.clone())
        .failure_policy(skip)
        .build()?;

    let result = launch_step(step)?;

    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(sink.items(), vec![0, 1, 2, 3, 5, 6, 7, 9]);
    assert_eq!(sink.commit_sizes(), vec![3, 2, 2, 1]);
    assert_eq!(result.step("step1").unwrap().write_skip_count, 2);
    Ok(())
}

#[test]
fn unindexed_skip_without_rollback_fails_the_step() -> Result<()> {
    let sink = RecordingWriter::rejecting(&[2]);
    let step = StepBuilder::new("step1")
        .chunk::<i32, i32>(4)
        .reader(|_| Ok(ListItemReader::new((0..4).collect())))
        .processor(PassThroughProcessor)
        .writer(sink.clone())
        .failure_policy(skip)
        .build()?;

    let result = launch_step(step)?;

    assert_eq!(result.status, BatchStatus::Failed);
    assert!(result.exit_description.contains("cannot roll back"));
    // No trial write reached the sink.
    assert!(sink.items().is_empty());

    let step1 = result.step("step1").unwrap();
    assert_eq!(step1.write_count, 0);
    assert_eq!(step1.write_skip_count, 0);
    assert_eq!(step1.rollback_count, 1);
    Ok(())
}

#[test]
fn retry_rewrites_the_whole_chunk() -> Result<()> {
    let sink = InMemoryItemWriter::<i32>::new();
    let writer = FailureInjectingWriterBuilder::new()
        .fail_when(|_: &i32| true)
        .max_failures(2)
        .build(sink.clone())?;
    let step = StepBuilder::new("step1")
        .chunk::<i32, i32>(3)
        .reader(|_| Ok(ListItemReader::new((0..10).collect())))
        .processor(PassThroughProcessor)
        .writer(writer)
        .transaction_manager(sink.clone())
        .failure_policy(retry)
        .build()?;

    let result = launch_step(step)?;

    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(sink.commit_sizes(), vec![3, 3, 3, 1]);
    let step1 = result.step("step1").unwrap();
    assert_eq!(step1.write_count, 10);
    assert_eq!(step1.rollback_count, 2);
    Ok(())
}

#[test]
fn exhausted_retries_fail_the_step() -> Result<()> {
    let (sink, writer) = failing_sink(|_| true);
    let step = StepBuilder::new("step1")
        .chunk::<i32, i32>(3)
        .reader(|_| Ok(ListItemReader::new((0..10).collect())))
        .processor(PassThroughProcessor)
        .writer(writer.clone())
        .transaction_manager(sink.clone())
        .failure_policy(retry)
        .retry_limit(2)
        .build()?;

    let result = launch_step(step)?;

    assert_eq!(result.status, BatchStatus::Failed);
    assert!(sink.items().is_empty());
    assert_eq!(writer.failure_count(), 3);
    assert_eq!(result.step("step1").unwrap().rollback_count, 3);
    Ok(())
}

#[test]
fn skip_limit_fails_the_step() -> Result<()> {
    let (sink, writer) = failing_sink(|item| item % 2 == 0);
    let step = StepBuilder::new("step1")
        .chunk::<i32, i32>(3)
        .reader(|_| Ok(ListItemReader::new((0..10).collect())))
        .processor(PassThroughProcessor)
        .writer(writer)
        .transaction_manager(sink.clone())
        .failure_policy(skip)
        .skip_limit(3)
        .build()?;

    let result = launch_step(step)?;

    assert_eq!(result.status, BatchStatus::Failed);
    assert!(result.exit_description.contains("skip limit"));
    assert_eq!(sink.items(), vec![1, 3, 5]);

    let step1 = result.step("step1").unwrap();
    assert_eq!(step1.write_count, 3);
    assert_eq!(step1.write_skip_count, 3);
    Ok(())
}

#[test]
fn empty_source_completes_without_commit() -> Result<()> {
    let sink = InMemoryItemWriter::<i32>::new();
    let step = StepBuilder::new("step1")
        .chunk::<i32, i32>(3)
        .reader(|_| Ok(ListItemReader::new(Vec::new())))
        .processor(PassThroughProcessor)
        .writer(sink.clone())
        .transaction_manager(sink.clone())
        .build()?;

    let result = launch_step(step)?;

    assert_eq!(result.status, BatchStatus::Completed);
    let step1 = result.step("step1").unwrap();
    assert_eq!(step1.read_count, 0);
    assert_eq!(step1.write_count, 0);
    assert_eq!(step1.commit_count, 0);
    assert!(sink.commit_sizes().is_empty());
    Ok(())
}
