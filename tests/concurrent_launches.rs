pub mod common;

use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::{Result, bail};
use chunk_batch::{
    BatchError,
    core::{
        execution::BatchStatus,
        item::PassThroughProcessor,
        job::JobBuilder,
        launcher::JobLauncher,
        repository::InMemoryJobRepository,
        step::StepBuilder,
    },
    item::list::ListItemReader,
    tasklet::sleep::{ITERATION_KEY, SleepTasklet},
};
use uuid::Uuid;

use common::{CountingWriter, init_logger, run_id};

const ITERATIONS: u32 = 10_000;

fn sleeping_launcher() -> Result<Arc<JobLauncher>> {
    let step = StepBuilder::new("sleep")
        .tasklet(SleepTasklet::new(ITERATIONS, Duration::from_millis(1)))
        .build()?;
    let mut launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
    launcher.register(JobBuilder::new("sleepy").start(step).build()?)?;
    Ok(Arc::new(launcher))
}

async fn wait_until_running(launcher: &JobLauncher) -> Result<Uuid> {
    for _ in 0..500 {
        if let Some((id, _)) = launcher.running_executions().into_iter().next() {
            return Ok(id);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("job never started")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_parameters_run_side_by_side() -> Result<()> {
    init_logger();
    let sink = CountingWriter::new();
    let writer = sink.clone();
    let step = StepBuilder::new("copy")
        .chunk::<i32, i32>(5)
        .reader(|_| Ok(ListItemReader::new((0..50).collect())))
        .processor(PassThroughProcessor)
        .writer(writer)
        .build()?;

    let mut launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
    launcher.register(JobBuilder::new("copy").start(step).build()?)?;
    let launcher = Arc::new(launcher);

    let handles: Vec<_> = (1..=4)
        .map(|id| launcher.spawn("copy", run_id(id)))
        .collect();

    let mut execution_ids = HashSet::new();
    for handle in handles {
        let result = handle.await??;
        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.step("copy").unwrap().write_count, 50);
        assert_eq!(result.step("copy").unwrap().commit_count, 10);
        execution_ids.insert(result.execution.id);
    }

    assert_eq!(execution_ids.len(), 4);
    assert_eq!(sink.written(), 200);
    assert_eq!(sink.chunks().len(), 40);
    assert!(launcher.running_executions().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_request_ends_a_running_tasklet() -> Result<()> {
    init_logger();
    let launcher = sleeping_launcher()?;

    let handle = launcher.spawn("sleepy", run_id(1));
    let execution_id = wait_until_running(&launcher).await?;

    assert!(launcher.stop(&execution_id));
    let result = handle.await??;

    assert_eq!(result.status, BatchStatus::Stopped);
    assert_eq!(result.execution.id, execution_id);
    let step = result.step("sleep").unwrap();
    assert_eq!(step.status, BatchStatus::Stopped);
    let iterations = step.execution_context.get_int(ITERATION_KEY).unwrap_or(0);
    assert!(iterations < i64::from(ITERATIONS));
    assert!(launcher.running_executions().is_empty());
    assert!(!launcher.stop(&execution_id));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_parameters_are_rejected_while_running() -> Result<()> {
    init_logger();
    let launcher = sleeping_launcher()?;

    let first = launcher.spawn("sleepy", run_id(1));
    let execution_id = wait_until_running(&launcher).await?;

    let second = launcher.spawn("sleepy", run_id(1)).await?;
    assert!(matches!(
        second,
        Err(BatchError::JobExecutionAlreadyRunning(_))
    ));
    assert_eq!(launcher.running_executions().len(), 1);

    launcher.stop(&execution_id);
    let stopped = first.await??;
    assert_eq!(stopped.status, BatchStatus::Stopped);
    Ok(())
}
