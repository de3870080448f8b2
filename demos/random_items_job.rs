use std::{sync::Arc, time::Duration};

use chunk_batch::{
    BatchError,
    core::{
        context::ExecutionContext,
        execution::StepExecution,
        item::PassThroughProcessor,
        job::JobBuilder,
        launcher::JobLauncher,
        parameters::{JobParameters, RunIdIncrementer},
        policy::FailureAction,
        repository::InMemoryJobRepository,
        sleeper::ThreadSleeper,
        step::{RepeatStatus, StepBuilder},
    },
    item::{
        fake::{
            failure_writer::FailureInjectingWriterBuilder,
            integer_reader::RandomIntegerReaderBuilder,
        },
        logger::LoggerWriter,
    },
};

use log::info;

/// Skips the items the sink rejects, fails on anything else.
fn skip_rejected_items(error: &BatchError) -> FailureAction {
    match error {
        BatchError::ItemWriter { item: Some(_), .. } => FailureAction::Skip,
        _ => FailureAction::Fatal,
    }
}

fn print_read_count(
    _: &mut StepExecution,
    job_context: &mut ExecutionContext,
) -> Result<RepeatStatus, BatchError> {
    info!("readCount = {}", job_context.get_int("readCount").unwrap_or(0));
    Ok(RepeatStatus::Finished)
}

fn main() -> Result<(), BatchError> {
    env_logger::init();

    let writer = FailureInjectingWriterBuilder::<i64>::new()
        .fail_randomly(1000, 57)
        .latency(Duration::from_millis(20), ThreadSleeper)
        .seed(2019)
        .build(LoggerWriter::new().prefix("item"))?;

    let step1 = StepBuilder::new("step1")
        .chunk::<i64, i64>(3)
        .reader(|parameters: &JobParameters| {
            RandomIntegerReaderBuilder::new()
                .max_items(100)
                .seed(parameters.get_int("run.id").unwrap_or(0).unsigned_abs())
                .build()
        })
        .processor(PassThroughProcessor)
        .writer(writer)
        .failure_policy(skip_rejected_items)
        .after_step(|step_execution: &mut StepExecution, job_context: &mut ExecutionContext| {
            job_context.put("readCount", step_execution.read_count);
            Ok(None)
        })
        .build()?;

    let step2 = StepBuilder::new("step2").tasklet(print_read_count).build()?;

    let job = JobBuilder::new("job")
        .start(step1)
        .next(step2)
        .incrementer(RunIdIncrementer)
        .build()?;

    let mut launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
    launcher.register(job)?;

    for _ in 0..2 {
        let result = launcher.start_next_instance("job")?;
        let step1 = result.step("step1");
        info!(
            "Run {} ended {} (read: {}, written: {}, skipped: {})",
            result.execution.signature,
            result.status,
            step1.map_or(0, |step| step.read_count),
            step1.map_or(0, |step| step.write_count),
            step1.map_or(0, |step| step.skip_count()),
        );
    }

    Ok(())
}
