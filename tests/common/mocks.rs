//! Mock version of the job repository.
use mockall::mock;

use chunk_batch::{
    BatchError,
    core::{
        execution::{JobExecution, StepExecution},
        parameters::{JobParameters, JobSignature},
        repository::JobRepository,
    },
};

mock! {
    pub Repository {}
    impl JobRepository for Repository {
        fn create_or_resume_execution(
            &self,
            job_name: &str,
            parameters: &JobParameters,
        ) -> Result<JobExecution, BatchError>;
        fn save_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError>;
        fn save_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError>;
        fn find_latest_execution(
            &self,
            signature: &JobSignature,
        ) -> Result<Option<JobExecution>, BatchError>;
        fn find_last_step_execution(
            &self,
            signature: &JobSignature,
            step_name: &str,
        ) -> Result<Option<StepExecution>, BatchError>;
        fn find_latest_execution_by_name(
            &self,
            job_name: &str,
        ) -> Result<Option<JobExecution>, BatchError>;
    }
}
