use crate::{record::JobId, store::StoreError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobManagerError {
	#[error("job manager is shutting down and doesn't accept new jobs")]
	ShuttingDown,
	#[error("job <id='{0}'> is still pending or running")]
	JobActive(JobId),
	#[error(transparent)]
	Store(#[from] StoreError),
}

/// Error handed back to the worker pool when a job's work fails
#[derive(Debug, Error)]
pub enum JobError {
	#[error("job <id='{job_id}'> failed: {message}")]
	Work { job_id: JobId, message: String },
}
