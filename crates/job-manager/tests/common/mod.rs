#![allow(dead_code)]

pub mod stores;
pub mod works;

use crewlab_job_manager::{JobId, JobManager, JobManagerConfig, JobRecord, JobStatus};

use std::time::Duration;

use tokio::time::{sleep, timeout};

/// Polls until the job reaches `status`, panicking after a few seconds
pub async fn wait_for_status(manager: &JobManager, job_id: JobId, status: JobStatus) -> JobRecord {
	timeout(Duration::from_secs(5), async {
		loop {
			if let Some(record) = manager.get_status(job_id, None).await {
				if record.status == status {
					return record;
				}
			}

			sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("job {job_id} never reached {status}"))
}

pub fn config() -> JobManagerConfig {
	JobManagerConfig {
		worker_pool_size: 2,
		..Default::default()
	}
}
