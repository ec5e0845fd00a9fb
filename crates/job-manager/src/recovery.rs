//! Reconciles what the store believes is running with what this process actually runs

use crate::{error::JobManagerError, manager::JobManager, store::StoreError};

use chrono::Utc;
use tracing::{debug, info, instrument, trace, warn};

pub const INTERRUPTED_BY_RESTART: &str = "Job interrupted by server restart";

impl JobManager {
	/// Fails every stored job left pending or running by a process that is gone.
	///
	/// A job is only touched when this manager holds no live execution for it and the store still
	/// reports it as active, so jobs finishing while recovery runs are left alone and calling it
	/// twice is a no-op. Stores that can't enumerate their entries make it skip recovery.
	#[instrument(skip(self), err)]
	pub async fn recover_jobs(&self) -> Result<usize, JobManagerError> {
		let inner = &self.inner;

		let stored = match inner.store.scan_all().await {
			Ok(stored) => stored,
			Err(StoreError::EnumerationUnsupported) => {
				info!("Job store can't enumerate jobs, skipping recovery");
				return Ok(0);
			}
			Err(e) => return Err(e.into()),
		};

		let now = Utc::now();
		let mut recovered = 0;

		for job_id in stored
			.into_iter()
			.filter(|record| record.status.is_active())
			.map(|record| record.job_id)
		{
			if inner.is_live(job_id) {
				continue;
			}

			// Executions persist their outcome before leaving the registry, so a read made after
			// the registry check can't be older than that outcome
			let mut record = match inner.store.get(job_id).await {
				Ok(Some(record)) if record.status.is_active() => record,
				Ok(_) => {
					trace!(%job_id, "Job ended since the scan, leaving it alone");
					continue;
				}
				Err(e) => {
					warn!(%job_id, ?e, "Failed to re-read job before interrupting it;");
					continue;
				}
			};

			if let Err(e) = record.interrupt(INTERRUPTED_BY_RESTART, now) {
				warn!(?e, "Failed to interrupt zombie job;");
				continue;
			}

			if !inner.persist(&record).await {
				continue;
			}

			if let Some(cached) = inner.cache.lock().get_mut(&job_id) {
				if cached.status.is_active() {
					*cached = record;
				}
			}

			debug!(%job_id, "Zombie job marked as failed");
			recovered += 1;
		}

		if recovered > 0 {
			info!(%recovered, "Recovered interrupted jobs");
		}

		Ok(recovered)
	}
}
