//! Durable persistence of job records.
//!
//! Every record lives under the key `job:<uuid>` as a JSON document, and every write refreshes a
//! [`JOB_TTL`] expiration so abandoned entries eventually vanish on their own.

use crate::record::{JobId, JobRecord};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

mod blocking;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use blocking::BlockingJobStore;
pub use memory::MemoryJobStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisJobStore;

pub const JOB_KEY_PREFIX: &str = "job:";

/// Expiration applied to every write
pub const JOB_TTL: Duration = Duration::from_secs(86_400);

#[must_use]
pub fn job_key(job_id: JobId) -> String {
	format!("{JOB_KEY_PREFIX}{job_id}")
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("failed to serialize job <id='{job_id}'>: {source}")]
	Serialize {
		job_id: JobId,
		source: serde_json::Error,
	},
	#[error("failed to deserialize job stored at <key='{key}'>: {source}")]
	Deserialize {
		key: String,
		source: serde_json::Error,
	},
	#[error("job store backend error: {0}")]
	Backend(String),
	#[error("job store can't enumerate its entries")]
	EnumerationUnsupported,
	#[error("blocking job store called from inside a current thread runtime")]
	WouldBlock,
}

#[async_trait]
pub trait JobStore: Send + Sync + 'static {
	/// Writes the whole record, replacing any previous version and resetting its expiration
	async fn save(&self, record: &JobRecord) -> Result<(), StoreError>;

	async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;

	async fn delete(&self, job_id: JobId) -> Result<(), StoreError>;

	/// Every stored job, in no particular order.
	///
	/// Backends that can't enumerate their keys keep this default, which makes recovery a no-op.
	async fn scan_all(&self) -> Result<Vec<JobRecord>, StoreError> {
		Err(StoreError::EnumerationUnsupported)
	}

	/// Jobs visible to `owner`, newest first, at most `limit` of them
	async fn list(&self, owner: Option<&str>, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
		self.scan_all()
			.await
			.map(|records| newest_visible(records, owner, limit))
	}
}

pub(crate) fn encode(record: &JobRecord) -> Result<String, StoreError> {
	serde_json::to_string(record).map_err(|source| StoreError::Serialize {
		job_id: record.job_id,
		source,
	})
}

pub(crate) fn decode(key: &str, raw: &str) -> Result<JobRecord, StoreError> {
	serde_json::from_str(raw).map_err(|source| StoreError::Deserialize {
		key: key.to_string(),
		source,
	})
}

/// Decodes every entry, skipping (and logging) the ones that can't be read back
pub(crate) fn decode_all<'a>(
	entries: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<JobRecord> {
	entries
		.into_iter()
		.filter_map(|(key, raw)| {
			decode(key, raw)
				.map_err(|e| warn!(?e, "Skipping unreadable stored job;"))
				.ok()
		})
		.collect()
}

pub(crate) fn newest_visible(
	records: impl IntoIterator<Item = JobRecord>,
	owner: Option<&str>,
	limit: usize,
) -> Vec<JobRecord> {
	let mut records = records
		.into_iter()
		.filter(|record| record.is_visible_to(owner))
		.collect::<Vec<_>>();

	records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
	records.truncate(limit);

	records
}
