use crate::record::{JobId, JobRecord};

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{decode, decode_all, encode, job_key, JobStore, StoreError, JOB_KEY_PREFIX, JOB_TTL};

#[derive(Debug)]
struct Entry {
	raw: String,
	expires_at: Instant,
}

/// Process local store keeping the same wire format a networked key value store would.
///
/// Expired entries are invisible to every read and purged lazily on the next write.
#[derive(Debug)]
pub struct MemoryJobStore {
	entries: Mutex<HashMap<String, Entry>>,
	ttl: Duration,
}

impl Default for MemoryJobStore {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryJobStore {
	#[must_use]
	pub fn new() -> Self {
		Self::with_ttl(JOB_TTL)
	}

	#[must_use]
	pub fn with_ttl(ttl: Duration) -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			ttl,
		}
	}

	/// The JSON document stored for a job, as written
	#[must_use]
	pub fn raw(&self, job_id: JobId) -> Option<String> {
		let now = Instant::now();
		self.entries
			.lock()
			.get(&job_key(job_id))
			.filter(|entry| entry.expires_at > now)
			.map(|entry| entry.raw.clone())
	}

	/// Time left until the job's entry expires
	#[must_use]
	pub fn time_to_live(&self, job_id: JobId) -> Option<Duration> {
		let now = Instant::now();
		self.entries
			.lock()
			.get(&job_key(job_id))
			.filter(|entry| entry.expires_at > now)
			.map(|entry| entry.expires_at - now)
	}

	/// Number of live entries
	#[must_use]
	pub fn len(&self) -> usize {
		let now = Instant::now();
		self.entries
			.lock()
			.values()
			.filter(|entry| entry.expires_at > now)
			.count()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait]
impl JobStore for MemoryJobStore {
	async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
		let raw = encode(record)?;
		let now = Instant::now();

		let mut entries = self.entries.lock();
		entries.retain(|_, entry| entry.expires_at > now);
		entries.insert(
			job_key(record.job_id),
			Entry {
				raw,
				expires_at: now + self.ttl,
			},
		);

		Ok(())
	}

	async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
		let key = job_key(job_id);

		self.raw(job_id)
			.map(|raw| decode(&key, &raw))
			.transpose()
	}

	async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
		self.entries.lock().remove(&job_key(job_id));
		Ok(())
	}

	async fn scan_all(&self) -> Result<Vec<JobRecord>, StoreError> {
		let now = Instant::now();
		let entries = self.entries.lock();

		Ok(decode_all(
			entries
				.iter()
				.filter(|(key, entry)| key.starts_with(JOB_KEY_PREFIX) && entry.expires_at > now)
				.map(|(key, entry)| (key.as_str(), entry.raw.as_str())),
		))
	}
}
