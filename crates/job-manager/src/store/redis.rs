use crate::record::{JobId, JobRecord};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, RedisError};
use tracing::instrument;

use super::{decode, decode_all, encode, job_key, JobStore, StoreError, JOB_KEY_PREFIX, JOB_TTL};

const SCAN_BATCH: usize = 256;

impl From<RedisError> for StoreError {
	fn from(e: RedisError) -> Self {
		Self::Backend(e.to_string())
	}
}

/// Redis backed store, one `SET key value EX ttl` per write.
#[derive(Clone)]
pub struct RedisJobStore {
	conn: ConnectionManager,
}

impl RedisJobStore {
	#[must_use]
	pub const fn new(conn: ConnectionManager) -> Self {
		Self { conn }
	}

	pub async fn connect(url: &str) -> Result<Self, StoreError> {
		let client = redis::Client::open(url)?;
		Ok(Self::new(ConnectionManager::new(client).await?))
	}

	async fn scan_keys(&self) -> Result<Vec<String>, StoreError> {
		let mut conn = self.conn.clone();
		let pattern = format!("{JOB_KEY_PREFIX}*");

		let mut keys = Vec::new();
		let mut cursor = 0_u64;

		loop {
			let (next, batch) = redis::cmd("SCAN")
				.arg(cursor)
				.arg("MATCH")
				.arg(&pattern)
				.arg("COUNT")
				.arg(SCAN_BATCH)
				.query_async::<_, (u64, Vec<String>)>(&mut conn)
				.await?;

			keys.extend(batch);

			if next == 0 {
				break;
			}
			cursor = next;
		}

		Ok(keys)
	}
}

#[async_trait]
impl JobStore for RedisJobStore {
	#[instrument(skip_all, fields(job_id = %record.job_id), err)]
	async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
		let raw = encode(record)?;

		redis::cmd("SET")
			.arg(job_key(record.job_id))
			.arg(raw)
			.arg("EX")
			.arg(JOB_TTL.as_secs())
			.query_async::<_, ()>(&mut self.conn.clone())
			.await?;

		Ok(())
	}

	async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
		let key = job_key(job_id);

		let raw = redis::cmd("GET")
			.arg(&key)
			.query_async::<_, Option<String>>(&mut self.conn.clone())
			.await?;

		raw.map(|raw| decode(&key, &raw)).transpose()
	}

	async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
		redis::cmd("DEL")
			.arg(job_key(job_id))
			.query_async::<_, ()>(&mut self.conn.clone())
			.await?;

		Ok(())
	}

	#[instrument(skip_all, err)]
	async fn scan_all(&self) -> Result<Vec<JobRecord>, StoreError> {
		let keys = self.scan_keys().await?;
		let mut conn = self.conn.clone();

		let mut records = Vec::with_capacity(keys.len());

		for chunk in keys.chunks(SCAN_BATCH) {
			let values = redis::cmd("MGET")
				.arg(chunk)
				.query_async::<_, Vec<Option<String>>>(&mut conn)
				.await?;

			// Keys may expire between SCAN and MGET
			records.extend(decode_all(
				chunk
					.iter()
					.zip(&values)
					.filter_map(|(key, raw)| raw.as_deref().map(|raw| (key.as_str(), raw))),
			));
		}

		Ok(records)
	}
}
