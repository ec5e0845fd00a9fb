use crewlab_job_manager::{
	EmitError, EventEmitter, JobEvent, JobEventKind, JobId, JobRecord, JobStore, MemoryJobStore,
	StoreError,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

/// A store that can read and write single keys but has no way to enumerate them
#[derive(Debug, Default)]
pub struct KeyValueOnlyStore {
	inner: MemoryJobStore,
}

#[async_trait]
impl JobStore for KeyValueOnlyStore {
	async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
		self.inner.save(record).await
	}

	async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
		self.inner.get(job_id).await
	}

	async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
		self.inner.delete(job_id).await
	}
}

/// Snapshots its entries when scanned, then holds the scan until `gate` is notified
#[derive(Debug, Default)]
pub struct GatedScanStore {
	pub inner: MemoryJobStore,
	pub scanned: Notify,
	pub gate: Notify,
}

#[async_trait]
impl JobStore for GatedScanStore {
	async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
		self.inner.save(record).await
	}

	async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
		self.inner.get(job_id).await
	}

	async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
		self.inner.delete(job_id).await
	}

	async fn scan_all(&self) -> Result<Vec<JobRecord>, StoreError> {
		let snapshot = self.inner.scan_all().await?;
		self.scanned.notify_one();
		self.gate.notified().await;
		Ok(snapshot)
	}
}

/// A store whose backend is never reachable
#[derive(Debug, Default)]
pub struct UnreachableStore;

#[async_trait]
impl JobStore for UnreachableStore {
	async fn save(&self, _record: &JobRecord) -> Result<(), StoreError> {
		Err(StoreError::Backend("connection refused".to_string()))
	}

	async fn get(&self, _job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
		Err(StoreError::Backend("connection refused".to_string()))
	}

	async fn delete(&self, _job_id: JobId) -> Result<(), StoreError> {
		Err(StoreError::Backend("connection refused".to_string()))
	}

	async fn scan_all(&self) -> Result<Vec<JobRecord>, StoreError> {
		Err(StoreError::Backend("connection refused".to_string()))
	}
}

/// Keeps every event it was asked to emit, optionally failing each time
#[derive(Debug, Default)]
pub struct RecordingEmitter {
	pub events: Mutex<Vec<JobEvent>>,
	pub failing: bool,
}

impl RecordingEmitter {
	pub fn failing() -> Self {
		Self {
			events: Mutex::default(),
			failing: true,
		}
	}

	pub fn events(&self) -> Vec<JobEvent> {
		self.events.lock().clone()
	}
}

#[async_trait]
impl EventEmitter for RecordingEmitter {
	async fn emit_event(
		&self,
		user_id: &str,
		kind: JobEventKind,
		data: Value,
	) -> Result<(), EmitError> {
		self.events.lock().push(JobEvent {
			user_id: user_id.to_string(),
			kind,
			data,
		});

		if self.failing {
			Err(EmitError::Delivery("push service unavailable".to_string()))
		} else {
			Ok(())
		}
	}
}
