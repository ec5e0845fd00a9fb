//! Notifications sent to a job's owner once it reaches a final outcome

use crate::record::{JobRecord, JobStatus};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
	JobCompleted,
	JobFailed,
}

impl JobEventKind {
	/// Only completions and failures are worth telling the owner about
	#[must_use]
	pub const fn for_status(status: JobStatus) -> Option<Self> {
		match status {
			JobStatus::Completed => Some(Self::JobCompleted),
			JobStatus::Failed => Some(Self::JobFailed),
			JobStatus::Pending | JobStatus::Running | JobStatus::Cancelled => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
	pub user_id: String,
	pub kind: JobEventKind,
	pub data: Value,
}

/// Payload sent along a job event, results are left out on purpose as they can be huge
#[must_use]
pub fn event_data(record: &JobRecord) -> Value {
	json!({
		"job_id": record.job_id,
		"status": record.status,
		"ticker": record.ticker,
		"crew_name": record.crew_name,
		"error": record.error,
	})
}

#[derive(Debug, Error)]
pub enum EmitError {
	#[error("no subscribers listening for job events")]
	NoSubscribers,
	#[error("failed to deliver job event: {0}")]
	Delivery(String),
}

#[async_trait]
pub trait EventEmitter: Send + Sync + 'static {
	async fn emit_event(
		&self,
		user_id: &str,
		kind: JobEventKind,
		data: Value,
	) -> Result<(), EmitError>;
}

/// In process [`EventEmitter`] fanning events out to every subscriber
#[derive(Debug, Clone)]
pub struct EventBus {
	sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}

#[async_trait]
impl EventEmitter for EventBus {
	async fn emit_event(
		&self,
		user_id: &str,
		kind: JobEventKind,
		data: Value,
	) -> Result<(), EmitError> {
		self.sender
			.send(JobEvent {
				user_id: user_id.to_string(),
				kind,
				data,
			})
			.map(|_| ())
			.map_err(|_| EmitError::NoSubscribers)
	}
}
