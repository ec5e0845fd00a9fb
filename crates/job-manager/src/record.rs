//! Job records and their lifecycle state machine

use std::{collections::VecDeque, fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for JobId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s).map(Self)
	}
}

impl From<Uuid> for JobId {
	fn from(uuid: Uuid) -> Self {
		Self(uuid)
	}
}

impl From<JobId> for Uuid {
	fn from(id: JobId) -> Self {
		id.0
	}
}

/// Current status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	/// Job is waiting for a worker
	Pending,
	/// Job is currently running
	Running,
	/// Job completed successfully
	Completed,
	/// Job failed with an error
	Failed,
	/// Job was cancelled before it started
	Cancelled,
}

impl JobStatus {
	pub const ALL: [Self; 5] = [
		Self::Pending,
		Self::Running,
		Self::Completed,
		Self::Failed,
		Self::Cancelled,
	];

	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
	}

	#[must_use]
	pub const fn is_active(self) -> bool {
		matches!(self, Self::Pending | Self::Running)
	}

	/// Transitions only move forward: `Pending -> Running -> {Completed, Failed}` and
	/// `{Pending, Running} -> Cancelled`.
	#[must_use]
	pub const fn can_transition_to(self, next: Self) -> bool {
		matches!(
			(self, next),
			(Self::Pending, Self::Running | Self::Cancelled)
				| (
					Self::Running,
					Self::Completed | Self::Failed | Self::Cancelled
				)
		)
	}

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Running => "running",
			Self::Completed => "completed",
			Self::Failed => "failed",
			Self::Cancelled => "cancelled",
		}
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid job status transition <id='{job_id}', from='{from}', to='{to}'>")]
pub struct TransitionError {
	pub job_id: JobId,
	pub from: JobStatus,
	pub to: JobStatus,
}

/// Business metadata attached to a job at submission time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobMetadata {
	pub ticker: Option<String>,
	pub crew_name: Option<String>,
	pub user_id: Option<String>,
}

impl JobMetadata {
	#[must_use]
	pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
		self.ticker = Some(ticker.into());
		self
	}

	#[must_use]
	pub fn with_crew_name(mut self, crew_name: impl Into<String>) -> Self {
		self.crew_name = Some(crew_name.into());
		self
	}

	#[must_use]
	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub role: String,
	pub content: String,
	#[serde(with = "timestamp")]
	pub timestamp: DateTime<Utc>,
}

/// One unit of work and its lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
	pub job_id: JobId,
	pub status: JobStatus,
	#[serde(default)]
	pub result: Option<Value>,
	#[serde(default)]
	pub error: Option<String>,

	#[serde(with = "timestamp")]
	pub created_at: DateTime<Utc>,
	#[serde(with = "timestamp::option", default)]
	pub started_at: Option<DateTime<Utc>>,
	#[serde(with = "timestamp::option", default)]
	pub completed_at: Option<DateTime<Utc>>,

	#[serde(default)]
	pub progress: u8,
	#[serde(default)]
	pub progress_message: Option<String>,

	#[serde(default)]
	pub ticker: Option<String>,
	#[serde(default)]
	pub crew_name: Option<String>,
	#[serde(default)]
	pub user_id: Option<String>,

	#[serde(default)]
	pub chat_history: VecDeque<ChatMessage>,
}

impl fmt::Display for JobRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Job <id='{}', status='{}'>", self.job_id, self.status)
	}
}

impl JobRecord {
	#[must_use]
	pub fn new(job_id: JobId, metadata: JobMetadata) -> Self {
		let JobMetadata {
			ticker,
			crew_name,
			user_id,
		} = metadata;

		Self {
			job_id,
			status: JobStatus::Pending,
			result: None,
			error: None,
			created_at: Utc::now(),
			started_at: None,
			completed_at: None,
			progress: 0,
			progress_message: None,
			ticker,
			crew_name,
			user_id,
			chat_history: VecDeque::new(),
		}
	}

	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// A job owned by somebody is invisible to queries made on behalf of a different user,
	/// jobs without an owner are visible to everyone.
	#[must_use]
	pub fn is_visible_to(&self, user_id: Option<&str>) -> bool {
		match (user_id, self.user_id.as_deref()) {
			(Some(requester), Some(owner)) => requester == owner,
			_ => true,
		}
	}

	/// Whether the job completed longer than `retention` ago
	#[must_use]
	pub fn is_expired(&self, retention: Duration, now: DateTime<Utc>) -> bool {
		self.completed_at
			.is_some_and(|completed_at| now - completed_at > retention)
	}

	fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
		if self.status.can_transition_to(next) {
			self.status = next;
			Ok(())
		} else {
			Err(TransitionError {
				job_id: self.job_id,
				from: self.status,
				to: next,
			})
		}
	}

	pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
		self.transition(JobStatus::Running)?;
		self.started_at = Some(now);
		Ok(())
	}

	pub fn complete(&mut self, result: Value, now: DateTime<Utc>) -> Result<(), TransitionError> {
		self.transition(JobStatus::Completed)?;
		self.result = Some(result);
		self.completed_at = Some(now);
		self.progress = 100;
		Ok(())
	}

	pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
		self.transition(JobStatus::Failed)?;
		self.error = Some(error.into());
		self.completed_at = Some(now);
		Ok(())
	}

	/// Fails a job whose execution was lost, skipping `Running` if it never got there.
	pub fn interrupt(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
		if !self.status.is_active() {
			return Err(TransitionError {
				job_id: self.job_id,
				from: self.status,
				to: JobStatus::Failed,
			});
		}

		self.status = JobStatus::Failed;
		self.error = Some(error.into());
		self.completed_at = Some(now);
		Ok(())
	}

	pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
		self.transition(JobStatus::Cancelled)?;
		self.completed_at = Some(now);
		Ok(())
	}

	/// Clamps `progress` into `0..=100`
	pub fn set_progress(&mut self, progress: i64, message: Option<String>) {
		self.progress = u8::try_from(progress.clamp(0, 100)).unwrap_or(100);
		if message.is_some() {
			self.progress_message = message;
		}
	}

	/// Appends to the chat history, dropping the oldest entries beyond `limit`
	pub fn push_chat_message(
		&mut self,
		role: impl Into<String>,
		content: impl Into<String>,
		limit: usize,
	) {
		self.chat_history.push_back(ChatMessage {
			role: role.into(),
			content: content.into(),
			timestamp: Utc::now(),
		});

		while self.chat_history.len() > limit {
			self.chat_history.pop_front();
		}
	}

	/// Clears a completed job's result, returning whether there was anything to clear
	pub fn drop_result(&mut self) -> bool {
		self.result.take().is_some()
	}
}

/// Fixed width RFC 3339 timestamps (microseconds, `Z` suffix) so lexical order is time order.
mod timestamp {
	use chrono::{DateTime, SecondsFormat, Utc};
	use serde::{de, Deserialize, Deserializer, Serializer};

	pub fn format(dt: &DateTime<Utc>) -> String {
		dt.to_rfc3339_opts(SecondsFormat::Micros, true)
	}

	fn parse<E: de::Error>(raw: &str) -> Result<DateTime<Utc>, E> {
		DateTime::parse_from_rfc3339(raw)
			.map(|dt| dt.with_timezone(&Utc))
			.map_err(E::custom)
	}

	pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&format(dt))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
		parse(&String::deserialize(deserializer)?)
	}

	pub mod option {
		use chrono::{DateTime, Utc};
		use serde::{Deserialize, Deserializer, Serializer};

		pub fn serialize<S: Serializer>(
			dt: &Option<DateTime<Utc>>,
			serializer: S,
		) -> Result<S::Ok, S::Error> {
			match dt {
				Some(dt) => serializer.serialize_some(&super::format(dt)),
				None => serializer.serialize_none(),
			}
		}

		pub fn deserialize<'de, D: Deserializer<'de>>(
			deserializer: D,
		) -> Result<Option<DateTime<Utc>>, D::Error> {
			Option::<String>::deserialize(deserializer)?
				.map(|raw| super::parse(&raw))
				.transpose()
		}
	}
}
