//! What a job actually runs, and what it gets to know about itself while doing so

use crate::record::JobId;

use std::{
	fmt,
	future::Future,
	sync::{Arc, Weak},
};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info_span, Span};
use uuid::Uuid;

/// A unit of work submitted to the job manager.
///
/// Any `Fn(WorkContext) -> impl Future<Output = anyhow::Result<Value>>` closure is a [`Work`], so
/// most callers never implement this trait by hand.
#[async_trait]
pub trait Work: Send + Sync + 'static {
	async fn run(&self, ctx: WorkContext) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> Work for F
where
	F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
	async fn run(&self, ctx: WorkContext) -> anyhow::Result<Value> {
		(self)(ctx).await
	}
}

pub(crate) trait ProgressSink: Send + Sync + 'static {
	fn update_progress(&self, job_id: JobId, progress: i64, message: Option<String>) -> bool;
}

/// Forwards progress updates of a running job back to its manager.
///
/// It doesn't keep the manager alive: once the manager is gone every report is simply refused.
#[derive(Clone)]
pub struct ProgressReporter {
	job_id: JobId,
	sink: Option<Weak<dyn ProgressSink>>,
}

impl fmt::Debug for ProgressReporter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProgressReporter")
			.field("job_id", &self.job_id)
			.field("attached", &self.sink.is_some())
			.finish()
	}
}

impl ProgressReporter {
	pub(crate) fn new(job_id: JobId, sink: Weak<dyn ProgressSink>) -> Self {
		Self {
			job_id,
			sink: Some(sink),
		}
	}

	/// A reporter that goes nowhere, for running works outside of a manager
	#[must_use]
	pub const fn detached(job_id: JobId) -> Self {
		Self { job_id, sink: None }
	}

	/// Returns `false` if the update was refused, see [`crate::JobManager::update_progress`]
	pub fn report(&self, progress: i64, message: Option<&str>) -> bool {
		self.sink
			.as_ref()
			.and_then(Weak::upgrade)
			.is_some_and(|sink: Arc<dyn ProgressSink>| {
				sink.update_progress(self.job_id, progress, message.map(ToString::to_string))
			})
	}
}

/// Everything a [`Work`] knows about the job running it
#[derive(Debug, Clone)]
pub struct WorkContext {
	pub job_id: JobId,
	pub ticker: Option<String>,
	pub crew_name: Option<String>,
	pub user_id: Option<String>,
	progress: ProgressReporter,
}

impl WorkContext {
	#[must_use]
	pub const fn new(
		job_id: JobId,
		ticker: Option<String>,
		crew_name: Option<String>,
		user_id: Option<String>,
		progress: ProgressReporter,
	) -> Self {
		Self {
			job_id,
			ticker,
			crew_name,
			user_id,
			progress,
		}
	}

	#[must_use]
	pub const fn progress(&self) -> &ProgressReporter {
		&self.progress
	}

	pub fn report_progress(&self, progress: i64, message: Option<&str>) -> bool {
		self.progress.report(progress, message)
	}
}

/// The span a single execution of a job runs in.
///
/// `run_id` tells apart different executions of the same job, every log emitted by the work and
/// by anything it calls is nested under it.
#[must_use]
pub fn job_span(job_id: JobId, run_id: Uuid, user_id: Option<&str>, ticker: Option<&str>) -> Span {
	info_span!(
		"job_execution",
		%job_id,
		%run_id,
		user_id = user_id,
		ticker = ticker,
	)
}
