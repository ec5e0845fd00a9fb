use crate::{
	cache::BoundedJobCache,
	config::{retention_window, JobManagerConfig},
	error::{JobError, JobManagerError},
	events::{event_data, EventEmitter, JobEventKind},
	record::{JobId, JobMetadata, JobRecord, JobStatus},
	store::JobStore,
	work::{job_span, ProgressReporter, ProgressSink, Work, WorkContext},
};

use crewlab_task_system::{Task, TaskId, TaskRemoteController, TaskSystem};

use std::{
	any::Any,
	collections::{HashMap, HashSet},
	panic::{self, AssertUnwindSafe},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Weak,
	},
};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, trace, warn, Instrument};
use uuid::Uuid;

/// Entry of the live execution registry, a job is live from submission until its execution ends
#[derive(Debug)]
pub(crate) enum LiveJob {
	/// Submitted but the worker pool didn't hand out a controller yet
	Dispatching,
	Dispatched(TaskRemoteController),
}

/// Point in time counters of the live cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
	pub cached: usize,
	pub capacity: usize,
	pub live: usize,
	pub pending: usize,
	pub running: usize,
	pub completed: usize,
	pub failed: usize,
	pub cancelled: usize,
}

/// Runs submitted works on a fixed pool of workers, tracking every job through its lifecycle.
///
/// Cloning is cheap and every clone drives the same jobs, so construct one at startup and hand
/// clones to whoever needs it.
#[derive(Clone)]
pub struct JobManager {
	pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
	pub(crate) config: JobManagerConfig,
	pub(crate) cache: Mutex<BoundedJobCache>,
	pub(crate) store: Arc<dyn JobStore>,
	emitter: Option<Arc<dyn EventEmitter>>,
	pub(crate) live: Mutex<HashMap<JobId, LiveJob>>,
	task_system: TaskSystem<JobError>,
	accepting: AtomicBool,
}

impl JobManager {
	/// Starts the worker pool on the current tokio runtime.
	///
	/// # Panics
	///
	/// Will panic if called outside of a tokio runtime.
	#[must_use]
	pub fn new(
		config: JobManagerConfig,
		store: Arc<dyn JobStore>,
		emitter: Option<Arc<dyn EventEmitter>>,
	) -> Self {
		let task_system = TaskSystem::new(config.worker_pool_size);

		info!(
			max_jobs_in_memory = config.max_jobs_in_memory,
			retention_hours = config.retention_hours,
			worker_pool_size = task_system.workers_count(),
			"Job manager started",
		);

		Self {
			inner: Arc::new(Inner {
				cache: Mutex::new(BoundedJobCache::new(config.max_jobs_in_memory)),
				config,
				store,
				emitter,
				live: Mutex::new(HashMap::new()),
				task_system,
				accepting: AtomicBool::new(true),
			}),
		}
	}

	#[must_use]
	pub fn config(&self) -> &JobManagerConfig {
		&self.inner.config
	}

	/// Startup hook, fails jobs a previous process left behind.
	///
	/// Recovery failures are only logged, the manager is usable regardless.
	pub async fn initialize(&self) {
		match self.recover_jobs().await {
			Ok(recovered) => debug!(%recovered, "Job manager initialized"),
			Err(e) => warn!(?e, "Failed to recover interrupted jobs;"),
		}
	}

	/// Enqueues a work and returns right away, the work runs once a worker is free.
	#[instrument(skip_all, fields(job_id), err)]
	pub async fn submit(
		&self,
		work: impl Work,
		metadata: JobMetadata,
	) -> Result<JobId, JobManagerError> {
		if !self.inner.accepting.load(Ordering::Acquire) {
			return Err(JobManagerError::ShuttingDown);
		}

		let job_id = JobId::new();
		tracing::Span::current().record("job_id", tracing::field::display(job_id));

		let record = JobRecord::new(job_id, metadata);

		self.inner.live.lock().insert(job_id, LiveJob::Dispatching);
		self.inner.cache_insert(record.clone());
		self.inner.persist(&record).await;

		let dispatched = self
			.inner
			.task_system
			.dispatch(JobExecution {
				job_id,
				work: Box::new(work),
				inner: Arc::clone(&self.inner),
			})
			.await;

		match dispatched {
			Ok(handle) => {
				// The execution may have finished already, in which case it left the registry
				if let Some(entry) = self.inner.live.lock().get_mut(&job_id) {
					*entry = LiveJob::Dispatched(handle.remote_controller());
				}

				info!(ticker = ?record.ticker, user_id = ?record.user_id, "Job submitted");

				Ok(job_id)
			}
			Err(e) => {
				debug!(?e, "Worker pool refused the job");

				self.inner.cache.lock().remove(&job_id);
				if let Err(e) = self.inner.store.delete(job_id).await {
					warn!(?e, "Failed to remove refused job from the store;");
				}
				// Leaves the registry last, a stored active job that isn't live reads as a zombie
				self.inner.live.lock().remove(&job_id);

				Err(JobManagerError::ShuttingDown)
			}
		}
	}

	/// Current snapshot of a job, served from the live cache or rehydrated from the store.
	///
	/// Jobs owned by someone other than `user_id` are reported as absent, as are jobs that finished
	/// longer than the retention window ago.
	pub async fn get_status(&self, job_id: JobId, user_id: Option<&str>) -> Option<JobRecord> {
		let cached = self.inner.cache.lock().get(&job_id).cloned();
		if let Some(record) = cached {
			return record.is_visible_to(user_id).then_some(record);
		}

		let record = match self.inner.store.get(job_id).await {
			Ok(Some(record)) => record,
			Ok(None) => return None,
			Err(e) => {
				warn!(%job_id, ?e, "Failed to fetch job from the store;");
				return None;
			}
		};

		if record.is_expired(self.inner.config.retention(), Utc::now()) {
			trace!(%job_id, "Stored job is past retention, not rehydrating");
			return None;
		}

		self.inner.rehydrate(&record);

		record.is_visible_to(user_id).then_some(record)
	}

	/// Result of a completed job, falling back to the store when the cached copy dropped it
	pub async fn get_result(&self, job_id: JobId) -> Option<Value> {
		let cached = self
			.inner
			.cache
			.lock()
			.peek(&job_id)
			.map(|record| (record.status, record.result.clone()));

		match cached {
			Some((status, _)) if status != JobStatus::Completed => return None,
			Some((_, Some(result))) => return Some(result),
			// Dropped from memory or never cached
			_ => {}
		}

		match self.inner.store.get(job_id).await {
			Ok(record) => record
				.filter(|record| record.status == JobStatus::Completed)
				.and_then(|record| record.result),
			Err(e) => {
				warn!(%job_id, ?e, "Failed to fetch job result from the store;");
				None
			}
		}
	}

	/// Cancels a job still waiting for a worker.
	///
	/// Work that already started is never interrupted: `false` is returned and the job carries on,
	/// the same goes for finished and unknown jobs.
	#[instrument(skip(self))]
	pub async fn cancel(&self, job_id: JobId) -> bool {
		let controller = match self.inner.live.lock().get(&job_id) {
			Some(LiveJob::Dispatched(controller)) => controller.clone(),
			Some(LiveJob::Dispatching) | None => return false,
		};

		if !controller.cancel() {
			return false;
		}

		self.inner.live.lock().remove(&job_id);

		let snapshot = {
			let mut cache = self.inner.cache.lock();
			cache.get_mut(&job_id).and_then(|record| {
				record
					.cancel(Utc::now())
					.map_err(|e| warn!(?e, "Canceled job had an unexpected status;"))
					.ok()
					.map(|()| record.clone())
			})
		};

		if let Some(snapshot) = snapshot {
			self.inner.persist(&snapshot).await;
		}

		self.inner.shrink_cache();

		info!("Job canceled");

		true
	}

	/// Jobs visible to `user_id`, optionally with a given status, newest first.
	///
	/// Cached jobs are merged with the ones only the store still knows about.
	pub async fn list_jobs(
		&self,
		status: Option<JobStatus>,
		user_id: Option<&str>,
		limit: usize,
	) -> Vec<JobRecord> {
		let wanted = |record: &JobRecord| {
			status.map_or(true, |status| record.status == status) && record.is_visible_to(user_id)
		};

		let mut jobs = self
			.inner
			.cache
			.lock()
			.iter()
			.filter(|record| wanted(record))
			.cloned()
			.collect::<Vec<_>>();

		// The status and retention filters below must see every stored job, only the merged
		// listing is truncated
		match self.inner.store.list(user_id, usize::MAX).await {
			Ok(stored) => {
				let retention = self.inner.config.retention();
				let now = Utc::now();
				let mut seen = jobs.iter().map(|record| record.job_id).collect::<HashSet<_>>();

				jobs.extend(stored.into_iter().filter(|record| {
					wanted(record)
						&& !record.is_expired(retention, now)
						&& seen.insert(record.job_id)
				}));
			}
			Err(e) => debug!(?e, "Listing jobs from the live cache only;"),
		}

		jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		jobs.truncate(limit);

		jobs
	}

	/// Appends to a cached job's chat history, the oldest messages go once the bound is reached
	pub async fn add_chat_message(
		&self,
		job_id: JobId,
		role: impl Into<String>,
		content: impl Into<String>,
	) -> bool {
		let snapshot = {
			let mut cache = self.inner.cache.lock();
			let Some(record) = cache.get_mut(&job_id) else {
				return false;
			};

			record.push_chat_message(role, content, self.inner.config.max_chat_messages_per_job);
			record.clone()
		};

		self.inner.persist_snapshot(snapshot).await;

		true
	}

	/// Updates the progress of a pending or running job, clamping it into `0..=100`.
	///
	/// Progress lives in memory only, it is persisted along with the next lifecycle transition.
	pub fn update_progress(&self, job_id: JobId, progress: i64, message: Option<&str>) -> bool {
		self.inner
			.update_progress(job_id, progress, message.map(ToString::to_string))
	}

	/// Removes cached jobs that finished more than `hours` ago (the retention window by default).
	///
	/// The store is left alone, its own expiration takes care of it.
	pub fn cleanup_old_jobs(&self, hours: Option<u64>) -> usize {
		let retention = hours.map_or_else(|| self.inner.config.retention(), retention_window);
		let now = Utc::now();

		let removed = self
			.inner
			.cache
			.lock()
			.retain(|record| !record.is_expired(retention, now));

		if removed > 0 {
			info!(%removed, "Cleaned up old jobs from memory");
		}

		removed
	}

	/// Forgets a finished job, both from memory and from the store
	#[instrument(skip(self), err)]
	pub async fn delete_job(&self, job_id: JobId) -> Result<bool, JobManagerError> {
		let active_in_cache = self
			.inner
			.cache
			.lock()
			.peek(&job_id)
			.is_some_and(|record| record.status.is_active());

		if active_in_cache || self.inner.is_live(job_id) {
			return Err(JobManagerError::JobActive(job_id));
		}

		let was_cached = self.inner.cache.lock().remove(&job_id).is_some();
		let was_stored = self.inner.store.get(job_id).await?.is_some();

		self.inner.store.delete(job_id).await?;

		Ok(was_cached || was_stored)
	}

	#[must_use]
	pub fn stats(&self) -> JobStats {
		let live = self.inner.live.lock().len();
		let cache = self.inner.cache.lock();

		cache.iter().fold(
			JobStats {
				cached: cache.len(),
				capacity: cache.capacity(),
				live,
				..Default::default()
			},
			|mut stats, record| {
				match record.status {
					JobStatus::Pending => stats.pending += 1,
					JobStatus::Running => stats.running += 1,
					JobStatus::Completed => stats.completed += 1,
					JobStatus::Failed => stats.failed += 1,
					JobStatus::Cancelled => stats.cancelled += 1,
				}
				stats
			},
		)
	}

	/// Stops accepting jobs. With `wait`, only returns once every queued and running job is done.
	#[instrument(skip(self))]
	pub async fn shutdown(&self, wait: bool) {
		if !self.inner.accepting.swap(false, Ordering::AcqRel) {
			warn!("Job manager was already shutting down");
		}

		self.inner.task_system.shutdown(wait).await;

		info!("Job manager shutdown");
	}
}

impl Inner {
	/// Best effort write, failures are logged and reported back as `false`
	pub(crate) async fn persist(&self, record: &JobRecord) -> bool {
		match self.store.save(record).await {
			Ok(()) => true,
			Err(e) => {
				warn!(job_id = %record.job_id, ?e, "Failed to persist job;");
				false
			}
		}
	}

	/// Persists a cached snapshot, restoring a result that was dropped from memory first so it
	/// isn't wiped from the store as well
	async fn persist_snapshot(&self, mut snapshot: JobRecord) -> bool {
		if snapshot.status == JobStatus::Completed && snapshot.result.is_none() {
			match self.store.get(snapshot.job_id).await {
				Ok(Some(stored)) => snapshot.result = stored.result,
				Ok(None) => {}
				Err(e) => {
					warn!(
						job_id = %snapshot.job_id,
						?e,
						"Not persisting job, can't read back its dropped result;",
					);
					return false;
				}
			}
		}

		self.persist(&snapshot).await
	}

	pub(crate) fn cache_insert(&self, record: JobRecord) {
		let job_id = record.job_id;
		let outcome = self.cache.lock().insert(record);

		if !outcome.evicted.is_empty() {
			trace!(evicted = ?outcome.evicted, "Evicted finished jobs from memory");
		}

		if outcome.over_capacity {
			warn!(
				%job_id,
				capacity = self.config.max_jobs_in_memory,
				"Job cache is full of active jobs, growing past its capacity",
			);
		}
	}

	/// Puts a stored job back in memory, unless a live copy is already there
	fn rehydrate(&self, record: &JobRecord) {
		let mut cached = record.clone();
		if cached.status == JobStatus::Completed && self.config.drop_result_from_memory {
			cached.drop_result();
		}

		if self.cache.lock().contains(&record.job_id) {
			return;
		}

		trace!(job_id = %record.job_id, "Rehydrating job from the store");
		self.cache_insert(cached);
	}

	pub(crate) fn is_live(&self, job_id: JobId) -> bool {
		self.live.lock().contains_key(&job_id)
	}

	/// Moves a job to `Running`, handing back what its work needs to know
	async fn begin(self: &Arc<Self>, job_id: JobId) -> Option<WorkContext> {
		let snapshot = {
			let mut cache = self.cache.lock();
			let Some(record) = cache.get_mut(&job_id) else {
				warn!(%job_id, "Picked up a job missing from memory");
				return None;
			};

			if let Err(e) = record.start(Utc::now()) {
				warn!(?e, "Picked up a job that can't be started;");
				return None;
			}

			record.clone()
		};

		self.persist(&snapshot).await;

		let sink: Weak<Self> = Arc::downgrade(self);

		Some(WorkContext::new(
			job_id,
			snapshot.ticker,
			snapshot.crew_name,
			snapshot.user_id,
			ProgressReporter::new(job_id, sink),
		))
	}

	/// Records the outcome of a job's work, then runs the best effort side effects each on its
	/// own: persisting, dropping the cached result, notifying and leaving the live registry.
	async fn finish(&self, job_id: JobId, outcome: Result<Value, String>) {
		let now = Utc::now();

		let snapshot = {
			let mut cache = self.cache.lock();
			cache.get_mut(&job_id).and_then(|record| {
				let transition = match outcome {
					Ok(result) => record.complete(result, now),
					Err(error) => record.fail(error, now),
				};

				transition
					.map_err(|e| warn!(?e, "Failed to record job outcome;"))
					.ok()
					.map(|()| record.clone())
			})
		};

		if let Some(snapshot) = snapshot {
			let persisted = self.persist(&snapshot).await;

			if persisted
				&& self.config.drop_result_from_memory
				&& snapshot.status == JobStatus::Completed
			{
				self.drop_cached_result(job_id);
			}

			self.shrink_cache();

			self.notify(&snapshot).await;

			debug!(status = %snapshot.status, "Job finished");
		}

		self.live.lock().remove(&job_id);
	}

	/// Brings the cache back within its bound once active jobs that overflowed it are finished
	pub(crate) fn shrink_cache(&self) {
		let evicted = self.cache.lock().shrink_to_capacity();

		if !evicted.is_empty() {
			trace!(?evicted, "Evicted finished jobs from memory");
		}
	}

	fn drop_cached_result(&self, job_id: JobId) {
		if let Some(record) = self.cache.lock().get_mut(&job_id) {
			if record.drop_result() {
				trace!(%job_id, "Dropped persisted result from memory");
			}
		}
	}

	async fn notify(&self, record: &JobRecord) {
		let (Some(emitter), Some(user_id)) = (&self.emitter, record.user_id.as_deref()) else {
			return;
		};

		let Some(kind) = JobEventKind::for_status(record.status) else {
			return;
		};

		if let Err(e) = emitter.emit_event(user_id, kind, event_data(record)).await {
			debug!(job_id = %record.job_id, ?e, "Failed to notify job owner;");
		}
	}
}

impl ProgressSink for Inner {
	fn update_progress(&self, job_id: JobId, progress: i64, message: Option<String>) -> bool {
		let mut cache = self.cache.lock();

		match cache.get_mut(&job_id) {
			Some(record) if !record.is_terminal() => {
				record.set_progress(progress, message);
				true
			}
			_ => false,
		}
	}
}

/// The task dispatched to the worker pool for each submitted job
struct JobExecution {
	job_id: JobId,
	work: Box<dyn Work>,
	inner: Arc<Inner>,
}

#[async_trait]
impl Task<JobError> for JobExecution {
	fn id(&self) -> TaskId {
		self.job_id.0
	}

	async fn run(&mut self) -> Result<(), JobError> {
		let job_id = self.job_id;

		let Some(ctx) = self.inner.begin(job_id).await else {
			self.inner.live.lock().remove(&job_id);
			return Ok(());
		};

		let span = job_span(
			job_id,
			Uuid::new_v4(),
			ctx.user_id.as_deref(),
			ctx.ticker.as_deref(),
		);

		let outcome = AssertUnwindSafe(self.work.run(ctx).instrument(span.clone()))
			.catch_unwind()
			.await;

		match outcome {
			Ok(Ok(result)) => {
				self.inner.finish(job_id, Ok(result)).instrument(span).await;
				Ok(())
			}
			Ok(Err(e)) => {
				let message = e.to_string();
				self.inner
					.finish(job_id, Err(message.clone()))
					.instrument(span)
					.await;
				Err(JobError::Work { job_id, message })
			}
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				self.inner.finish(job_id, Err(message)).instrument(span).await;
				panic::resume_unwind(payload)
			}
		}
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	payload
		.downcast_ref::<&str>()
		.map(ToString::to_string)
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "job panicked".to_string())
}
