use std::sync::Arc;

use async_channel as chan;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, instrument, trace, warn};

use super::{
	error::{RunError, SystemError},
	task::{IntoTask, TaskHandle, TaskRemoteController, TaskWorkState, TaskWorktable},
	worker::Worker,
};

/// A fixed-size pool of workers sharing a single unbounded task queue.
///
/// Tasks are picked in dispatch order by whichever worker is idle first, so there is no ordering
/// guarantee between independently dispatched tasks.
pub struct System<E: RunError> {
	queue_tx: chan::Sender<TaskWorkState<E>>,
	workers: Mutex<Vec<Worker>>,
	workers_count: usize,
}

impl<E: RunError> System<E> {
	/// Spawns `workers_count` workers on the current tokio runtime, a count of zero is raised to one.
	///
	/// # Panics
	///
	/// Will panic if called outside of a tokio runtime.
	#[must_use]
	pub fn new(workers_count: usize) -> Self {
		let workers_count = workers_count.max(1);

		let (queue_tx, queue_rx) = chan::unbounded();

		let workers = (0..workers_count)
			.map(|id| Worker::spawn(id, queue_rx.clone()))
			.collect::<Vec<_>>();

		info!(%workers_count, "Task system started");

		Self {
			queue_tx,
			workers: Mutex::new(workers),
			workers_count,
		}
	}

	/// Enqueues a task, returning right away with a handle to await or cancel it.
	pub async fn dispatch(&self, into_task: impl IntoTask<E>) -> Result<TaskHandle<E>, SystemError> {
		let task = into_task.into_task();
		let task_id = task.id();

		let (done_tx, done_rx) = oneshot::channel();
		let worktable = Arc::new(TaskWorktable::new());

		self.queue_tx
			.send(TaskWorkState {
				task,
				worktable: Arc::clone(&worktable),
				done_tx,
			})
			.await
			.map_err(|_| SystemError::Shutdown)?;

		trace!(%task_id, "Task dispatched");

		Ok(TaskHandle {
			done_rx,
			controller: TaskRemoteController { worktable, task_id },
		})
	}

	#[must_use]
	pub const fn workers_count(&self) -> usize {
		self.workers_count
	}

	/// Amount of tasks waiting for a worker
	#[must_use]
	pub fn pending_count(&self) -> usize {
		self.queue_tx.len()
	}

	#[must_use]
	pub fn is_shutdown(&self) -> bool {
		self.queue_tx.is_closed()
	}

	/// Stops accepting new tasks. Tasks already enqueued still run; with `wait` this method only
	/// returns after every one of them finished and all workers exited.
	#[instrument(skip(self))]
	pub async fn shutdown(&self, wait: bool) {
		if !self.queue_tx.close() {
			warn!("Trying to shutdown the tasks system that was already shutdown");
		}

		if !wait {
			return;
		}

		let workers = std::mem::take(&mut *self.workers.lock().await);

		for Worker { id, handle } in workers {
			if let Err(e) = handle.await {
				error!(worker_id = id, ?e, "Worker failed to shutdown on handle await");
			}
		}

		info!("Task system shutdown");
	}
}
