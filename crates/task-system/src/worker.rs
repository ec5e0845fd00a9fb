use std::{any::Any, panic::AssertUnwindSafe};

use async_channel as chan;
use futures::FutureExt;
use tokio::{spawn, task::JoinHandle};
use tracing::{error, info, info_span, trace, Instrument};

use super::{
	error::RunError,
	task::{TaskStatus, TaskWorkState},
};

pub(crate) type WorkerId = usize;

pub(crate) struct Worker {
	pub id: WorkerId,
	pub handle: JoinHandle<()>,
}

impl Worker {
	pub fn spawn<E: RunError>(id: WorkerId, queue_rx: chan::Receiver<TaskWorkState<E>>) -> Self {
		let handle = spawn(
			async move {
				trace!("Worker message processing task starting...");
				while let Err(e) = spawn(run(queue_rx.clone()).in_current_span()).await {
					if e.is_panic() {
						error!(?e, "Worker critically failed and will restart;");
					} else {
						trace!("Worker received shutdown signal and will exit...");
						break;
					}
				}

				info!("Worker gracefully shutdown");
			}
			.instrument(info_span!("task_system_worker", worker_id = id)),
		);

		Self { id, handle }
	}
}

/// Pulls tasks until the queue is closed and fully drained, so closing the queue lets every
/// already enqueued task still reach a worker.
async fn run<E: RunError>(queue_rx: chan::Receiver<TaskWorkState<E>>) {
	while let Ok(task_work_state) = queue_rx.recv().await {
		run_single_task(task_work_state).await;
	}

	trace!("Task queue closed and drained");
}

async fn run_single_task<E: RunError>(
	TaskWorkState {
		mut task,
		worktable,
		done_tx,
	}: TaskWorkState<E>,
) {
	let task_id = task.id();

	if !worktable.try_start() {
		trace!(%task_id, "Task was canceled before a worker picked it up");
		if done_tx.send(TaskStatus::Canceled).is_err() {
			trace!(%task_id, "Task handle dropped before receiving cancel status");
		}
		return;
	}

	trace!(%task_id, "Running task");

	let status = match AssertUnwindSafe(task.run()).catch_unwind().await {
		Ok(Ok(())) => {
			trace!(%task_id, "Task completed");
			TaskStatus::Done(task_id)
		}
		Ok(Err(e)) => {
			error!(%task_id, ?e, "Task failed");
			TaskStatus::Error(e)
		}
		Err(panic) => {
			let message = panic_message(panic.as_ref());
			error!(%task_id, %message, "Task panicked");
			TaskStatus::Panicked(message)
		}
	};

	worktable.set_completed();

	if done_tx.send(status).is_err() {
		trace!(%task_id, "Task handle dropped before receiving the task status");
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	panic
		.downcast_ref::<&str>()
		.map(ToString::to_string)
		.or_else(|| panic.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "<non-string panic payload>".to_string())
}
