use std::{
	fmt,
	future::Future,
	pin::Pin,
	sync::{
		atomic::{AtomicU8, Ordering},
		Arc,
	},
	task::{Context, Poll},
};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{instrument, trace};
use uuid::Uuid;

use super::error::{RunError, SystemError};

pub type TaskId = Uuid;

/// Final word on a dispatched task, delivered through its [`TaskHandle`]
#[derive(Debug)]
pub enum TaskStatus<E: RunError> {
	Done(TaskId),
	/// Canceled while still queued, it never ran
	Canceled,
	Error(E),
	/// Carries the panic message, the worker that ran it keeps going
	Panicked(String),
}

pub trait IntoTask<E>: Send {
	fn into_task(self) -> Box<dyn Task<E>>;
}

impl<T: Task<E>, E: RunError> IntoTask<E> for T {
	fn into_task(self) -> Box<dyn Task<E>> {
		Box::new(self)
	}
}

/// Something a worker can run.
///
/// Every task dispatched to the same system shares one error type `E`.
#[async_trait]
pub trait Task<E: RunError>: Send + Sync + 'static {
	fn id(&self) -> TaskId;

	/// Called exactly once, by whichever worker pulls the task off the queue first. Nothing
	/// interrupts it afterwards, cancellation only applies to queued tasks.
	async fn run(&mut self) -> Result<(), E>;
}

impl<E: RunError> fmt::Debug for Box<dyn Task<E>> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Task <id='{}'>", self.id())
	}
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELED: u8 = 3;

/// Lifecycle state shared between a queued task and its controllers.
///
/// `QUEUED` only ever moves to `RUNNING` or `CANCELED` through a compare-and-swap, so a cancel
/// request and a worker pickup can't both succeed.
#[derive(Debug)]
pub(crate) struct TaskWorktable {
	state: AtomicU8,
}

impl TaskWorktable {
	pub(crate) const fn new() -> Self {
		Self {
			state: AtomicU8::new(QUEUED),
		}
	}

	pub(crate) fn try_start(&self) -> bool {
		self.state
			.compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	pub(crate) fn try_cancel(&self) -> bool {
		self.state
			.compare_exchange(QUEUED, CANCELED, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	pub(crate) fn set_completed(&self) {
		self.state.store(DONE, Ordering::Release);
	}

	fn has_started(&self) -> bool {
		self.state.load(Ordering::Acquire) != QUEUED
	}

	fn is_finalized(&self) -> bool {
		matches!(self.state.load(Ordering::Acquire), DONE | CANCELED)
	}
}

/// Cloneable way to cancel or inspect a dispatched task without owning its [`TaskHandle`]
#[derive(Debug, Clone)]
pub struct TaskRemoteController {
	pub(crate) worktable: Arc<TaskWorktable>,
	pub(crate) task_id: TaskId,
}

impl TaskRemoteController {
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.task_id
	}

	/// Wins only while the task is queued, `false` once a worker took it or it already ended
	#[instrument(skip(self), fields(task_id = %self.task_id))]
	pub fn cancel(&self) -> bool {
		let canceled = self.worktable.try_cancel();
		trace!(%canceled, "Cancel requested");
		canceled
	}

	#[must_use]
	pub fn has_started(&self) -> bool {
		self.worktable.has_started()
	}

	/// Finished running or canceled
	#[must_use]
	pub fn is_done(&self) -> bool {
		self.worktable.is_finalized()
	}
}

/// Resolves to the task's [`TaskStatus`] once it ends.
#[derive(Debug)]
pub struct TaskHandle<E: RunError> {
	pub(crate) done_rx: oneshot::Receiver<TaskStatus<E>>,
	pub(crate) controller: TaskRemoteController,
}

impl<E: RunError> Future for TaskHandle<E> {
	type Output = Result<TaskStatus<E>, SystemError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		// The sender only goes away without a status if the task was dropped along with the queue
		Pin::new(&mut self.done_rx)
			.poll(cx)
			.map(|res| res.map_err(|_| SystemError::Shutdown))
	}
}

impl<E: RunError> TaskHandle<E> {
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.controller.task_id
	}

	pub fn cancel(&self) -> bool {
		self.controller.cancel()
	}

	#[must_use]
	pub fn remote_controller(&self) -> TaskRemoteController {
		self.controller.clone()
	}
}

pub(crate) struct TaskWorkState<E: RunError> {
	pub(crate) task: Box<dyn Task<E>>,
	pub(crate) worktable: Arc<TaskWorktable>,
	pub(crate) done_tx: oneshot::Sender<TaskStatus<E>>,
}
