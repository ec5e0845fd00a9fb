use crewlab_task_system::{Task, TaskId};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::oneshot, time::sleep};
use tracing::info;

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("Sample error")]
	SampleError,
}

#[derive(Debug)]
pub struct ReadyTask {
	id: TaskId,
}

impl Default for ReadyTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for ReadyTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self) -> Result<(), SampleError> {
		Ok(())
	}
}

#[derive(Debug)]
pub struct BogusTask {
	id: TaskId,
}

impl Default for BogusTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for BogusTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self) -> Result<(), SampleError> {
		Err(SampleError::SampleError)
	}
}

#[derive(Debug)]
pub struct PanicTask {
	id: TaskId,
}

impl Default for PanicTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for PanicTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self) -> Result<(), SampleError> {
		panic!("PanicTask always panics");
	}
}

#[derive(Debug)]
pub struct SleepTask {
	id: TaskId,
	duration: Duration,
}

impl SleepTask {
	pub fn new(duration: Duration) -> Self {
		Self {
			id: TaskId::new_v4(),
			duration,
		}
	}
}

#[async_trait]
impl Task<SampleError> for SleepTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self) -> Result<(), SampleError> {
		sleep(self.duration).await;
		Ok(())
	}
}

/// Signals when it starts running and then holds its worker until released
#[derive(Debug)]
pub struct WaitSignalTask {
	id: TaskId,
	began_tx: Option<oneshot::Sender<()>>,
	release_rx: Option<oneshot::Receiver<()>>,
}

impl WaitSignalTask {
	pub fn new() -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
		let (began_tx, began_rx) = oneshot::channel();
		let (release_tx, release_rx) = oneshot::channel();

		(
			Self {
				id: TaskId::new_v4(),
				began_tx: Some(began_tx),
				release_rx: Some(release_rx),
			},
			began_rx,
			release_tx,
		)
	}
}

#[async_trait]
impl Task<SampleError> for WaitSignalTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self) -> Result<(), SampleError> {
		if let Some(began_tx) = self.began_tx.take() {
			began_tx.send(()).ok();
		}

		if let Some(release_rx) = self.release_rx.take() {
			info!("WaitSignalTask <id='{}'> waiting for release signal", self.id);
			release_rx.await.ok();
		}

		Ok(())
	}
}
