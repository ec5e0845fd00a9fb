use crewlab_task_system::{TaskStatus, TaskSystem, TaskSystemError};

use std::time::Duration;

use futures_concurrency::future::Join;
use rand::Rng;
use tracing::info;
use tracing_test::traced_test;

mod common;

use common::tasks::{BogusTask, PanicTask, ReadyTask, SampleError, SleepTask, WaitSignalTask};

#[tokio::test]
#[traced_test]
async fn done_test() {
	let system = TaskSystem::<SampleError>::new(3);

	let handle = system.dispatch(ReadyTask::default()).await.unwrap();
	let task_id = handle.task_id();

	assert!(matches!(handle.await, Ok(TaskStatus::Done(id)) if id == task_id));

	system.shutdown(true).await;
}

#[tokio::test]
#[traced_test]
async fn error_test() {
	let system = TaskSystem::new(3);

	let handle = system.dispatch(BogusTask::default()).await.unwrap();

	assert!(matches!(
		handle.await,
		Ok(TaskStatus::Error(SampleError::SampleError))
	));

	system.shutdown(true).await;
}

#[tokio::test]
#[traced_test]
async fn panic_is_reported_and_worker_survives_test() {
	let system = TaskSystem::<SampleError>::new(1);

	let handle = system.dispatch(PanicTask::default()).await.unwrap();

	match handle.await {
		Ok(TaskStatus::Panicked(message)) => assert!(message.contains("always panics")),
		other => panic!("expected panicked status, got: {other:?}"),
	}

	// The only worker must still be alive to pick this one up
	let handle = system.dispatch(ReadyTask::default()).await.unwrap();

	assert!(matches!(handle.await, Ok(TaskStatus::Done(_))));

	system.shutdown(true).await;
}

#[tokio::test]
#[traced_test]
async fn cancel_before_start_test() {
	let system = TaskSystem::<SampleError>::new(1);

	let (blocker, began_rx, release_tx) = WaitSignalTask::new();
	let blocker_handle = system.dispatch(blocker).await.unwrap();

	began_rx.await.unwrap();

	// The single worker is busy, so this one stays queued
	let queued_handle = system.dispatch(ReadyTask::default()).await.unwrap();

	assert!(queued_handle.cancel());
	assert!(queued_handle.remote_controller().is_done());

	// Canceling twice is a no-op
	assert!(!queued_handle.cancel());

	release_tx.send(()).unwrap();

	assert!(matches!(blocker_handle.await, Ok(TaskStatus::Done(_))));
	assert!(matches!(queued_handle.await, Ok(TaskStatus::Canceled)));

	system.shutdown(true).await;
}

#[tokio::test]
#[traced_test]
async fn cancel_running_task_is_refused_test() {
	let system = TaskSystem::<SampleError>::new(2);

	let (task, began_rx, release_tx) = WaitSignalTask::new();
	let handle = system.dispatch(task).await.unwrap();

	began_rx.await.unwrap();

	info!("Task is running, issuing cancel");

	let controller = handle.remote_controller();
	assert!(controller.has_started());
	assert!(!controller.cancel());
	assert!(!controller.is_done());

	release_tx.send(()).unwrap();

	assert!(matches!(handle.await, Ok(TaskStatus::Done(_))));
	assert!(controller.is_done());

	system.shutdown(true).await;
}

#[tokio::test]
#[traced_test]
async fn shutdown_drains_queue_test() {
	let system = TaskSystem::<SampleError>::new(1);

	let (blocker, began_rx, release_tx) = WaitSignalTask::new();
	let blocker_handle = system.dispatch(blocker).await.unwrap();

	began_rx.await.unwrap();

	let queued_handles = (0..10)
		.map(|_| system.dispatch(ReadyTask::default()))
		.collect::<Vec<_>>()
		.join()
		.await
		.into_iter()
		.collect::<Result<Vec<_>, _>>()
		.unwrap();

	assert_eq!(system.pending_count(), 10);

	release_tx.send(()).unwrap();

	system.shutdown(true).await;

	assert!(system.is_shutdown());
	assert_eq!(system.pending_count(), 0);
	assert!(matches!(blocker_handle.await, Ok(TaskStatus::Done(_))));

	assert!(queued_handles
		.join()
		.await
		.into_iter()
		.all(|res| matches!(res, Ok(TaskStatus::Done(_)))));

	assert!(matches!(
		system.dispatch(ReadyTask::default()).await,
		Err(TaskSystemError::Shutdown)
	));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn many_tasks_test() {
	let system = TaskSystem::<SampleError>::new(3);

	let tasks = {
		let mut rng = rand::thread_rng();
		(0..64)
			.map(|_| SleepTask::new(Duration::from_millis(rng.gen_range(1..20))))
			.collect::<Vec<_>>()
	};

	let mut handles = Vec::with_capacity(tasks.len());
	for task in tasks {
		handles.push(system.dispatch(task).await.unwrap());
	}

	info!(total_tasks = %handles.len(), "all tasks dispatched");

	assert!(handles
		.join()
		.await
		.into_iter()
		.all(|res| matches!(res, Ok(TaskStatus::Done(_)))));

	system.shutdown(true).await;
}
