//!
//! # Task System
//!
//! Runs asynchronous tasks on a fixed number of tokio workers pulling from one shared queue.
//!
//! Every task dispatched to a system returns the same error type. Dispatching hands back a
//! [`TaskHandle`] that resolves to the task's [`TaskStatus`]:
//! - tasks still waiting in the queue can be canceled, running ones can't;
//! - a panic inside a task is caught and reported as [`TaskStatus::Panicked`];
//! - a worker whose own loop dies is restarted in place.
//!
//! [`TaskSystem::shutdown`] closes the queue, queued tasks still run and `wait` joins the workers
//! once the queue is drained.
//!
//! ## Basic example
//!
//! ```
//! use crewlab_task_system::{Task, TaskId, TaskStatus, TaskSystem};
//! use async_trait::async_trait;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum FetchError {
//!     #[error("quote feed unavailable")]
//!     FeedUnavailable,
//! }
//!
//! #[derive(Debug)]
//! pub struct NoopTask {
//!     id: TaskId,
//! }
//!
//! #[async_trait]
//! impl Task<FetchError> for NoopTask {
//!     fn id(&self) -> TaskId {
//!         self.id
//!     }
//!
//!     async fn run(&mut self) -> Result<(), FetchError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let system = TaskSystem::<FetchError>::new(3);
//!
//!     let handle = system.dispatch(NoopTask { id: TaskId::new_v4() }).await.unwrap();
//!
//!     assert!(matches!(handle.await, Ok(TaskStatus::Done(_))));
//!
//!     system.shutdown(true).await;
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod system;
mod task;
mod worker;

pub use error::{RunError, SystemError as TaskSystemError};
pub use system::System as TaskSystem;
pub use task::{IntoTask, Task, TaskHandle, TaskId, TaskRemoteController, TaskStatus};
