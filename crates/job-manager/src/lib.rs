//!
//! # Job Manager
//!
//! Accepts long running works, runs them on a bounded worker pool and tracks each of them as a
//! job going through `pending -> running -> completed | failed`, or `cancelled` if it was called
//! off before any worker picked it up.
//!
//! - Jobs live in a size bounded LRU cache, finished ones are evicted first and active ones never;
//! - Every transition is written to a durable [`JobStore`], results of completed jobs are then
//!   dropped from memory and served from the store instead;
//! - Jobs a previous process left running are failed on startup, see [`JobManager::recover_jobs`];
//! - Owners are notified through an [`EventEmitter`] when their jobs complete or fail.
//!
//! ## Basic example
//!
//! ```
//! use std::sync::Arc;
//!
//! use crewlab_job_manager::{
//!     JobManager, JobManagerConfig, JobMetadata, JobStatus, MemoryJobStore, WorkContext,
//! };
//! use serde_json::{json, Value};
//!
//! async fn quote(ctx: WorkContext) -> anyhow::Result<Value> {
//!     ctx.report_progress(50, Some("halfway there"));
//!     Ok(json!({ "ticker": ctx.ticker }))
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = JobManager::new(
//!         JobManagerConfig::default(),
//!         Arc::new(MemoryJobStore::new()),
//!         None,
//!     );
//!     manager.initialize().await;
//!
//!     let job_id = manager
//!         .submit(quote, JobMetadata::default().with_ticker("ACME"))
//!         .await
//!         .unwrap();
//!
//!     manager.shutdown(true).await;
//!
//!     let record = manager.get_status(job_id, None).await.unwrap();
//!     assert_eq!(record.status, JobStatus::Completed);
//!     assert_eq!(
//!         manager.get_result(job_id).await,
//!         Some(json!({ "ticker": "ACME" }))
//!     );
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

mod cache;
mod config;
mod error;
mod events;
mod manager;
mod record;
mod recovery;
mod store;
mod work;

pub use cache::{BoundedJobCache, InsertOutcome};
pub use config::{ConfigError, JobManagerConfig};
pub use error::{JobError, JobManagerError};
pub use events::{event_data, EmitError, EventBus, EventEmitter, JobEvent, JobEventKind};
pub use manager::{JobManager, JobStats};
pub use record::{ChatMessage, JobId, JobMetadata, JobRecord, JobStatus, TransitionError};
pub use recovery::INTERRUPTED_BY_RESTART;
pub use store::{
	job_key, BlockingJobStore, JobStore, MemoryJobStore, StoreError, JOB_KEY_PREFIX, JOB_TTL,
};
#[cfg(feature = "redis")]
pub use store::RedisJobStore;
pub use work::{job_span, ProgressReporter, Work, WorkContext};
