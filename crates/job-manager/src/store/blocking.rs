use crate::record::{JobId, JobRecord};

use std::{future::Future, sync::Arc};

use tokio::{
	runtime::{Handle, RuntimeFlavor},
	task,
};
use tracing::trace;

use super::{JobStore, StoreError};

/// Synchronous facade over any [`JobStore`], for callers living outside of async code.
///
/// The wrapped store's I/O is driven on the runtime behind `handle`. Whether the caller is itself
/// running inside a runtime is checked explicitly on every call:
/// - outside of any runtime the call simply blocks on `handle`;
/// - inside a multi thread runtime the worker is handed over with [`task::block_in_place`] first;
/// - inside a current thread runtime blocking would deadlock, so [`StoreError::WouldBlock`] is
///   returned and the caller must use the async store directly.
#[derive(Debug)]
pub struct BlockingJobStore<S: ?Sized> {
	store: Arc<S>,
	handle: Handle,
}

impl<S: ?Sized> Clone for BlockingJobStore<S> {
	fn clone(&self) -> Self {
		Self {
			store: Arc::clone(&self.store),
			handle: self.handle.clone(),
		}
	}
}

impl<S: JobStore + ?Sized> BlockingJobStore<S> {
	pub const fn new(store: Arc<S>, handle: Handle) -> Self {
		Self { store, handle }
	}

	#[must_use]
	pub fn inner(&self) -> &Arc<S> {
		&self.store
	}

	pub fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
		self.block(self.store.save(record))
	}

	pub fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
		self.block(self.store.get(job_id))
	}

	pub fn list(&self, owner: Option<&str>, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
		self.block(self.store.list(owner, limit))
	}

	pub fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
		self.block(self.store.delete(job_id))
	}

	pub fn scan_all(&self) -> Result<Vec<JobRecord>, StoreError> {
		self.block(self.store.scan_all())
	}

	fn block<T>(&self, fut: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
		match Handle::try_current().map(|current| current.runtime_flavor()) {
			Err(_) => self.handle.block_on(fut),
			Ok(RuntimeFlavor::CurrentThread) => {
				trace!("Refusing to block a current thread runtime");
				Err(StoreError::WouldBlock)
			}
			Ok(_) => task::block_in_place(|| self.handle.block_on(fut)),
		}
	}
}
