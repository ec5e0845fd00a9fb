use std::{error::Error as StdError, fmt};

use thiserror::Error;

/// Marker trait for the unified error type returned by every task dispatched to a given system.
pub trait RunError: StdError + fmt::Debug + Send + Sync + 'static {}

impl<T: StdError + fmt::Debug + Send + Sync + 'static> RunError for T {}

#[derive(Debug, Error)]
pub enum SystemError {
	#[error("task system is shut down")]
	Shutdown,
}
