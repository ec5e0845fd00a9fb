use std::{env, str::FromStr};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_JOBS_IN_MEMORY: &str = "MAX_JOBS_IN_MEMORY";
pub const JOB_RETENTION_HOURS: &str = "JOB_RETENTION_HOURS";
pub const DROP_RESULT_FROM_MEMORY: &str = "DROP_RESULT_FROM_MEMORY";
pub const MAX_CHAT_MESSAGES_PER_JOB: &str = "MAX_CHAT_MESSAGES_PER_JOB";
pub const JOB_WORKER_POOL_SIZE: &str = "JOB_WORKER_POOL_SIZE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
	#[error("invalid value for {key}: '{value}'")]
	Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobManagerConfig {
	/// Capacity of the live cache, active jobs may still push it past this
	pub max_jobs_in_memory: usize,
	/// How long a finished job stays eligible to be served from the store
	pub retention_hours: u64,
	/// Drop a completed job's result from the cache once it is persisted
	pub drop_result_from_memory: bool,
	pub max_chat_messages_per_job: usize,
	pub worker_pool_size: usize,
}

impl Default for JobManagerConfig {
	fn default() -> Self {
		Self {
			max_jobs_in_memory: 200,
			retention_hours: 24,
			drop_result_from_memory: true,
			max_chat_messages_per_job: 1000,
			worker_pool_size: 3,
		}
	}
}

impl JobManagerConfig {
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| env::var(key).ok())
	}

	/// Builds a config reading each setting through `lookup`, unset keys keep their default
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let defaults = Self::default();

		Ok(Self {
			max_jobs_in_memory: parse_number(&lookup, MAX_JOBS_IN_MEMORY)?
				.unwrap_or(defaults.max_jobs_in_memory),
			retention_hours: parse_number(&lookup, JOB_RETENTION_HOURS)?
				.unwrap_or(defaults.retention_hours),
			drop_result_from_memory: parse_bool(&lookup, DROP_RESULT_FROM_MEMORY)?
				.unwrap_or(defaults.drop_result_from_memory),
			max_chat_messages_per_job: parse_number(&lookup, MAX_CHAT_MESSAGES_PER_JOB)?
				.unwrap_or(defaults.max_chat_messages_per_job),
			worker_pool_size: parse_number(&lookup, JOB_WORKER_POOL_SIZE)?
				.unwrap_or(defaults.worker_pool_size)
				.max(1),
		})
	}

	#[must_use]
	pub fn retention(&self) -> Duration {
		retention_window(self.retention_hours)
	}
}

pub(crate) fn retention_window(hours: u64) -> Duration {
	i64::try_from(hours)
		.ok()
		.and_then(Duration::try_hours)
		.unwrap_or(Duration::MAX)
}

fn parse_number<T: FromStr>(
	lookup: &impl Fn(&str) -> Option<String>,
	key: &'static str,
) -> Result<Option<T>, ConfigError> {
	lookup(key)
		.map(|value| {
			value
				.trim()
				.parse()
				.map_err(|_| ConfigError::Invalid { key, value })
		})
		.transpose()
}

fn parse_bool(
	lookup: &impl Fn(&str) -> Option<String>,
	key: &'static str,
) -> Result<Option<bool>, ConfigError> {
	lookup(key)
		.map(|value| match value.trim().to_ascii_lowercase().as_str() {
			"true" | "1" | "yes" => Ok(true),
			"false" | "0" | "no" => Ok(false),
			_ => Err(ConfigError::Invalid { key, value }),
		})
		.transpose()
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::collections::HashMap;

	fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let vars = pairs
			.iter()
			.map(|(key, value)| ((*key).to_string(), (*value).to_string()))
			.collect::<HashMap<_, _>>();

		move |key| vars.get(key).cloned()
	}

	#[test]
	fn test_defaults_when_unset() {
		assert_eq!(
			JobManagerConfig::from_lookup(lookup_from(&[])).unwrap(),
			JobManagerConfig::default()
		);
	}

	#[test]
	fn test_overrides() {
		let config = JobManagerConfig::from_lookup(lookup_from(&[
			(MAX_JOBS_IN_MEMORY, "2"),
			(JOB_RETENTION_HOURS, " 48 "),
			(DROP_RESULT_FROM_MEMORY, "No"),
			(MAX_CHAT_MESSAGES_PER_JOB, "3"),
			(JOB_WORKER_POOL_SIZE, "0"),
		]))
		.unwrap();

		assert_eq!(config.max_jobs_in_memory, 2);
		assert_eq!(config.retention(), Duration::hours(48));
		assert!(!config.drop_result_from_memory);
		assert_eq!(config.max_chat_messages_per_job, 3);
		assert_eq!(config.worker_pool_size, 1);
	}

	#[test]
	fn test_invalid_values() {
		assert_eq!(
			JobManagerConfig::from_lookup(lookup_from(&[(DROP_RESULT_FROM_MEMORY, "maybe")])),
			Err(ConfigError::Invalid {
				key: DROP_RESULT_FROM_MEMORY,
				value: "maybe".to_string(),
			})
		);

		assert!(JobManagerConfig::from_lookup(lookup_from(&[(MAX_JOBS_IN_MEMORY, "-1")])).is_err());
	}

	#[test]
	fn test_deserialize_with_defaults() {
		let config =
			serde_json::from_str::<JobManagerConfig>(r#"{"max_jobs_in_memory": 10}"#).unwrap();

		assert_eq!(config.max_jobs_in_memory, 10);
		assert_eq!(config.worker_pool_size, 3);
	}

	#[test]
	fn test_huge_retention_does_not_overflow() {
		assert_eq!(retention_window(u64::MAX), Duration::MAX);
	}
}
