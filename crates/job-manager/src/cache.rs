//! Size bounded, least recently used cache of live job records.
//!
//! Nodes live in an arena (`slots`) and are chained in recency order through their indices, with
//! a [`HashMap`] from job id to slot, so lookup, touch and removal are O(1).
//!
//! Eviction walks from the least recently used end past every pending or running record until it
//! meets a terminal one, so each eviction costs O(active jobs). Active jobs are bounded by the
//! worker pool plus its queue, and are normally a small share of the cache.

use std::{collections::HashMap, iter};

use crate::record::{JobId, JobRecord};

#[derive(Debug)]
struct Node {
	record: JobRecord,
	prev: Option<usize>,
	next: Option<usize>,
}

/// What happened to make room for an inserted record
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InsertOutcome {
	/// Terminal jobs evicted, least recently used first
	pub evicted: Vec<JobId>,
	/// No evictable record was left and the cache grew beyond its capacity
	pub over_capacity: bool,
}

#[derive(Debug)]
pub struct BoundedJobCache {
	capacity: usize,
	slots: Vec<Option<Node>>,
	free: Vec<usize>,
	index: HashMap<JobId, usize>,
	/// Most recently used
	head: Option<usize>,
	/// Least recently used
	tail: Option<usize>,
}

impl BoundedJobCache {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			slots: Vec::with_capacity(capacity),
			free: Vec::new(),
			index: HashMap::with_capacity(capacity),
			head: None,
			tail: None,
		}
	}

	#[must_use]
	pub const fn capacity(&self) -> usize {
		self.capacity
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.index.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.index.is_empty()
	}

	#[must_use]
	pub fn contains(&self, job_id: &JobId) -> bool {
		self.index.contains_key(job_id)
	}

	/// Looks a record up without changing its recency
	#[must_use]
	pub fn peek(&self, job_id: &JobId) -> Option<&JobRecord> {
		self.index
			.get(job_id)
			.map(|&slot| &self.node(slot).record)
	}

	/// Looks a record up and marks it as the most recently used
	pub fn get(&mut self, job_id: &JobId) -> Option<&JobRecord> {
		let slot = *self.index.get(job_id)?;
		self.touch(slot);
		Some(&self.node(slot).record)
	}

	/// Mutable lookup, also marks the record as the most recently used
	pub fn get_mut(&mut self, job_id: &JobId) -> Option<&mut JobRecord> {
		let slot = *self.index.get(job_id)?;
		self.touch(slot);
		Some(&mut self.node_mut(slot).record)
	}

	/// Inserts a record as the most recently used one.
	///
	/// When full, the least recently used terminal records are evicted until there is room.
	/// Pending and running records are never evicted: if only those are left the record is
	/// inserted anyway and [`InsertOutcome::over_capacity`] is set.
	pub fn insert(&mut self, record: JobRecord) -> InsertOutcome {
		if let Some(&slot) = self.index.get(&record.job_id) {
			self.node_mut(slot).record = record;
			self.touch(slot);
			return InsertOutcome::default();
		}

		let evicted = self.evict_down_to(self.capacity.saturating_sub(1));
		let outcome = InsertOutcome {
			evicted,
			over_capacity: self.len() >= self.capacity,
		};

		let job_id = record.job_id;
		let node = Node {
			record,
			prev: None,
			next: None,
		};

		let slot = if let Some(slot) = self.free.pop() {
			self.slots[slot] = Some(node);
			slot
		} else {
			self.slots.push(Some(node));
			self.slots.len() - 1
		};

		self.push_front(slot);
		self.index.insert(job_id, slot);

		outcome
	}

	pub fn remove(&mut self, job_id: &JobId) -> Option<JobRecord> {
		let slot = *self.index.get(job_id)?;
		Some(self.remove_slot(slot))
	}

	/// Keeps only the records for which `keep` returns true, returning how many were removed
	pub fn retain(&mut self, mut keep: impl FnMut(&JobRecord) -> bool) -> usize {
		let doomed = self
			.index
			.values()
			.copied()
			.filter(|&slot| !keep(&self.node(slot).record))
			.collect::<Vec<_>>();

		for &slot in &doomed {
			self.remove_slot(slot);
		}

		doomed.len()
	}

	/// Iterates from the most recently used record to the least recently used one
	pub fn iter(&self) -> impl Iterator<Item = &JobRecord> + '_ {
		iter::successors(self.head, move |&slot| self.node(slot).next)
			.map(move |slot| &self.node(slot).record)
	}

	/// Evicts least recently used terminal records until the cache is back within its capacity.
	///
	/// Active records pushed the cache past its bound stay put, once they finish this brings it
	/// back down.
	pub fn shrink_to_capacity(&mut self) -> Vec<JobId> {
		self.evict_down_to(self.capacity)
	}

	fn evict_down_to(&mut self, max_len: usize) -> Vec<JobId> {
		let mut evicted = Vec::new();

		while self.len() > max_len {
			let Some(job_id) = self.evict_lru_terminal() else {
				break;
			};
			evicted.push(job_id);
		}

		evicted
	}

	fn evict_lru_terminal(&mut self) -> Option<JobId> {
		let slot = iter::successors(self.tail, |&slot| self.node(slot).prev)
			.find(|&slot| self.node(slot).record.is_terminal())?;

		Some(self.remove_slot(slot).job_id)
	}

	fn node(&self, slot: usize) -> &Node {
		self.slots[slot]
			.as_ref()
			.expect("linked slots always hold a node")
	}

	fn node_mut(&mut self, slot: usize) -> &mut Node {
		self.slots[slot]
			.as_mut()
			.expect("linked slots always hold a node")
	}

	fn touch(&mut self, slot: usize) {
		if self.head != Some(slot) {
			self.unlink(slot);
			self.push_front(slot);
		}
	}

	fn push_front(&mut self, slot: usize) {
		let old_head = self.head;

		let node = self.node_mut(slot);
		node.prev = None;
		node.next = old_head;

		if let Some(old_head) = old_head {
			self.node_mut(old_head).prev = Some(slot);
		}

		self.head = Some(slot);

		if self.tail.is_none() {
			self.tail = Some(slot);
		}
	}

	fn unlink(&mut self, slot: usize) {
		let Node { prev, next, .. } = *self.node(slot);

		match prev {
			Some(prev) => self.node_mut(prev).next = next,
			None => self.head = next,
		}

		match next {
			Some(next) => self.node_mut(next).prev = prev,
			None => self.tail = prev,
		}

		let node = self.node_mut(slot);
		node.prev = None;
		node.next = None;
	}

	fn remove_slot(&mut self, slot: usize) -> JobRecord {
		self.unlink(slot);

		let Node { record, .. } = self.slots[slot]
			.take()
			.expect("linked slots always hold a node");

		self.free.push(slot);
		self.index.remove(&record.job_id);

		record
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::record::{JobMetadata, JobStatus};

	use chrono::Utc;
	use serde_json::json;

	fn pending() -> JobRecord {
		JobRecord::new(JobId::new(), JobMetadata::default())
	}

	fn completed() -> JobRecord {
		let mut record = pending();
		record.start(Utc::now()).unwrap();
		record.complete(json!("done"), Utc::now()).unwrap();
		record
	}

	fn ids(cache: &BoundedJobCache) -> Vec<JobId> {
		cache.iter().map(|record| record.job_id).collect()
	}

	#[test]
	fn test_evicts_least_recently_used_terminal_record() {
		let mut cache = BoundedJobCache::new(2);

		let (first, second, third) = (completed(), completed(), completed());
		let (first_id, second_id, third_id) = (first.job_id, second.job_id, third.job_id);

		assert_eq!(cache.insert(first), InsertOutcome::default());
		cache.insert(second);

		// Touching the first one makes the second the least recently used
		assert!(cache.get(&first_id).is_some());

		let outcome = cache.insert(third);

		assert_eq!(outcome.evicted, vec![second_id]);
		assert!(!outcome.over_capacity);
		assert_eq!(ids(&cache), vec![third_id, first_id]);
	}

	#[test]
	fn test_never_evicts_active_records() {
		let mut cache = BoundedJobCache::new(2);

		let running = {
			let mut record = pending();
			record.start(Utc::now()).unwrap();
			record
		};
		let waiting = pending();
		let (running_id, waiting_id) = (running.job_id, waiting.job_id);

		cache.insert(running);
		cache.insert(waiting);

		let extra = pending();
		let extra_id = extra.job_id;

		let outcome = cache.insert(extra);

		assert!(outcome.evicted.is_empty());
		assert!(outcome.over_capacity);
		assert_eq!(cache.len(), 3);
		assert_eq!(ids(&cache), vec![extra_id, waiting_id, running_id]);
	}

	#[test]
	fn test_skips_active_records_while_evicting() {
		let mut cache = BoundedJobCache::new(3);

		let old_pending = pending();
		let done = completed();
		let newer_pending = pending();
		let (old_pending_id, done_id) = (old_pending.job_id, done.job_id);

		cache.insert(old_pending);
		cache.insert(done);
		cache.insert(newer_pending);

		let outcome = cache.insert(pending());

		assert_eq!(outcome.evicted, vec![done_id]);
		assert!(cache.contains(&old_pending_id));
		assert_eq!(cache.len(), 3);
	}

	#[test]
	fn test_shrinks_back_once_active_records_finish() {
		let mut cache = BoundedJobCache::new(2);

		let mut records = (0..4).map(|_| pending()).collect::<Vec<_>>();
		for record in &records {
			cache.insert(record.clone());
		}
		assert_eq!(cache.len(), 4);

		// Nothing to evict while everything is still active
		assert!(cache.shrink_to_capacity().is_empty());

		for record in &mut records {
			record.start(Utc::now()).unwrap();
			record.complete(json!("done"), Utc::now()).unwrap();
			cache.insert(record.clone());
		}

		assert_eq!(
			cache.shrink_to_capacity(),
			vec![records[0].job_id, records[1].job_id]
		);
		assert_eq!(ids(&cache), vec![records[3].job_id, records[2].job_id]);
		assert!(cache.shrink_to_capacity().is_empty());
	}

	#[test]
	fn test_reinsert_replaces_in_place() {
		let mut cache = BoundedJobCache::new(2);

		let mut record = pending();
		let job_id = record.job_id;
		cache.insert(record.clone());
		cache.insert(completed());

		record.start(Utc::now()).unwrap();
		assert_eq!(cache.insert(record), InsertOutcome::default());

		assert_eq!(cache.len(), 2);
		assert_eq!(ids(&cache)[0], job_id);
		assert_eq!(cache.peek(&job_id).unwrap().status, JobStatus::Running);
	}

	#[test]
	fn test_remove_and_retain_reuse_slots() {
		let mut cache = BoundedJobCache::new(4);

		let records = (0..4).map(|_| completed()).collect::<Vec<_>>();
		let job_ids = records.iter().map(|record| record.job_id).collect::<Vec<_>>();
		for record in records {
			cache.insert(record);
		}

		assert_eq!(cache.remove(&job_ids[1]).unwrap().job_id, job_ids[1]);
		assert!(cache.remove(&job_ids[1]).is_none());

		let keep = job_ids[3];
		assert_eq!(cache.retain(|record| record.job_id == keep), 2);
		assert_eq!(ids(&cache), vec![keep]);

		cache.insert(pending());
		cache.insert(pending());
		assert_eq!(cache.len(), 3);
		assert_eq!(cache.slots.len(), 4);
	}

	#[test]
	fn test_peek_does_not_touch() {
		let mut cache = BoundedJobCache::new(2);

		let (first, second) = (completed(), completed());
		let (first_id, second_id) = (first.job_id, second.job_id);
		cache.insert(first);
		cache.insert(second);

		assert!(cache.peek(&first_id).is_some());

		let outcome = cache.insert(completed());
		assert_eq!(outcome.evicted, vec![first_id]);
		assert!(cache.contains(&second_id));
	}
}
