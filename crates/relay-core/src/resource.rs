//! Shared contract for the three collaboration resource managers
//! (spec.md §4.4: Terminal, Editor, Extension).
//!
//! Per the Design Notes (spec.md §9), the managers are independent concrete
//! types rather than a class hierarchy; this module holds only the pieces
//! that are genuinely identical across all three: the lifecycle state enum
//! and the error taxonomy raised by their common mutation contract
//! (`register/create`, `addClient`, `removeClient`, `close`, `cleanup`).

use relay_proto::ErrorCode;
use thiserror::Error;

/// Lifecycle state shared by `SharedTerminal`, `SharedEditor`, and
/// `ExtensionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
	Active,
	Inactive,
	Closed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
	#[error("no such resource")]
	NotFound,
	#[error("caller is not a participant of this resource")]
	PermissionDenied,
	#[error("resource is closed")]
	Conflict,
	#[error("resource limit exceeded")]
	LimitExceeded,
}

impl ResourceError {
	pub fn to_wire(self) -> ErrorCode {
		match self {
			ResourceError::NotFound => ErrorCode::ResourceNotFound,
			ResourceError::PermissionDenied => ErrorCode::PermissionDenied,
			ResourceError::Conflict => ErrorCode::ResourceConflict,
			ResourceError::LimitExceeded => ErrorCode::ResourceLimitExceeded,
		}
	}
}

/// A bounded FIFO that keeps only the newest `capacity` entries, used for
/// terminal output buffers, editor change history, and extension history.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
	capacity: usize,
	entries: std::collections::VecDeque<T>,
}

impl<T> RingBuffer<T> {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			entries: std::collections::VecDeque::with_capacity(capacity.min(1024)),
		}
	}

	pub fn push(&mut self, entry: T) {
		self.entries.push_back(entry);
		while self.entries.len() > self.capacity {
			self.entries.pop_front();
		}
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Returns up to `limit` most recent entries, oldest first.
	pub fn tail(&self, limit: usize) -> Vec<T>
	where
		T: Clone,
	{
		let skip = self.entries.len().saturating_sub(limit);
		self.entries.iter().skip(skip).cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ring_buffer_trims_to_capacity() {
		let mut buf = RingBuffer::new(3);
		for i in 0..5 {
			buf.push(i);
		}
		assert_eq!(buf.len(), 3);
		assert_eq!(buf.tail(10), vec![2, 3, 4]);
	}

	#[test]
	fn ring_buffer_tail_respects_limit() {
		let mut buf = RingBuffer::new(10);
		for i in 0..10 {
			buf.push(i);
		}
		assert_eq!(buf.tail(3), vec![7, 8, 9]);
	}
}
