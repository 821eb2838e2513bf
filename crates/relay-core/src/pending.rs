//! Pending Request Table (spec.md §4.3, §5).
//!
//! Tracks server-originated requests awaiting a client's `responseTo` reply
//! (and, symmetrically, client requests the router is waiting to resolve).
//! Every entry carries a deadline; the first reply wins and the loser (a
//! late duplicate, or the timeout firing after a reply already arrived) is a
//! silent no-op, mirroring the teacher's oneshot-based request bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_proto::RequestId;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingError {
	TimedOut,
	Cancelled,
}

/// Table of in-flight requests keyed by `requestId`. Cloning shares the same
/// underlying table (it's an `Arc` internally).
#[derive(Clone)]
pub struct PendingRequestTable {
	inner: Arc<Mutex<HashMap<RequestId, oneshot::Sender<Value>>>>,
	default_deadline: Duration,
}

impl PendingRequestTable {
	pub fn new(default_deadline: Duration) -> Self {
		Self {
			inner: Arc::new(Mutex::new(HashMap::new())),
			default_deadline,
		}
	}

	/// Registers `request_id` and awaits its resolution, racing the supplied
	/// deadline (or the table's default). Cleans up its own entry whether it
	/// resolves, times out, or is dropped early.
	pub async fn wait(
		&self,
		request_id: RequestId,
		deadline: Option<Duration>,
	) -> Result<Value, PendingError> {
		let (tx, rx) = oneshot::channel();
		self.inner.lock().await.insert(request_id.clone(), tx);

		let result = timeout(deadline.unwrap_or(self.default_deadline), rx).await;
		self.inner.lock().await.remove(&request_id);

		match result {
			Ok(Ok(value)) => Ok(value),
			Ok(Err(_)) => Err(PendingError::Cancelled),
			Err(_) => Err(PendingError::TimedOut),
		}
	}

	/// Resolves `request_id` with `value`. Returns `true` iff a waiter was
	/// still registered (first reply wins; a late duplicate is a no-op).
	pub async fn resolve(&self, request_id: &RequestId, value: Value) -> bool {
		match self.inner.lock().await.remove(request_id) {
			Some(tx) => tx.send(value).is_ok(),
			None => false,
		}
	}

	pub async fn is_pending(&self, request_id: &RequestId) -> bool {
		self.inner.lock().await.contains_key(request_id)
	}

	pub async fn pending_count(&self) -> usize {
		self.inner.lock().await.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn resolve_before_wait_is_lost_resolve_after_registers() {
		let table = PendingRequestTable::new(Duration::from_millis(200));
		let id = RequestId::new("req-1");

		// Resolving before anyone waits returns false: nothing was pending.
		assert!(!table.resolve(&id, Value::from(1)).await);

		let waiter = tokio::spawn({
			let table = table.clone();
			let id = id.clone();
			async move { table.wait(id, None).await }
		});
		tokio::task::yield_now().await;
		assert!(table.resolve(&id, Value::from(42)).await);

		let value = waiter.await.unwrap().unwrap();
		assert_eq!(value, Value::from(42));
	}

	#[tokio::test]
	async fn second_resolve_is_a_no_op() {
		let table = PendingRequestTable::new(Duration::from_millis(200));
		let id = RequestId::new("req-1");

		let waiter = tokio::spawn({
			let table = table.clone();
			let id = id.clone();
			async move { table.wait(id, None).await }
		});
		tokio::task::yield_now().await;
		assert!(table.resolve(&id, Value::from(1)).await);
		assert!(!table.resolve(&id, Value::from(2)).await);
		assert_eq!(waiter.await.unwrap().unwrap(), Value::from(1));
	}

	#[tokio::test]
	async fn unresolved_request_times_out() {
		let table = PendingRequestTable::new(Duration::from_millis(20));
		let id = RequestId::new("req-1");
		let err = table.wait(id.clone(), None).await.unwrap_err();
		assert_eq!(err, PendingError::TimedOut);
		assert!(!table.is_pending(&id).await);
	}
}
