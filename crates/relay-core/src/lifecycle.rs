//! Lifecycle / Shutdown Controller (spec.md §4.6), plus the periodic cleanup
//! sweep, sliding-window error tracker, and per-client rate limiter named in
//! spec.md §7 — grouped here because all four are background concerns that
//! share the connection/session registries and a cancellation token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_proto::{now_iso8601, ClientId, Envelope, ErrorCode, MessageType};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::session::SessionManager;

/// Coordinates graceful shutdown. Idempotent: `shutdown` is a no-op on a
/// second call (spec.md §4.6).
pub struct ShutdownController {
	shutting_down: AtomicBool,
	token: CancellationToken,
	connections: Arc<ConnectionManager>,
	shutdown_timeout: Duration,
}

impl ShutdownController {
	pub fn new(connections: Arc<ConnectionManager>, shutdown_timeout: Duration) -> Self {
		Self {
			shutting_down: AtomicBool::new(false),
			token: CancellationToken::new(),
			connections,
			shutdown_timeout,
		}
	}

	pub fn is_shutting_down(&self) -> bool {
		self.shutting_down.load(Ordering::Acquire)
	}

	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	/// Runs the shutdown sequence: flag, broadcast `server_shutdown`, wait up
	/// to `shutdownTimeoutMs` for clients to drain, cancel background tasks.
	/// A second concurrent call observes the flag already set and returns
	/// immediately.
	pub async fn shutdown(&self, reason: &str, planned_restart: bool, estimated_downtime: u64) {
		if self.shutting_down.swap(true, Ordering::AcqRel) {
			return;
		}

		let envelope = Envelope {
			message_type: MessageType::ServerShutdown,
			id: format!("shutdown-{}", uuid::Uuid::new_v4()),
			timestamp: now_iso8601(),
			payload: serde_json::json!({
				"reason": reason,
				"time": now_iso8601(),
				"plannedRestart": planned_restart,
				"estimatedDowntime": estimated_downtime,
			}),
			response_to: None,
		};

		let recipients = self.connections.all_client_ids().await;
		for client_id in &recipients {
			if !self
				.connections
				.send_fatal(client_id, envelope.clone())
				.await
			{
				warn!(client_id = %client_id, "failed to deliver server_shutdown");
			}
		}

		let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
		while tokio::time::Instant::now() < deadline {
			if self.connections.connected_count().await == 0 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(50)).await;
		}

		info!(
			remaining = self.connections.connected_count().await,
			"shutdown drain window elapsed"
		);
		self.token.cancel();
	}
}

/// Sliding-window count of errors observed per category, for operator
/// attention (spec.md §7: "flags error patterns for operator attention").
/// Not itself enforcement — `RateLimiter` below is what produces
/// `CLIENT_RATE_LIMITED`.
pub struct ErrorTracker {
	window: Duration,
	events: Mutex<Vec<(DateTime<Utc>, ErrorCode)>>,
}

impl ErrorTracker {
	pub fn new(window: Duration) -> Self {
		Self {
			window,
			events: Mutex::new(Vec::new()),
		}
	}

	pub async fn record(&self, code: ErrorCode) {
		let mut events = self.events.lock().await;
		events.push((Utc::now(), code));
		self.prune(&mut events);
	}

	fn prune(&self, events: &mut Vec<(DateTime<Utc>, ErrorCode)>) {
		let cutoff = Utc::now() - chrono::Duration::from_std(self.window).unwrap_or_default();
		events.retain(|(at, _)| *at >= cutoff);
	}

	/// Count of errors matching `code` within the current window.
	pub async fn count(&self, code: ErrorCode) -> usize {
		let mut events = self.events.lock().await;
		self.prune(&mut events);
		events.iter().filter(|(_, c)| *c == code).count()
	}

	pub async fn total(&self) -> usize {
		let mut events = self.events.lock().await;
		self.prune(&mut events);
		events.len()
	}
}

/// Per-client sliding-window requests-per-minute limiter (spec.md §7).
pub struct RateLimiter {
	max_per_window: usize,
	window: Duration,
	hits: Mutex<HashMap<ClientId, Vec<DateTime<Utc>>>>,
}

impl RateLimiter {
	pub fn new(max_per_window: usize, window: Duration) -> Self {
		Self {
			max_per_window,
			window,
			hits: Mutex::new(HashMap::new()),
		}
	}

	/// Records one request from `client_id` and returns `true` if it is
	/// within the allowed rate, `false` if it should be rejected with
	/// `CLIENT_RATE_LIMITED`.
	pub async fn allow(&self, client_id: &ClientId) -> bool {
		let cutoff = Utc::now() - chrono::Duration::from_std(self.window).unwrap_or_default();
		let mut hits = self.hits.lock().await;
		let entry = hits.entry(client_id.clone()).or_default();
		entry.retain(|at| *at >= cutoff);
		if entry.len() >= self.max_per_window {
			return false;
		}
		entry.push(Utc::now());
		true
	}

	pub async fn forget(&self, client_id: &ClientId) {
		self.hits.lock().await.remove(client_id);
	}
}

/// Periodically sweeps inactive sessions and their resources until the
/// supplied token is cancelled, matching the teacher's pattern of
/// cooperatively-cancellable background tasks.
pub async fn run_cleanup_sweep(
	sessions: Arc<SessionManager>,
	interval: Duration,
	terminal_timeout: chrono::Duration,
	editor_timeout: chrono::Duration,
	extension_timeout: chrono::Duration,
	token: CancellationToken,
) {
	let mut ticker = tokio::time::interval(interval);
	loop {
		tokio::select! {
			_ = token.cancelled() => {
				info!("cleanup sweep stopping");
				break;
			}
			_ = ticker.tick() => {
				sessions
					.sweep_all(terminal_timeout, editor_timeout, extension_timeout)
					.await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn rate_limiter_blocks_after_threshold() {
		let limiter = RateLimiter::new(2, Duration::from_secs(60));
		let client = ClientId::new("a");
		assert!(limiter.allow(&client).await);
		assert!(limiter.allow(&client).await);
		assert!(!limiter.allow(&client).await);
	}

	#[tokio::test]
	async fn error_tracker_counts_within_window() {
		let tracker = ErrorTracker::new(Duration::from_secs(60));
		tracker.record(ErrorCode::AuthFailed).await;
		tracker.record(ErrorCode::AuthFailed).await;
		tracker.record(ErrorCode::ServerError).await;
		assert_eq!(tracker.count(ErrorCode::AuthFailed).await, 2);
		assert_eq!(tracker.total().await, 3);
	}

	#[tokio::test]
	async fn shutdown_is_idempotent() {
		let connections = Arc::new(ConnectionManager::new(10, false, Default::default()));
		let controller = ShutdownController::new(connections, Duration::from_millis(10));
		controller.shutdown("restart", true, 0).await;
		assert!(controller.token().is_cancelled());
		// Second call observes the flag already set and returns immediately.
		controller.shutdown("restart", true, 0).await;
	}
}
