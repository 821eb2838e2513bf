//! Collaboration engine for the Relay MCP server: connection/auth state,
//! session actors, the three shared-resource managers, notification
//! fan-out, the request/response router, and the lifecycle controller.
//!
//! `relay-server` is the thin binary that wires a concrete transport to the
//! [`Server`] value this crate constructs.

pub mod auth;
pub mod config;
pub mod connection;
pub mod editor;
pub mod extension;
pub mod lifecycle;
pub mod notify;
pub mod pending;
pub mod resource;
pub mod router;
pub mod session;
pub mod terminal;
pub mod tools;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthRegistry;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::lifecycle::{ErrorTracker, RateLimiter, ShutdownController};
use crate::notify::NotificationDispatcher;
use crate::pending::PendingRequestTable;
use crate::router::Router;
use crate::session::{SessionLimits, SessionManager};
use crate::tools::{NullToolRegistry, ToolInvoker};

/// Every shared piece of server state, constructed once per process (or per
/// test) and handed to the transport layer. Mirrors the teacher's pattern of
/// a single `BrokerRuntime` value rather than module-scope singletons
/// (spec.md §9: "avoid module-scope mutable state so tests can instantiate
/// many independent servers").
pub struct Server {
	pub config: Config,
	pub connections: Arc<ConnectionManager>,
	pub auth: Arc<AuthRegistry>,
	pub sessions: Arc<SessionManager>,
	pub notifier: Arc<NotificationDispatcher>,
	pub pending_requests: PendingRequestTable,
	pub shutdown: Arc<ShutdownController>,
	pub rate_limiter: Arc<RateLimiter>,
	pub error_tracker: Arc<ErrorTracker>,
	pub router: Arc<Router>,
}

impl Server {
	/// Builds a `Server` from a loaded [`Config`] and an embedder-supplied
	/// [`ToolInvoker`] (use [`NullToolRegistry`] if the host has no concrete
	/// tools to wire in).
	pub fn new(config: Config, tools: Arc<dyn ToolInvoker>) -> Self {
		let server_capabilities: HashSet<String> = [
			"terminal", "editor", "extension", "session", "tool_invoke",
		]
		.into_iter()
		.map(String::from)
		.collect();

		let connections = Arc::new(ConnectionManager::new(
			config.server.max_clients,
			config.auth.enabled,
			server_capabilities,
		));
		let auth = Arc::new(AuthRegistry::new());
		let notifier = Arc::new(NotificationDispatcher::new(connections.clone()));
		let limits = SessionLimits {
			terminal_buffer_max_size: config.terminal.max_buffer_size,
			editor_max_history_size: config.editor.max_history_size,
			extension_max_history_size: config.extension.max_history_size,
			resource_max_age: chrono::Duration::milliseconds(
				config.session.inactivity_timeout_ms as i64,
			),
		};
		let sessions = Arc::new(SessionManager::new(limits, notifier.clone()));
		let shutdown = Arc::new(ShutdownController::new(
			connections.clone(),
			config.shutdown_timeout(),
		));
		let rate_limiter = Arc::new(RateLimiter::new(600, Duration::from_secs(60)));
		let error_tracker = Arc::new(ErrorTracker::new(Duration::from_secs(300)));

		let refresh_token_ttl =
			chrono::Duration::seconds(config.auth.refresh_token_expiration_seconds as i64);
		let router = Arc::new(Router {
			connections: connections.clone(),
			auth: auth.clone(),
			sessions: sessions.clone(),
			notifier: notifier.clone(),
			tools,
			shutdown: shutdown.clone(),
			rate_limiter: rate_limiter.clone(),
			error_tracker: error_tracker.clone(),
			refresh_token_ttl,
		});

		Self {
			config,
			connections,
			auth,
			sessions,
			notifier,
			pending_requests: PendingRequestTable::new(Duration::from_secs(30)),
			shutdown,
			rate_limiter,
			error_tracker,
			router,
		}
	}

	/// Convenience constructor for embedders with no tools to register.
	pub fn with_defaults(config: Config) -> Self {
		Self::new(config, Arc::new(NullToolRegistry))
	}

	/// Spawns the periodic cleanup sweep, returning its cancellation token's
	/// clone (the same token `self.shutdown.token()` returns) so the caller
	/// can await the task's completion after triggering shutdown.
	pub fn spawn_cleanup_sweep(&self) -> tokio::task::JoinHandle<()> {
		let sessions = self.sessions.clone();
		let interval = self.config.session_cleanup_interval();
		let terminal_timeout =
			chrono::Duration::milliseconds(self.config.terminal.inactivity_timeout_ms as i64);
		let editor_timeout =
			chrono::Duration::milliseconds(self.config.editor.inactivity_timeout_ms as i64);
		let extension_timeout =
			chrono::Duration::milliseconds(self.config.extension.inactivity_timeout_ms as i64);
		let token: CancellationToken = self.shutdown.token();
		tokio::spawn(lifecycle::run_cleanup_sweep(
			sessions,
			interval,
			terminal_timeout,
			editor_timeout,
			extension_timeout,
			token,
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn server_constructs_with_defaults() {
		let server = Server::with_defaults(Config::default());
		assert_eq!(server.connections.connected_count().await, 0);
		assert_eq!(server.sessions.session_count().await, 0);
	}
}
