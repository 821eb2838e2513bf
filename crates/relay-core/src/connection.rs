//! Connection Manager (spec.md §3 Client, §4.2).
//!
//! Owns the global client registry. Per spec.md §5 this is a reader-preferring
//! global lock: the common path (look up and clone a handle, or read a
//! snapshot for a notification fan-out) takes the read side; admission and
//! removal take the write side briefly and never while awaiting I/O.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use relay_proto::messages::AuthMethod;
use relay_proto::{ClientId, Envelope, ErrorCode, SessionId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Capacity of a single client's outbound notification queue (spec.md §5
/// backpressure: bounded per-endpoint queue, drop-and-log when full).
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
	#[error("maximum client count reached")]
	MaxClientsReached,
	#[error("clientId is already connected under another endpoint")]
	ClientIdInUse,
	#[error("no client is connected with that id")]
	ClientNotFound,
	#[error("client has not completed authentication")]
	NotAuthenticated,
	#[error("this server requires authentication")]
	AuthRequired,
	#[error("client's authentication has expired")]
	AuthExpired,
}

impl ConnectionError {
	pub fn to_wire(self) -> ErrorCode {
		match self {
			ConnectionError::MaxClientsReached => ErrorCode::MaxClientsReached,
			ConnectionError::ClientIdInUse => ErrorCode::ClientIdInUse,
			ConnectionError::ClientNotFound => ErrorCode::ResourceNotFound,
			ConnectionError::NotAuthenticated => ErrorCode::ClientNotAuthenticated,
			ConnectionError::AuthRequired => ErrorCode::AuthRequired,
			ConnectionError::AuthExpired => ErrorCode::AuthExpired,
		}
	}
}

/// A session membership the client holds, with the moment it joined.
#[derive(Debug, Clone)]
pub struct JoinedSession {
	pub joined_at: DateTime<Utc>,
}

/// Client record (spec.md §3).
#[derive(Debug, Clone)]
pub struct Client {
	pub client_id: ClientId,
	pub workspace_id: Option<String>,
	pub capabilities: HashSet<String>,
	pub metadata: HashMap<String, Value>,
	pub ip_address: Option<String>,
	pub user_agent: Option<String>,
	pub connection_time: DateTime<Utc>,
	pub last_activity_time: DateTime<Utc>,
	pub authenticated: bool,
	pub auth_method: Option<AuthMethod>,
	pub auth_time: Option<DateTime<Utc>>,
	pub token_valid_until: Option<DateTime<Utc>>,
	pub permissions: HashSet<String>,
	pub joined_sessions: HashMap<SessionId, JoinedSession>,
}

impl Client {
	fn new(client_id: ClientId, workspace_id: Option<String>, ip_address: Option<String>) -> Self {
		let now = Utc::now();
		Self {
			client_id,
			workspace_id,
			capabilities: HashSet::new(),
			metadata: HashMap::new(),
			ip_address,
			user_agent: None,
			connection_time: now,
			last_activity_time: now,
			authenticated: false,
			auth_method: None,
			auth_time: None,
			token_valid_until: None,
			permissions: HashSet::new(),
			joined_sessions: HashMap::new(),
		}
	}

	/// True when `tokenValidUntil` has passed. A client with no expiry
	/// (auth disabled, or a grant with no expiry) never expires this way.
	pub fn token_expired(&self) -> bool {
		self.token_valid_until.is_some_and(|until| until <= Utc::now())
	}
}

struct ClientEntry {
	client: Client,
	outbound: mpsc::Sender<Envelope>,
}

/// Tracks live client endpoints: identity, authentication state, activity.
pub struct ConnectionManager {
	clients: RwLock<HashMap<ClientId, ClientEntry>>,
	max_clients: usize,
	pub server_capabilities: HashSet<String>,
	auth_enabled: bool,
}

impl ConnectionManager {
	pub fn new(max_clients: usize, auth_enabled: bool, server_capabilities: HashSet<String>) -> Self {
		Self {
			clients: RwLock::new(HashMap::new()),
			max_clients,
			server_capabilities,
			auth_enabled,
		}
	}

	/// Admits a new client per the ordered policy in spec.md §4.2, returning
	/// its outbound receiver for the transport loop to drain.
	pub async fn connect(
		&self,
		client_id: ClientId,
		workspace_id: Option<String>,
		ip_address: Option<String>,
	) -> Result<(Client, mpsc::Receiver<Envelope>), ConnectionError> {
		let mut clients = self.clients.write().await;

		if clients.len() >= self.max_clients {
			return Err(ConnectionError::MaxClientsReached);
		}
		if clients.contains_key(&client_id) {
			return Err(ConnectionError::ClientIdInUse);
		}

		let mut client = Client::new(client_id.clone(), workspace_id, ip_address);
		if !self.auth_enabled {
			client.authenticated = true;
			client.auth_time = Some(client.connection_time);
		}

		let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
		let snapshot = client.clone();
		clients.insert(
			client_id,
			ClientEntry {
				client,
				outbound: tx,
			},
		);
		Ok((snapshot, rx))
	}

	/// Removes a client entirely. Returns the removed record, if any, so the
	/// caller (router/session manager) can emit `session_participant_left`
	/// notifications for every session it was part of.
	pub async fn disconnect(&self, client_id: &ClientId) -> Option<Client> {
		self.clients
			.write()
			.await
			.remove(client_id)
			.map(|entry| entry.client)
	}

	pub async fn is_connected(&self, client_id: &ClientId) -> bool {
		self.clients.read().await.contains_key(client_id)
	}

	pub async fn connected_count(&self) -> usize {
		self.clients.read().await.len()
	}

	/// Refreshes `lastActivityTime` to now.
	pub async fn touch(&self, client_id: &ClientId) -> Result<(), ConnectionError> {
		let mut clients = self.clients.write().await;
		let entry = clients
			.get_mut(client_id)
			.ok_or(ConnectionError::ClientNotFound)?;
		entry.client.last_activity_time = Utc::now();
		Ok(())
	}

	/// Returns a snapshot of the client record, for read-only queries
	/// (`client_info`, router auth checks).
	pub async fn get(&self, client_id: &ClientId) -> Result<Client, ConnectionError> {
		self.clients
			.read()
			.await
			.get(client_id)
			.map(|e| e.client.clone())
			.ok_or(ConnectionError::ClientNotFound)
	}

	/// Fails with `AUTH_EXPIRED` if the client completed authentication and
	/// its grant has since lapsed, `AUTH_REQUIRED` if this server mandates
	/// authentication and the client never completed it, or
	/// `CLIENT_NOT_AUTHENTICATED` otherwise (spec.md §4.2, §8 token expiry
	/// scenario).
	pub async fn require_authenticated(&self, client_id: &ClientId) -> Result<(), ConnectionError> {
		let client = self.get(client_id).await?;
		if client.authenticated && !client.token_expired() {
			return Ok(());
		}
		if client.authenticated && client.token_expired() {
			return Err(ConnectionError::AuthExpired);
		}
		if self.auth_enabled {
			Err(ConnectionError::AuthRequired)
		} else {
			Err(ConnectionError::NotAuthenticated)
		}
	}

	/// Marks a client authenticated with the grant obtained from the Auth
	/// Registry.
	pub async fn mark_authenticated(
		&self,
		client_id: &ClientId,
		auth_method: AuthMethod,
		permissions: HashSet<String>,
		token_valid_until: DateTime<Utc>,
	) -> Result<(), ConnectionError> {
		let mut clients = self.clients.write().await;
		let entry = clients
			.get_mut(client_id)
			.ok_or(ConnectionError::ClientNotFound)?;
		entry.client.authenticated = true;
		entry.client.auth_method = Some(auth_method);
		entry.client.auth_time = Some(Utc::now());
		entry.client.permissions = permissions;
		entry.client.token_valid_until = Some(token_valid_until);
		Ok(())
	}

	/// Demotes a client from Authenticated back to Connected, per the state
	/// machine in spec.md §4.2 (`AUTH_EXPIRED` demotes pending re-auth).
	pub async fn demote(&self, client_id: &ClientId) {
		if let Some(entry) = self.clients.write().await.get_mut(client_id) {
			entry.client.authenticated = false;
		}
	}

	pub async fn update_client_info(
		&self,
		client_id: &ClientId,
		capabilities: Option<HashSet<String>>,
		metadata: Option<HashMap<String, Value>>,
	) -> Result<(), ConnectionError> {
		let mut clients = self.clients.write().await;
		let entry = clients
			.get_mut(client_id)
			.ok_or(ConnectionError::ClientNotFound)?;
		if let Some(caps) = capabilities {
			entry.client.capabilities = caps;
		}
		if let Some(meta) = metadata {
			entry.client.metadata = meta;
		}
		Ok(())
	}

	/// Records that `client_id` joined `session_id`.
	pub async fn record_session_join(&self, client_id: &ClientId, session_id: SessionId) {
		if let Some(entry) = self.clients.write().await.get_mut(client_id) {
			entry.client.joined_sessions.insert(
				session_id,
				JoinedSession {
					joined_at: Utc::now(),
				},
			);
		}
	}

	/// Records that `client_id` left `session_id`, returning the remaining
	/// joined-session set so the caller can decide whether more cleanup is
	/// owed.
	pub async fn record_session_leave(&self, client_id: &ClientId, session_id: &SessionId) {
		if let Some(entry) = self.clients.write().await.get_mut(client_id) {
			entry.client.joined_sessions.remove(session_id);
		}
	}

	/// Best-effort delivery to one client's outbound queue. Non-fatal
	/// messages use `try_send` and are dropped (with a caller-side log) when
	/// the queue is full; callers must deliver `fatal` errors with
	/// `send_fatal` instead, which awaits capacity.
	pub async fn try_send(&self, client_id: &ClientId, envelope: Envelope) -> bool {
		let clients = self.clients.read().await;
		let Some(entry) = clients.get(client_id) else {
			return false;
		};
		entry.outbound.try_send(envelope).is_ok()
	}

	/// Synchronous delivery for `fatal = true` errors and shutdown
	/// notifications (spec.md §5 backpressure exception).
	pub async fn send_fatal(&self, client_id: &ClientId, envelope: Envelope) -> bool {
		let sender = {
			let clients = self.clients.read().await;
			clients.get(client_id).map(|e| e.outbound.clone())
		};
		match sender {
			Some(tx) => tx.send(envelope).await.is_ok(),
			None => false,
		}
	}

	/// Snapshot of every live client id, for shutdown fan-out and sweeps.
	pub async fn all_client_ids(&self) -> Vec<ClientId> {
		self.clients.read().await.keys().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn admission_enforces_max_clients_then_duplicate_id() {
		let mgr = ConnectionManager::new(1, false, HashSet::new());
		let (client, _rx) = mgr
			.connect(ClientId::new("a"), None, None)
			.await
			.unwrap();
		assert!(client.authenticated, "auth disabled authenticates on connect");

		let err = mgr
			.connect(ClientId::new("b"), None, None)
			.await
			.unwrap_err();
		assert_eq!(err, ConnectionError::MaxClientsReached);
	}

	#[tokio::test]
	async fn duplicate_client_id_rejected() {
		let mgr = ConnectionManager::new(10, false, HashSet::new());
		mgr.connect(ClientId::new("a"), None, None).await.unwrap();
		let err = mgr
			.connect(ClientId::new("a"), None, None)
			.await
			.unwrap_err();
		assert_eq!(err, ConnectionError::ClientIdInUse);
	}

	#[tokio::test]
	async fn auth_enabled_requires_authenticate() {
		let mgr = ConnectionManager::new(10, true, HashSet::new());
		let (client, _rx) = mgr
			.connect(ClientId::new("a"), None, None)
			.await
			.unwrap();
		assert!(!client.authenticated);

		let err = mgr
			.require_authenticated(&ClientId::new("a"))
			.await
			.unwrap_err();
		assert_eq!(err, ConnectionError::AuthRequired);
	}

	#[tokio::test]
	async fn disconnect_then_reconnect_round_trips() {
		let mgr = ConnectionManager::new(10, false, HashSet::new());
		mgr.connect(ClientId::new("a"), None, None).await.unwrap();
		assert_eq!(mgr.connected_count().await, 1);

		mgr.disconnect(&ClientId::new("a")).await;
		assert_eq!(mgr.connected_count().await, 0);

		mgr.connect(ClientId::new("a"), None, None).await.unwrap();
		assert_eq!(mgr.connected_count().await, 1);
	}
}
