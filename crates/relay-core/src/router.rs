//! Request/Response Router (spec.md §4.3).
//!
//! `Router::dispatch` is the single entry point a transport calls for every
//! frame after a client has completed `connection`: validate the envelope
//! (already done by the caller via [`relay_proto::Envelope::parse`]),
//! auth-gate it, deserialize the type-specific payload, run the matching
//! handler, and produce the response envelope. Per-client arrival order is
//! the transport's responsibility (one task per client endpoint reading its
//! socket in a loop and awaiting `dispatch` before reading the next frame).

use std::collections::HashSet;
use std::sync::Arc;

use relay_proto::messages::*;
use relay_proto::{now_iso8601, ClientId, Envelope, ErrorCode, ErrorPayload, MessageType, ServerId};
use serde_json::Value;

use crate::auth::AuthRegistry;
use crate::connection::ConnectionManager;
use crate::lifecycle::{ErrorTracker, RateLimiter, ShutdownController};
use crate::notify::NotificationDispatcher;
use crate::session::{SessionError, SessionManager};
use crate::tools::ToolInvoker;

pub struct Router {
	pub connections: Arc<ConnectionManager>,
	pub auth: Arc<AuthRegistry>,
	pub sessions: Arc<SessionManager>,
	pub notifier: Arc<NotificationDispatcher>,
	pub tools: Arc<dyn ToolInvoker>,
	pub shutdown: Arc<ShutdownController>,
	pub rate_limiter: Arc<RateLimiter>,
	pub error_tracker: Arc<ErrorTracker>,
	pub refresh_token_ttl: chrono::Duration,
}

fn respond(message_type: MessageType, request_id: &str, payload: Value) -> Envelope {
	Envelope {
		message_type,
		id: format!("{}-ack-{}", request_id, uuid::Uuid::new_v4()),
		timestamp: now_iso8601(),
		payload,
		response_to: Some(request_id.to_string()),
	}
}

fn error_response(request_id: &str, code: ErrorCode, message: impl Into<String>, fatal: bool) -> Envelope {
	let mut payload = ErrorPayload::new(code, message, Some(request_id.to_string()));
	if fatal {
		payload = payload.fatal();
	}
	Envelope {
		message_type: MessageType::Error,
		id: format!("err-{}", uuid::Uuid::new_v4()),
		timestamp: now_iso8601(),
		payload: serde_json::to_value(payload).expect("ErrorPayload always serializes"),
		response_to: Some(request_id.to_string()),
	}
}

fn bad_payload(request_id: &str) -> Envelope {
	error_response(
		request_id,
		ErrorCode::MissingRequiredField,
		"payload did not match the expected shape for this message type",
		false,
	)
}

impl Router {
	/// Handles the initial `connection` handshake, admitting the client into
	/// the Connection Manager (spec.md §4.2). Called by the transport before
	/// the client enters its steady-state `dispatch` loop.
	pub async fn handle_connection(
		&self,
		payload: ConnectionPayload,
		ip_address: Option<String>,
	) -> Result<(tokio::sync::mpsc::Receiver<Envelope>, Envelope), Envelope> {
		let client_id = payload.client_id.clone();
		match self
			.connections
			.connect(client_id.clone(), payload.workspace_id, ip_address)
			.await
		{
			Ok((client, rx)) => {
				let ack = ConnectionAckPayload {
					status: ConnectionStatus::Connected,
					server_time: now_iso8601(),
					connected_clients: self.connections.connected_count().await,
					auth_required: !client.authenticated,
					server_capabilities: self.connections.server_capabilities.clone(),
					session_count: self.sessions.session_count().await,
				};
				Ok((
					rx,
					respond(
						MessageType::ConnectionAck,
						"connection",
						serde_json::to_value(ack).expect("ConnectionAckPayload always serializes"),
					),
				))
			}
			Err(err) => Err(error_response("connection", err.to_wire(), err.to_string(), true)),
		}
	}

	/// Dispatches one already-envelope-validated frame from an authenticated
	/// (or pre-auth, for `authenticate`/`ping`/`disconnect`) client.
	pub async fn dispatch(&self, client_id: &ClientId, envelope: Envelope) -> Envelope {
		if self.shutdown.is_shutting_down() {
			return error_response(
				&envelope.id,
				ErrorCode::ServerShuttingDown,
				"server is shutting down",
				false,
			);
		}

		if !self.rate_limiter.allow(client_id).await {
			self.error_tracker.record(ErrorCode::ClientRateLimited).await;
			return error_response(
				&envelope.id,
				ErrorCode::ClientRateLimited,
				"too many requests",
				false,
			);
		}

		let _ = self.connections.touch(client_id).await;

		let response = self.dispatch_inner(client_id, &envelope).await;
		if response.message_type == MessageType::Error {
			if let Some(code) = response
				.payload
				.get("code")
				.and_then(Value::as_str)
				.and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
			{
				self.error_tracker.record(code).await;
			}
		}
		response
	}

	async fn dispatch_inner(&self, client_id: &ClientId, envelope: &Envelope) -> Envelope {
		let id = envelope.id.as_str();
		let payload = envelope.payload.clone();

		macro_rules! require_auth {
			() => {
				if let Err(err) = self.connections.require_authenticated(client_id).await {
					return error_response(id, err.to_wire(), err.to_string(), false);
				}
			};
		}

		macro_rules! parse {
			($ty:ty) => {
				match serde_json::from_value::<$ty>(payload.clone()) {
					Ok(v) => v,
					Err(_) => return bad_payload(id),
				}
			};
		}

		match envelope.message_type {
			MessageType::Ping => {
				let p = parse!(PingPayload);
				respond(
					MessageType::Pong,
					id,
					serde_json::to_value(PongPayload {
						server_time: now_iso8601(),
						client_time: p.client_time,
						connected_clients: self.connections.connected_count().await,
					})
					.unwrap(),
				)
			}
			MessageType::Disconnect => {
				let _p = parse!(DisconnectPayload);
				let joined: Vec<_> = self
					.connections
					.get(client_id)
					.await
					.map(|c| c.joined_sessions.keys().cloned().collect())
					.unwrap_or_default();
				self.sessions.remove_client_from_all(client_id, &joined).await;
				self.connections.disconnect(client_id).await;
				respond(
					MessageType::DisconnectAck,
					id,
					serde_json::to_value(DisconnectAckPayload { acknowledged: true }).unwrap(),
				)
			}
			MessageType::Authenticate => {
				let p = parse!(AuthenticatePayload);
				match self
					.auth
					.authenticate_client(&p.token, self.refresh_token_ttl)
					.await
				{
					Ok(grant) => {
						let permissions: HashSet<String> = grant.permissions.into_iter().collect();
						let _ = self
							.connections
							.mark_authenticated(
								client_id,
								p.auth_method,
								permissions.clone(),
								grant.token_valid_until,
							)
							.await;
						respond(
							MessageType::AuthenticateAck,
							id,
							serde_json::to_value(AuthenticateAckPayload {
								authenticated: true,
								permissions,
								token_valid_until: grant.token_valid_until.to_rfc3339(),
								refresh_token: grant.refresh_token,
							})
							.unwrap(),
						)
					}
					Err(err) => {
						self.connections.demote(client_id).await;
						error_response(id, err.to_wire(), err.to_string(), false)
					}
				}
			}
			MessageType::TokenRefresh => {
				// Deliberately not gated by `require_auth!()`: a client whose
				// token has expired (AUTH_EXPIRED) must still be able to
				// refresh it. Only a client that never authenticated at all
				// is rejected, with CLIENT_NOT_AUTHENTICATED.
				match self.connections.get(client_id).await {
					Ok(client) if client.auth_method.is_some() => {}
					Ok(_) => {
						return error_response(
							id,
							ErrorCode::ClientNotAuthenticated,
							"client has not completed authentication",
							false,
						)
					}
					Err(err) => return error_response(id, err.to_wire(), err.to_string(), false),
				}
				let p = parse!(TokenRefreshPayload);
				match self.auth.find_by_refresh_token(&p.refresh_token).await {
					Some(server_id) => {
						let new_token = uuid::Uuid::new_v4().to_string();
						let expires_at = chrono::Utc::now() + chrono::Duration::hours(1);
						let _ = self
							.auth
							.refresh_token(&server_id, &new_token, Some(expires_at))
							.await;
						let _ = self
							.connections
							.mark_authenticated(
								client_id,
								AuthMethod::Token,
								HashSet::new(),
								expires_at,
							)
							.await;
						respond(
							MessageType::TokenRefreshAck,
							id,
							serde_json::to_value(TokenRefreshAckPayload {
								status: TokenRefreshStatus::Accepted,
								token_valid_until: Some(expires_at.to_rfc3339()),
							})
							.unwrap(),
						)
					}
					None => respond(
						MessageType::TokenRefreshAck,
						id,
						serde_json::to_value(TokenRefreshAckPayload {
							status: TokenRefreshStatus::Rejected,
							token_valid_until: None,
						})
						.unwrap(),
					),
				}
			}
			MessageType::TokenValidate => {
				let p = parse!(TokenValidatePayload);
				let (valid, expires_at) = match p.token {
					Some(token) => match self.auth.validate_token(&token).await {
						Ok(grant) => (true, Some(grant.token_valid_until.to_rfc3339())),
						Err(_) => (false, None),
					},
					None => match self.connections.get(client_id).await {
						Ok(client) => (
							client.authenticated && !client.token_expired(),
							client.token_valid_until.map(|t| t.to_rfc3339()),
						),
						Err(_) => (false, None),
					},
				};
				respond(
					MessageType::TokenValidateAck,
					id,
					serde_json::to_value(TokenValidateAckPayload { valid, expires_at }).unwrap(),
				)
			}
			MessageType::SessionCreate => {
				require_auth!();
				let p = parse!(SessionCreatePayload);
				match self
					.sessions
					.create(p.session_id, p.created_by, p.workspace_id, p.name)
					.await
				{
					Ok(session_id) => respond(
						MessageType::SessionCreateAck,
						id,
						serde_json::to_value(SessionCreateAckPayload {
							status: SessionCreateStatus::Created,
							session_id: Some(session_id),
						})
						.unwrap(),
					),
					Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
				}
			}
			MessageType::SessionJoin => {
				require_auth!();
				let p = parse!(SessionJoinPayload);
				match self.sessions.join(&p.session_id, p.client_id.clone()).await {
					Ok(participants) => {
						self.connections
							.record_session_join(&p.client_id, p.session_id.clone())
							.await;
						self.notifier
							.notify(
								&participants
									.iter()
									.filter(|c| *c != &p.client_id)
									.cloned()
									.collect::<Vec<_>>(),
								"session_participant_joined",
								serde_json::json!({ "sessionId": p.session_id.as_str(), "participantId": p.client_id.as_str() }),
							)
							.await;
						respond(
							MessageType::SessionJoinAck,
							id,
							serde_json::to_value(SessionJoinAckPayload {
								status: SessionJoinStatus::Joined,
								participants,
							})
							.unwrap(),
						)
					}
					Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
				}
			}
			MessageType::SessionLeave => {
				require_auth!();
				let p = parse!(SessionLeavePayload);
				match self.sessions.leave(&p.session_id, p.client_id.clone()).await {
					Ok(destroyed) => {
						self.connections
							.record_session_leave(&p.client_id, &p.session_id)
							.await;
						respond(
							MessageType::SessionLeaveAck,
							id,
							serde_json::to_value(SessionLeaveAckPayload {
								left: true,
								session_destroyed: destroyed,
							})
							.unwrap(),
						)
					}
					Err(SessionError::NotFound) => respond(
						MessageType::SessionLeaveAck,
						id,
						serde_json::to_value(SessionLeaveAckPayload {
							left: false,
							session_destroyed: false,
						})
						.unwrap(),
					),
					Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
				}
			}
			MessageType::SessionEnd => {
				require_auth!();
				let p = parse!(SessionEndPayload);
				match self.sessions.end(&p.session_id).await {
					Ok(()) => respond(
						MessageType::SessionEndAck,
						id,
						serde_json::to_value(SessionEndAckPayload { ended: true }).unwrap(),
					),
					Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
				}
			}
			MessageType::SessionPause => {
				require_auth!();
				let p = parse!(SessionPausePayload);
				match self.sessions.get(&p.session_id).await {
					Some(handle) => match handle.pause(client_id.clone()).await {
						Ok(()) => respond(
							MessageType::SessionPauseAck,
							id,
							serde_json::to_value(SessionPauseAckPayload { paused: true }).unwrap(),
						),
						Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
					},
					None => error_response(id, ErrorCode::SessionNotFound, "no such session", false),
				}
			}
			MessageType::SessionResume => {
				require_auth!();
				let p = parse!(SessionResumePayload);
				match self.sessions.get(&p.session_id).await {
					Some(handle) => match handle.resume(client_id.clone()).await {
						Ok(()) => respond(
							MessageType::SessionResumeAck,
							id,
							serde_json::to_value(SessionResumeAckPayload { resumed: true }).unwrap(),
						),
						Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
					},
					None => error_response(id, ErrorCode::SessionNotFound, "no such session", false),
				}
			}
			MessageType::Terminal => {
				require_auth!();
				let p = parse!(TerminalPayload);
				let Some(session_id) = p.session_id.clone() else {
					return error_response(id, ErrorCode::MissingRequiredField, "sessionId is required", false);
				};
				let Some(handle) = self.sessions.get(&session_id).await else {
					return error_response(id, ErrorCode::SessionNotFound, "no such session", false);
				};
				match handle.terminal(client_id.clone(), p).await {
					Ok(outcome) => respond(
						MessageType::Terminal,
						id,
						serde_json::json!({
							"terminalId": outcome.terminal_id.as_str(),
							"buffer": outcome
								.buffer
								.into_iter()
								.map(|e| TerminalBufferEntry {
									kind: match e.kind {
										crate::terminal::BufferEntryKind::Input => TerminalBufferKind::Input,
										crate::terminal::BufferEntryKind::Output => TerminalBufferKind::Output,
									},
									client_id: e.client_id,
									data: e.data,
									timestamp: e.timestamp.to_rfc3339(),
								})
								.collect::<Vec<_>>(),
						}),
					),
					Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
				}
			}
			MessageType::Editor => {
				require_auth!();
				let p = parse!(EditorPayload);
				let Some(session_id) = p.session_id.clone() else {
					return error_response(id, ErrorCode::MissingRequiredField, "sessionId is required", false);
				};
				let Some(handle) = self.sessions.get(&session_id).await else {
					return error_response(id, ErrorCode::SessionNotFound, "no such session", false);
				};
				match handle.editor(client_id.clone(), p).await {
					Ok(outcome) => respond(
						MessageType::Editor,
						id,
						serde_json::to_value(EditorChangedPayload {
							editor_id: outcome.editor_id,
							client_id: client_id.clone(),
							version: outcome.version,
							content: outcome.content,
							stale: outcome.stale,
						})
						.unwrap(),
					),
					Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
				}
			}
			MessageType::Extension => {
				require_auth!();
				let p = parse!(ExtensionPayload);
				let session_id = p.session_id.clone();
				let Some(handle) = self.sessions.get(&session_id).await else {
					return error_response(id, ErrorCode::SessionNotFound, "no such session", false);
				};
				let extension_id = p.extension_id.clone();
				match handle.extension(client_id.clone(), p).await {
					Ok(outcome) => respond(
						MessageType::Extension,
						id,
						serde_json::to_value(ExtensionStateChangedPayload {
							extension_id,
							version: outcome.version,
							state: outcome.state,
						})
						.unwrap(),
					),
					Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
				}
			}
			MessageType::ClientInfo => {
				require_auth!();
				let _p = parse!(ClientInfoPayload);
				match self.connections.get(client_id).await {
					Ok(client) => respond(
						MessageType::ClientInfo,
						id,
						serde_json::to_value(ClientInfoAckPayload {
							client_id: client.client_id,
							capabilities: client.capabilities,
							metadata: client.metadata,
							authenticated: client.authenticated,
							joined_sessions: client.joined_sessions.into_keys().collect(),
						})
						.unwrap(),
					),
					Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
				}
			}
			MessageType::ClientUpdate => {
				require_auth!();
				let p = parse!(ClientUpdatePayload);
				match self
					.connections
					.update_client_info(client_id, p.capabilities, p.metadata)
					.await
				{
					Ok(()) => respond(
						MessageType::ClientUpdate,
						id,
						serde_json::to_value(ClientUpdateAckPayload { updated: true }).unwrap(),
					),
					Err(err) => error_response(id, err.to_wire(), err.to_string(), false),
				}
			}
			MessageType::ToolInvoke => {
				require_auth!();
				let p = parse!(ToolInvokePayload);
				match self.tools.invoke(&p.name, p.args).await {
					Ok(result) => respond(
						MessageType::ToolResponse,
						id,
						serde_json::to_value(ToolResponsePayload {
							name: p.name,
							result,
						})
						.unwrap(),
					),
					Err(code) => error_response(id, code, "tool invocation failed", false),
				}
			}
			_ => error_response(id, ErrorCode::UnknownMessageType, "unexpected message type for this direction", false),
		}
	}
}

/// Provisions an operator-issued token out-of-band (not part of the wire
/// protocol; used by `relay-server`'s CLI/config loading to seed credentials
/// before the transport starts accepting connections).
pub async fn provision_token(
	auth: &AuthRegistry,
	server_id: ServerId,
	token: &str,
	expires_at: Option<chrono::DateTime<chrono::Utc>>,
	permissions: Vec<String>,
) {
	auth.set_token(server_id, token, expires_at, permissions).await;
}

#[cfg(test)]
mod tests {
	use crate::config::Config;
	use crate::Server;

	use super::*;

	fn frame(message_type: MessageType, id: &str, payload: Value) -> Envelope {
		Envelope {
			message_type,
			id: id.to_string(),
			timestamp: now_iso8601(),
			payload,
			response_to: None,
		}
	}

	async fn connected_client(server: &Server, name: &str) -> ClientId {
		let client_id = ClientId::new(name);
		let (_rx, _ack) = server
			.router
			.handle_connection(
				ConnectionPayload {
					client_id: client_id.clone(),
					workspace_id: None,
					capabilities: HashSet::new(),
					metadata: Default::default(),
					user_agent: None,
				},
				None,
			)
			.await
			.unwrap();
		client_id
	}

	#[tokio::test]
	async fn ping_round_trips_to_pong() {
		let server = Server::with_defaults(Config::default());
		let client_id = connected_client(&server, "alice").await;

		let response = server
			.router
			.dispatch(&client_id, frame(MessageType::Ping, "p1", serde_json::json!({})))
			.await;
		assert_eq!(response.message_type, MessageType::Pong);
		assert_eq!(response.response_to.as_deref(), Some("p1"));
	}

	#[tokio::test]
	async fn session_create_then_join_notifies_existing_participant() {
		let server = Server::with_defaults(Config::default());
		let alice = connected_client(&server, "alice").await;
		let bob = connected_client(&server, "bob").await;

		let created = server
			.router
			.dispatch(
				&alice,
				frame(
					MessageType::SessionCreate,
					"c1",
					serde_json::json!({ "createdBy": alice.as_str() }),
				),
			)
			.await;
		assert_eq!(created.message_type, MessageType::SessionCreateAck);
		let session_id = created.payload["sessionId"].as_str().unwrap().to_string();

		let joined = server
			.router
			.dispatch(
				&bob,
				frame(
					MessageType::SessionJoin,
					"j1",
					serde_json::json!({ "sessionId": session_id, "clientId": bob.as_str() }),
				),
			)
			.await;
		assert_eq!(joined.message_type, MessageType::SessionJoinAck);
		assert_eq!(
			joined.payload["participants"].as_array().unwrap().len(),
			2
		);
	}

	#[tokio::test]
	async fn unauthenticated_client_is_rejected_when_auth_required() {
		let mut config = Config::default();
		config.auth.enabled = true;
		let server = Server::with_defaults(config);
		let client_id = connected_client(&server, "alice").await;

		let response = server
			.router
			.dispatch(
				&client_id,
				frame(
					MessageType::SessionCreate,
					"c1",
					serde_json::json!({ "createdBy": client_id.as_str() }),
				),
			)
			.await;
		assert_eq!(response.message_type, MessageType::Error);
		assert_eq!(response.payload["code"], "AUTH_REQUIRED");
	}

	#[tokio::test]
	async fn unknown_session_on_terminal_action_is_an_error() {
		let server = Server::with_defaults(Config::default());
		let client_id = connected_client(&server, "alice").await;

		let response = server
			.router
			.dispatch(
				&client_id,
				frame(
					MessageType::Terminal,
					"t1",
					serde_json::json!({ "action": "create", "sessionId": "missing" }),
				),
			)
			.await;
		assert_eq!(response.message_type, MessageType::Error);
		assert_eq!(response.payload["code"], "SESSION_NOT_FOUND");
	}
}
