//! End-to-end scenarios exercising a constructed `Server` exactly the way a
//! transport would: build envelopes, call `Router::dispatch`, and inspect
//! both the direct response and each recipient's outbound notification
//! queue.

use relay_core::config::Config;
use relay_core::Server;
use relay_proto::messages::AuthMethod;
use relay_proto::{now_iso8601, ClientId, Envelope, MessageType};
use serde_json::Value;

fn frame(message_type: MessageType, id: &str, payload: Value) -> Envelope {
	Envelope {
		message_type,
		id: id.to_string(),
		timestamp: now_iso8601(),
		payload,
		response_to: None,
	}
}

async fn connect(
	server: &Server,
	name: &str,
) -> (ClientId, tokio::sync::mpsc::Receiver<Envelope>) {
	let client_id = ClientId::new(name);
	let (rx, ack) = server
		.router
		.handle_connection(
			relay_proto::messages::ConnectionPayload {
				client_id: client_id.clone(),
				workspace_id: Some("W1".to_string()),
				capabilities: Default::default(),
				metadata: Default::default(),
				user_agent: None,
			},
			None,
		)
		.await
		.unwrap();
	assert_eq!(ack.message_type, MessageType::ConnectionAck);
	(client_id, rx)
}

/// Scenario 1 (spec.md §8): happy-path session create/join with fan-out.
#[tokio::test]
async fn happy_path_session() {
	let server = Server::with_defaults(Config::default());

	let (a, mut a_rx) = connect(&server, "A").await;
	assert_eq!(server.connections.connected_count().await, 1);

	let created = server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::SessionCreate,
				"c1",
				serde_json::json!({ "sessionId": "S1", "createdBy": "A", "workspaceId": "W1" }),
			),
		)
		.await;
	assert_eq!(created.payload["status"], "created");

	let (b, _b_rx) = connect(&server, "B").await;
	assert_eq!(server.connections.connected_count().await, 2);

	let joined = server
		.router
		.dispatch(
			&b,
			frame(
				MessageType::SessionJoin,
				"j1",
				serde_json::json!({ "sessionId": "S1", "clientId": "B", "workspaceId": "W1" }),
			),
		)
		.await;
	assert_eq!(joined.payload["status"], "joined");
	assert_eq!(
		joined.payload["participants"],
		serde_json::json!(["A", "B"])
	);

	let notification = a_rx.try_recv().expect("A should see B's join");
	assert_eq!(notification.message_type, MessageType::Notification);
	assert_eq!(notification.payload["eventType"], "session_participant_joined");
	assert_eq!(notification.payload["data"]["participantId"], "B");
}

/// Scenario 2 (spec.md §8): conflicting editor writes resolve via
/// last-writer-wins with a silent stale no-op.
#[tokio::test]
async fn editor_conflict_resolves_with_stale_no_op() {
	let server = Server::with_defaults(Config::default());
	let (a, _a_rx) = connect(&server, "A").await;
	let (b, _b_rx) = connect(&server, "B").await;

	server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::SessionCreate,
				"c1",
				serde_json::json!({ "sessionId": "S1", "createdBy": "A" }),
			),
		)
		.await;
	server
		.router
		.dispatch(
			&b,
			frame(
				MessageType::SessionJoin,
				"j1",
				serde_json::json!({ "sessionId": "S1", "clientId": "B" }),
			),
		)
		.await;

	let registered = server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::Editor,
				"e1",
				serde_json::json!({ "action": "register", "sessionId": "S1", "filePath": "/x.txt" }),
			),
		)
		.await;
	let editor_id = registered.payload["editorId"].as_str().unwrap().to_string();

	// B must also register the same path to become a participant of the
	// editor (registration is idempotent per file path) before its writes
	// are anything other than a permission error.
	server
		.router
		.dispatch(
			&b,
			frame(
				MessageType::Editor,
				"e1b",
				serde_json::json!({ "action": "register", "sessionId": "S1", "filePath": "/x.txt" }),
			),
		)
		.await;

	let first_update = server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::Editor,
				"e2",
				serde_json::json!({
					"action": "update_content", "sessionId": "S1", "editorId": editor_id,
					"version": 1, "content": "foo",
				}),
			),
		)
		.await;
	assert_eq!(first_update.payload["version"], 2);
	assert_eq!(first_update.payload["stale"], false);

	let stale_update = server
		.router
		.dispatch(
			&b,
			frame(
				MessageType::Editor,
				"e3",
				serde_json::json!({
					"action": "update_content", "sessionId": "S1", "editorId": editor_id,
					"version": 1, "content": "bar",
				}),
			),
		)
		.await;
	assert_eq!(stale_update.payload["stale"], true);
	assert_eq!(stale_update.payload["version"], 2);

	let accepted_update = server
		.router
		.dispatch(
			&b,
			frame(
				MessageType::Editor,
				"e4",
				serde_json::json!({
					"action": "update_content", "sessionId": "S1", "editorId": editor_id,
					"version": 2, "content": "foobar",
				}),
			),
		)
		.await;
	assert_eq!(accepted_update.payload["stale"], false);
	assert_eq!(accepted_update.payload["version"], 3);
}

/// Scenario 3 (spec.md §8): an authenticated client whose grant has lapsed
/// is rejected with `AUTH_EXPIRED`, and a subsequent `token_refresh` revives it.
#[tokio::test]
async fn token_expiry_then_refresh_recovers() {
	let mut config = Config::default();
	config.auth.enabled = true;
	let server = Server::with_defaults(config);
	server
		.auth
		.set_token(relay_proto::ServerId::new("srv-1"), "secret", None, vec![])
		.await;

	let (a, _a_rx) = connect(&server, "A").await;

	let authenticated = server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::Authenticate,
				"auth1",
				serde_json::json!({ "token": "secret", "authMethod": "token" }),
			),
		)
		.await;
	assert_eq!(authenticated.payload["authenticated"], true);
	let refresh_token = authenticated.payload["refreshToken"]
		.as_str()
		.expect("authenticate issues a refresh token")
		.to_string();

	// Simulate the issued grant having since lapsed.
	server
		.connections
		.mark_authenticated(
			&a,
			AuthMethod::Token,
			Default::default(),
			chrono::Utc::now() - chrono::Duration::seconds(1),
		)
		.await
		.unwrap();

	let expired = server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::SessionCreate,
				"c1",
				serde_json::json!({ "createdBy": "A" }),
			),
		)
		.await;
	assert_eq!(expired.message_type, MessageType::Error);
	assert_eq!(expired.payload["code"], "AUTH_EXPIRED");

	let refresh = server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::TokenRefresh,
				"r1",
				serde_json::json!({ "refreshToken": refresh_token }),
			),
		)
		.await;
	assert_eq!(refresh.payload["status"], "accepted");
	assert!(refresh.payload["tokenValidUntil"].is_string());

	let retried = server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::SessionCreate,
				"c2",
				serde_json::json!({ "createdBy": "A" }),
			),
		)
		.await;
	assert_eq!(retried.payload["status"], "created");
}

/// Scenario 4 (spec.md §8): disconnecting the sole remaining participant
/// destroys the session with no further notifications.
#[tokio::test]
async fn disconnect_cleanup_destroys_empty_session() {
	let server = Server::with_defaults(Config::default());
	let (a, _a_rx) = connect(&server, "A").await;
	let (b, mut b_rx) = connect(&server, "B").await;

	server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::SessionCreate,
				"c1",
				serde_json::json!({ "sessionId": "S1", "createdBy": "A" }),
			),
		)
		.await;
	server
		.router
		.dispatch(
			&b,
			frame(
				MessageType::SessionJoin,
				"j1",
				serde_json::json!({ "sessionId": "S1", "clientId": "B" }),
			),
		)
		.await;

	server
		.router
		.dispatch(&a, frame(MessageType::Disconnect, "d1", serde_json::json!({})))
		.await;

	let left_notification = b_rx.try_recv().expect("B should see A leave");
	assert_eq!(left_notification.payload["eventType"], "session_participant_left");

	assert!(server.sessions.get(&relay_proto::SessionId::new("S1")).await.is_some());

	server
		.router
		.dispatch(&b, frame(MessageType::Disconnect, "d2", serde_json::json!({})))
		.await;

	assert!(server.sessions.get(&relay_proto::SessionId::new("S1")).await.is_none());
	assert_eq!(server.connections.connected_count().await, 0);
}

/// Scenario 5 (spec.md §8): shutdown broadcasts to every connected client and
/// drains within the configured timeout.
#[tokio::test]
async fn shutdown_broadcasts_and_drains() {
	let mut config = Config::default();
	config.server.shutdown_timeout_ms = 200;
	let server = Server::with_defaults(config);

	let (_a, mut a_rx) = connect(&server, "A").await;
	let (_b, mut b_rx) = connect(&server, "B").await;

	let connections = server.connections.clone();
	tokio::spawn(async move {
		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
		connections.disconnect(&ClientId::new("A")).await;
		connections.disconnect(&ClientId::new("B")).await;
	});

	server.shutdown.shutdown("restart", true, 300).await;

	for rx in [&mut a_rx, &mut b_rx] {
		let envelope = rx.recv().await.expect("server_shutdown delivered");
		assert_eq!(envelope.message_type, MessageType::ServerShutdown);
		assert_eq!(envelope.payload["reason"], "restart");
		assert_eq!(envelope.payload["plannedRestart"], true);
	}
	assert!(server.shutdown.token().is_cancelled());
}

/// Scenario 6 (spec.md §8): terminal input fans out to every other
/// participant of the shared terminal, never back to the sender.
#[tokio::test]
async fn terminal_input_fans_out_excluding_sender() {
	let server = Server::with_defaults(Config::default());
	let (a, mut a_rx) = connect(&server, "A").await;
	let (b, mut b_rx) = connect(&server, "B").await;
	let (c, mut c_rx) = connect(&server, "C").await;

	server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::SessionCreate,
				"c1",
				serde_json::json!({ "sessionId": "S1", "createdBy": "A" }),
			),
		)
		.await;
	for (client_id, name) in [(&b, "B"), (&c, "C")] {
		server
			.router
			.dispatch(
				client_id,
				frame(
					MessageType::SessionJoin,
					&format!("j-{}", name),
					serde_json::json!({ "sessionId": "S1", "clientId": name }),
				),
			)
			.await;
	}
	// Drain the session_participant_joined notifications: A sees both B's
	// and C's join; B (already a participant when C joins) sees C's join too.
	let _ = a_rx.try_recv();
	let _ = a_rx.try_recv();
	let _ = b_rx.try_recv();

	let created = server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::Terminal,
				"t1",
				serde_json::json!({ "action": "create", "sessionId": "S1" }),
			),
		)
		.await;
	let terminal_id = created.payload["terminalId"].as_str().unwrap().to_string();

	server
		.router
		.dispatch(
			&a,
			frame(
				MessageType::Terminal,
				"t2",
				serde_json::json!({
					"action": "input", "sessionId": "S1", "terminalId": terminal_id, "data": "ls\n",
				}),
			),
		)
		.await;

	let to_b = b_rx.try_recv().expect("B should see the terminal input");
	assert_eq!(to_b.payload["eventType"], "terminal_input");
	assert_eq!(to_b.payload["data"]["clientId"], "A");
	assert_eq!(to_b.payload["data"]["data"], "ls\n");

	let to_c = c_rx.try_recv().expect("C should see the terminal input");
	assert_eq!(to_c.payload["eventType"], "terminal_input");

	assert!(a_rx.try_recv().is_err(), "sender must not see its own input echoed back");
}
