//! Session Manager (spec.md §3 Session, §4.3) and the per-session actor that
//! serializes mutation of one session's participants and its three resource
//! registries (spec.md §5: "each session owns a single lock guarding its
//! participants set and its three per-session registries").
//!
//! The actor *is* that lock: a `tokio::sync::mpsc` command loop processing
//! one command at a time gives the same mutual-exclusion guarantee without
//! ever awaiting while a `std`/`tokio` mutex guard is live, mirroring the
//! teacher's `SessionService` / `SharedStateService` actors.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_proto::messages::{
	EditorAction, EditorPayload, ExtensionAction, ExtensionPayload, SelectionRange,
	TerminalAction, TerminalPayload,
};
use relay_proto::{ClientId, EditorId, ErrorCode, ExtensionId, SessionId, TerminalId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::warn;

use crate::editor::{Cursor, EditorRegistry};
use crate::extension::ExtensionRegistry;
use crate::notify::NotificationDispatcher;
use crate::resource::ResourceError;
use crate::terminal::{BufferEntry, TerminalOptions, TerminalRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Active,
	Paused,
	Ended,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
	#[error("no session with that id")]
	NotFound,
	#[error("session has ended")]
	Ended,
	#[error("join was rejected")]
	JoinRejected,
	#[error("session already exists")]
	AlreadyExists,
	#[error("caller is not a participant of this session")]
	PermissionDenied,
}

impl SessionError {
	pub fn to_wire(self) -> ErrorCode {
		match self {
			SessionError::NotFound => ErrorCode::SessionNotFound,
			SessionError::Ended => ErrorCode::SessionJoinRejected,
			SessionError::JoinRejected => ErrorCode::SessionJoinRejected,
			SessionError::AlreadyExists => ErrorCode::SessionAlreadyExists,
			SessionError::PermissionDenied => ErrorCode::PermissionDenied,
		}
	}
}

/// Snapshot of session metadata, safe to hand out across the actor boundary.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
	pub session_id: SessionId,
	pub created_by: ClientId,
	pub workspace_id: Option<String>,
	pub name: Option<String>,
	pub created_at: DateTime<Utc>,
	pub last_activity: DateTime<Utc>,
	pub participants: Vec<ClientId>,
	pub state: SessionState,
	pub paused_at: Option<DateTime<Utc>>,
	pub paused_by: Option<ClientId>,
}

pub struct TerminalOutcome {
	pub terminal_id: TerminalId,
	pub buffer: Vec<BufferEntry>,
}

pub struct EditorOutcome {
	pub editor_id: EditorId,
	pub version: u64,
	pub stale: bool,
	pub content: Option<String>,
}

pub struct ExtensionOutcome {
	pub version: u64,
	pub state: HashMap<String, Value>,
}

enum SessionCmd {
	Join {
		client_id: ClientId,
		reply: oneshot::Sender<Result<Vec<ClientId>, SessionError>>,
	},
	Leave {
		client_id: ClientId,
		reply: oneshot::Sender<Result<bool, SessionError>>,
	},
	End {
		reply: oneshot::Sender<Result<(), SessionError>>,
	},
	Pause {
		client_id: ClientId,
		reply: oneshot::Sender<Result<(), SessionError>>,
	},
	Resume {
		client_id: ClientId,
		reply: oneshot::Sender<Result<(), SessionError>>,
	},
	Snapshot {
		reply: oneshot::Sender<SessionSnapshot>,
	},
	Terminal {
		client_id: ClientId,
		payload: TerminalPayload,
		reply: oneshot::Sender<Result<TerminalOutcome, ResourceError>>,
	},
	Editor {
		client_id: ClientId,
		payload: EditorPayload,
		reply: oneshot::Sender<Result<EditorOutcome, ResourceError>>,
	},
	Extension {
		client_id: ClientId,
		payload: ExtensionPayload,
		reply: oneshot::Sender<Result<ExtensionOutcome, ResourceError>>,
	},
	Sweep {
		terminal_timeout: chrono::Duration,
		editor_timeout: chrono::Duration,
		extension_timeout: chrono::Duration,
	},
}

/// Clonable handle to one session's actor task.
#[derive(Clone)]
pub struct SessionHandle {
	tx: mpsc::Sender<SessionCmd>,
}

impl SessionHandle {
	pub async fn join(&self, client_id: ClientId) -> Result<Vec<ClientId>, SessionError> {
		let (reply, rx) = oneshot::channel();
		let _ = self.tx.send(SessionCmd::Join { client_id, reply }).await;
		rx.await.unwrap_or(Err(SessionError::NotFound))
	}

	/// Returns `true` if this leave destroyed the session (it was the last
	/// participant).
	pub async fn leave(&self, client_id: ClientId) -> Result<bool, SessionError> {
		let (reply, rx) = oneshot::channel();
		let _ = self.tx.send(SessionCmd::Leave { client_id, reply }).await;
		rx.await.unwrap_or(Err(SessionError::NotFound))
	}

	pub async fn end(&self) -> Result<(), SessionError> {
		let (reply, rx) = oneshot::channel();
		let _ = self.tx.send(SessionCmd::End { reply }).await;
		rx.await.unwrap_or(Err(SessionError::NotFound))
	}

	pub async fn pause(&self, client_id: ClientId) -> Result<(), SessionError> {
		let (reply, rx) = oneshot::channel();
		let _ = self.tx.send(SessionCmd::Pause { client_id, reply }).await;
		rx.await.unwrap_or(Err(SessionError::NotFound))
	}

	pub async fn resume(&self, client_id: ClientId) -> Result<(), SessionError> {
		let (reply, rx) = oneshot::channel();
		let _ = self.tx.send(SessionCmd::Resume { client_id, reply }).await;
		rx.await.unwrap_or(Err(SessionError::NotFound))
	}

	pub async fn snapshot(&self) -> Option<SessionSnapshot> {
		let (reply, rx) = oneshot::channel();
		self.tx.send(SessionCmd::Snapshot { reply }).await.ok()?;
		rx.await.ok()
	}

	pub async fn terminal(
		&self,
		client_id: ClientId,
		payload: TerminalPayload,
	) -> Result<TerminalOutcome, ResourceError> {
		let (reply, rx) = oneshot::channel();
		let _ = self
			.tx
			.send(SessionCmd::Terminal {
				client_id,
				payload,
				reply,
			})
			.await;
		rx.await.unwrap_or(Err(ResourceError::NotFound))
	}

	pub async fn editor(
		&self,
		client_id: ClientId,
		payload: EditorPayload,
	) -> Result<EditorOutcome, ResourceError> {
		let (reply, rx) = oneshot::channel();
		let _ = self
			.tx
			.send(SessionCmd::Editor {
				client_id,
				payload,
				reply,
			})
			.await;
		rx.await.unwrap_or(Err(ResourceError::NotFound))
	}

	pub async fn extension(
		&self,
		client_id: ClientId,
		payload: ExtensionPayload,
	) -> Result<ExtensionOutcome, ResourceError> {
		let (reply, rx) = oneshot::channel();
		let _ = self
			.tx
			.send(SessionCmd::Extension {
				client_id,
				payload,
				reply,
			})
			.await;
		rx.await.unwrap_or(Err(ResourceError::NotFound))
	}

	pub async fn sweep(
		&self,
		terminal_timeout: chrono::Duration,
		editor_timeout: chrono::Duration,
		extension_timeout: chrono::Duration,
	) {
		let _ = self
			.tx
			.send(SessionCmd::Sweep {
				terminal_timeout,
				editor_timeout,
				extension_timeout,
			})
			.await;
	}
}

struct SessionActor {
	rx: mpsc::Receiver<SessionCmd>,
	session_id: SessionId,
	created_by: ClientId,
	workspace_id: Option<String>,
	name: Option<String>,
	created_at: DateTime<Utc>,
	last_activity: DateTime<Utc>,
	participants: Vec<ClientId>,
	state: SessionState,
	paused_at: Option<DateTime<Utc>>,
	paused_by: Option<ClientId>,
	terminals: TerminalRegistry,
	editors: EditorRegistry,
	extensions: ExtensionRegistry,
	notifier: Arc<NotificationDispatcher>,
}

/// Tunables an actor needs at construction (resource defaults); kept as one
/// struct so `SessionManager::create` doesn't grow an unwieldy parameter list.
#[derive(Clone)]
pub struct SessionLimits {
	pub terminal_buffer_max_size: usize,
	pub editor_max_history_size: usize,
	pub extension_max_history_size: usize,
	pub resource_max_age: chrono::Duration,
}

impl SessionActor {
	#[allow(clippy::too_many_arguments)]
	fn spawn(
		session_id: SessionId,
		created_by: ClientId,
		workspace_id: Option<String>,
		name: Option<String>,
		limits: SessionLimits,
		notifier: Arc<NotificationDispatcher>,
	) -> SessionHandle {
		let (tx, rx) = mpsc::channel(256);
		let now = Utc::now();
		let actor = SessionActor {
			rx,
			session_id,
			created_by: created_by.clone(),
			workspace_id,
			name,
			created_at: now,
			last_activity: now,
			participants: vec![created_by],
			state: SessionState::Active,
			paused_at: None,
			paused_by: None,
			terminals: TerminalRegistry::new(limits.terminal_buffer_max_size, limits.resource_max_age),
			editors: EditorRegistry::new(limits.editor_max_history_size, limits.resource_max_age),
			extensions: ExtensionRegistry::new(
				limits.extension_max_history_size,
				limits.resource_max_age,
			),
			notifier,
		};
		tokio::spawn(actor.run());
		SessionHandle { tx }
	}

	fn snapshot(&self) -> SessionSnapshot {
		SessionSnapshot {
			session_id: self.session_id.clone(),
			created_by: self.created_by.clone(),
			workspace_id: self.workspace_id.clone(),
			name: self.name.clone(),
			created_at: self.created_at,
			last_activity: self.last_activity,
			participants: self.participants.clone(),
			state: self.state,
			paused_at: self.paused_at,
			paused_by: self.paused_by,
		}
	}

	async fn run(mut self) {
		while let Some(cmd) = self.rx.recv().await {
			match cmd {
				SessionCmd::Join { client_id, reply } => {
					let result = self.handle_join(client_id);
					let _ = reply.send(result);
				}
				SessionCmd::Leave { client_id, reply } => {
					let result = self.handle_leave(&client_id).await;
					let _ = reply.send(result);
					if matches!(result, Ok(true)) {
						break;
					}
				}
				SessionCmd::End { reply } => {
					let result = self.handle_end().await;
					let _ = reply.send(result);
					break;
				}
				SessionCmd::Pause { client_id, reply } => {
					let result = self.handle_pause(client_id);
					let _ = reply.send(result);
				}
				SessionCmd::Resume { client_id, reply } => {
					let result = self.handle_resume(client_id);
					let _ = reply.send(result);
				}
				SessionCmd::Snapshot { reply } => {
					let _ = reply.send(self.snapshot());
				}
				SessionCmd::Terminal {
					client_id,
					payload,
					reply,
				} => {
					let result = self.handle_terminal(client_id, payload).await;
					let _ = reply.send(result);
				}
				SessionCmd::Editor {
					client_id,
					payload,
					reply,
				} => {
					let result = self.handle_editor(client_id, payload).await;
					let _ = reply.send(result);
				}
				SessionCmd::Extension {
					client_id,
					payload,
					reply,
				} => {
					let result = self.handle_extension(client_id, payload).await;
					let _ = reply.send(result);
				}
				SessionCmd::Sweep {
					terminal_timeout,
					editor_timeout,
					extension_timeout,
				} => {
					self.terminals.sweep(terminal_timeout);
					self.editors.sweep(editor_timeout);
					self.extensions.sweep(extension_timeout);
				}
			}
		}
	}

	fn handle_join(&mut self, client_id: ClientId) -> Result<Vec<ClientId>, SessionError> {
		if self.state == SessionState::Ended {
			return Err(SessionError::Ended);
		}
		if !self.participants.contains(&client_id) {
			self.participants.push(client_id);
		}
		self.last_activity = Utc::now();
		Ok(self.participants.clone())
	}

	/// Returns `true` if removing this participant destroyed the session
	/// (spec.md §3 invariant: "removing the last participant removes the
	/// session atomically").
	async fn handle_leave(&mut self, client_id: &ClientId) -> Result<bool, SessionError> {
		self.participants.retain(|c| c != client_id);
		self.terminals.remove_client_everywhere(client_id);
		self.editors.remove_client_everywhere(client_id);
		self.extensions.remove_client_everywhere(client_id);
		self.last_activity = Utc::now();

		let recipients = self.participants.clone();
		self.notifier
			.notify(
				&recipients,
				"session_participant_left",
				serde_json::json!({ "sessionId": self.session_id.as_str(), "participantId": client_id.as_str() }),
			)
			.await;

		Ok(self.participants.is_empty())
	}

	async fn handle_end(&mut self) -> Result<(), SessionError> {
		self.state = SessionState::Ended;
		let recipients: Vec<ClientId> = self.participants.drain(..).collect();
		self.notifier
			.notify(
				&recipients,
				"session_ended",
				serde_json::json!({ "sessionId": self.session_id.as_str() }),
			)
			.await;
		Ok(())
	}

	fn handle_pause(&mut self, client_id: ClientId) -> Result<(), SessionError> {
		if self.state == SessionState::Ended {
			return Err(SessionError::Ended);
		}
		if !self.participants.contains(&client_id) {
			return Err(SessionError::PermissionDenied);
		}
		self.state = SessionState::Paused;
		self.paused_at = Some(Utc::now());
		self.paused_by = Some(client_id);
		Ok(())
	}

	fn handle_resume(&mut self, client_id: ClientId) -> Result<(), SessionError> {
		if self.state == SessionState::Ended {
			return Err(SessionError::Ended);
		}
		if !self.participants.contains(&client_id) {
			return Err(SessionError::PermissionDenied);
		}
		self.state = SessionState::Active;
		self.paused_at = None;
		self.paused_by = None;
		Ok(())
	}

	async fn handle_terminal(
		&mut self,
		client_id: ClientId,
		payload: TerminalPayload,
	) -> Result<TerminalOutcome, ResourceError> {
		match payload.action {
			TerminalAction::Create => {
				let opts = TerminalOptions {
					name: payload.name,
					shell: payload.shell,
					cwd: payload.cwd,
					cols: payload.cols.unwrap_or(80),
					rows: payload.rows.unwrap_or(24),
					buffer_max_size: 0,
				};
				let terminal = self.terminals.create(client_id, &self.participants, opts);
				Ok(TerminalOutcome {
					terminal_id: terminal.terminal_id.clone(),
					buffer: Vec::new(),
				})
			}
			TerminalAction::Input => {
				let id = payload.terminal_id.ok_or(ResourceError::NotFound)?;
				let data = payload.data.unwrap_or_default();
				let recipients = self.terminals.process_input(&id, &client_id, data.clone())?;
				self.notifier
					.notify(
						&recipients,
						"terminal_input",
						serde_json::json!({ "terminalId": id.as_str(), "clientId": client_id.as_str(), "data": data }),
					)
					.await;
				Ok(TerminalOutcome {
					terminal_id: id,
					buffer: Vec::new(),
				})
			}
			TerminalAction::Output => {
				let id = payload.terminal_id.ok_or(ResourceError::NotFound)?;
				let data = payload.data.unwrap_or_default();
				let recipients = self.terminals.process_output(&id, data.clone())?;
				self.notifier
					.notify(
						&recipients,
						"terminal_output",
						serde_json::json!({ "terminalId": id.as_str(), "data": data }),
					)
					.await;
				Ok(TerminalOutcome {
					terminal_id: id,
					buffer: Vec::new(),
				})
			}
			TerminalAction::Resize => {
				let id = payload.terminal_id.ok_or(ResourceError::NotFound)?;
				let cols = payload.cols.unwrap_or(80);
				let rows = payload.rows.unwrap_or(24);
				let recipients = self.terminals.resize(&id, &client_id, cols, rows)?;
				self.notifier
					.notify(
						&recipients,
						"terminal_resized",
						serde_json::json!({ "terminalId": id.as_str(), "cols": cols, "rows": rows }),
					)
					.await;
				Ok(TerminalOutcome {
					terminal_id: id,
					buffer: Vec::new(),
				})
			}
			TerminalAction::Close => {
				let id = payload.terminal_id.ok_or(ResourceError::NotFound)?;
				self.terminals.close(&id, &client_id)?;
				Ok(TerminalOutcome {
					terminal_id: id,
					buffer: Vec::new(),
				})
			}
			TerminalAction::GetBuffer => {
				let id = payload.terminal_id.ok_or(ResourceError::NotFound)?;
				let buffer = self.terminals.get_buffer(&id, payload.limit.unwrap_or(100))?;
				Ok(TerminalOutcome {
					terminal_id: id,
					buffer,
				})
			}
		}
	}

	async fn handle_editor(
		&mut self,
		client_id: ClientId,
		payload: EditorPayload,
	) -> Result<EditorOutcome, ResourceError> {
		match payload.action {
			EditorAction::Register => {
				let file_path = payload.file_path.ok_or(ResourceError::NotFound)?;
				let editor = self.editors.register(client_id, file_path, payload.language);
				Ok(EditorOutcome {
					editor_id: editor.editor_id.clone(),
					version: editor.version,
					stale: false,
					content: Some(editor.content.clone()),
				})
			}
			EditorAction::UpdateContent => {
				let id = payload.editor_id.ok_or(ResourceError::NotFound)?;
				let content = payload.content.unwrap_or_default();
				let version = payload.version.unwrap_or(0);
				let outcome = self
					.editors
					.update_content(&id, &client_id, content.clone(), version)?;
				if outcome.accepted {
					self.notifier
						.notify(
							&outcome.recipients,
							"editor_changed",
							serde_json::json!({
								"editorId": id.as_str(),
								"clientId": client_id.as_str(),
								"version": outcome.version,
								"content": content,
							}),
						)
						.await;
				}
				Ok(EditorOutcome {
					editor_id: id,
					version: outcome.version,
					stale: !outcome.accepted,
					content: None,
				})
			}
			EditorAction::UpdateCursor => {
				let id = payload.editor_id.ok_or(ResourceError::NotFound)?;
				let cursor = Cursor {
					line: payload.line.unwrap_or(0),
					column: payload.column.unwrap_or(0),
				};
				let recipients = self.editors.update_cursor(&id, &client_id, cursor.clone())?;
				self.notifier
					.notify(
						&recipients,
						"cursor_moved",
						serde_json::json!({
							"editorId": id.as_str(),
							"clientId": client_id.as_str(),
							"line": cursor.line,
							"column": cursor.column,
						}),
					)
					.await;
				let version = self.editors.get(&id)?.version;
				Ok(EditorOutcome {
					editor_id: id,
					version,
					stale: false,
					content: None,
				})
			}
			EditorAction::UpdateSelections => {
				let id = payload.editor_id.ok_or(ResourceError::NotFound)?;
				let selections: Vec<SelectionRange> = payload.selections.unwrap_or_default();
				let recipients = self
					.editors
					.update_selections(&id, &client_id, selections)?;
				self.notifier
					.notify(
						&recipients,
						"selection_changed",
						serde_json::json!({ "editorId": id.as_str(), "clientId": client_id.as_str() }),
					)
					.await;
				Ok(EditorOutcome {
					editor_id: id,
					version: 0,
					stale: false,
					content: None,
				})
			}
			EditorAction::Close => {
				let id = payload.editor_id.ok_or(ResourceError::NotFound)?;
				let recipients = self.editors.close(&id, &client_id)?;
				self.notifier
					.notify(
						&recipients,
						"editor_closed",
						serde_json::json!({ "editorId": id.as_str() }),
					)
					.await;
				Ok(EditorOutcome {
					editor_id: id,
					version: 0,
					stale: false,
					content: None,
				})
			}
		}
	}

	async fn handle_extension(
		&mut self,
		client_id: ClientId,
		payload: ExtensionPayload,
	) -> Result<ExtensionOutcome, ResourceError> {
		match payload.action {
			ExtensionAction::Register => {
				let record = self.extensions.register(
					payload.extension_id.clone(),
					client_id,
					payload.state.unwrap_or_default(),
				);
				Ok(ExtensionOutcome {
					version: record.version,
					state: record.state.clone(),
				})
			}
			ExtensionAction::Update => {
				let version = payload.version.unwrap_or(0);
				let (new_version, recipients) = self.extensions.update(
					&payload.extension_id,
					&client_id,
					payload.state.unwrap_or_default(),
					version,
				)?;
				let state = self.extensions.get(&payload.extension_id)?.state.clone();
				self.notifier
					.notify(
						&recipients,
						"extension_state_changed",
						serde_json::json!({
							"extensionId": payload.extension_id.as_str(),
							"version": new_version,
							"state": state,
						}),
					)
					.await;
				Ok(ExtensionOutcome {
					version: new_version,
					state: self.extensions.get(&payload.extension_id)?.state.clone(),
				})
			}
			ExtensionAction::Reset => {
				let (new_version, recipients) = self.extensions.reset(
					&payload.extension_id,
					&client_id,
					payload.state.unwrap_or_default(),
				)?;
				let state = self.extensions.get(&payload.extension_id)?.state.clone();
				self.notifier
					.notify(
						&recipients,
						"extension_state_changed",
						serde_json::json!({
							"extensionId": payload.extension_id.as_str(),
							"version": new_version,
							"state": state,
						}),
					)
					.await;
				Ok(ExtensionOutcome {
					version: new_version,
					state: self.extensions.get(&payload.extension_id)?.state.clone(),
				})
			}
			ExtensionAction::Unregister => {
				self.extensions.unregister(&payload.extension_id, &client_id)?;
				Ok(ExtensionOutcome {
					version: 0,
					state: HashMap::new(),
				})
			}
		}
	}
}

/// Global session registry. Per spec.md §5, this map is protected by a
/// reader-preferring lock; sessions themselves are protected by their own
/// actor, not by holding this lock during mutation.
pub struct SessionManager {
	sessions: RwLock<HashMap<SessionId, SessionHandle>>,
	limits: SessionLimits,
	notifier: Arc<NotificationDispatcher>,
}

impl SessionManager {
	pub fn new(limits: SessionLimits, notifier: Arc<NotificationDispatcher>) -> Self {
		Self {
			sessions: RwLock::new(HashMap::new()),
			limits,
			notifier,
		}
	}

	pub async fn create(
		&self,
		session_id: Option<SessionId>,
		created_by: ClientId,
		workspace_id: Option<String>,
		name: Option<String>,
	) -> Result<SessionId, SessionError> {
		let session_id = session_id.unwrap_or_else(|| SessionId::new(format!("sess-{}", uuid::Uuid::new_v4())));

		let mut sessions = self.sessions.write().await;
		if sessions.contains_key(&session_id) {
			return Err(SessionError::AlreadyExists);
		}

		let handle = SessionActor::spawn(
			session_id.clone(),
			created_by,
			workspace_id,
			name,
			self.limits.clone(),
			self.notifier.clone(),
		);
		sessions.insert(session_id.clone(), handle);
		Ok(session_id)
	}

	pub async fn get(&self, session_id: &SessionId) -> Option<SessionHandle> {
		self.sessions.read().await.get(session_id).cloned()
	}

	pub async fn join(
		&self,
		session_id: &SessionId,
		client_id: ClientId,
	) -> Result<Vec<ClientId>, SessionError> {
		let handle = self.get(session_id).await.ok_or(SessionError::NotFound)?;
		handle.join(client_id).await
	}

	/// Leaves `session_id`; if this was the last participant the session is
	/// removed from the registry (spec.md §3: "removing the last participant
	/// removes the session atomically").
	pub async fn leave(
		&self,
		session_id: &SessionId,
		client_id: ClientId,
	) -> Result<bool, SessionError> {
		let handle = self.get(session_id).await.ok_or(SessionError::NotFound)?;
		let destroyed = handle.leave(client_id).await?;
		if destroyed {
			self.sessions.write().await.remove(session_id);
		}
		Ok(destroyed)
	}

	pub async fn end(&self, session_id: &SessionId) -> Result<(), SessionError> {
		let handle = self.get(session_id).await.ok_or(SessionError::NotFound)?;
		handle.end().await?;
		self.sessions.write().await.remove(session_id);
		Ok(())
	}

	pub async fn session_count(&self) -> usize {
		self.sessions.read().await.len()
	}

	/// Removes `client_id` from every session it belongs to (disconnect
	/// cleanup, spec.md §4.2), emitting `session_participant_left` for each
	/// and destroying any session that becomes empty.
	pub async fn remove_client_from_all(&self, client_id: &ClientId, session_ids: &[SessionId]) {
		for session_id in session_ids {
			match self.leave(session_id, client_id.clone()).await {
				Ok(_) => {}
				Err(err) => warn!(%session_id, ?err, "disconnect cleanup: session leave failed"),
			}
		}
	}

	/// Runs the periodic sweep over every live session's resource
	/// registries (spec.md §4.4 cleanup sweep).
	pub async fn sweep_all(
		&self,
		terminal_timeout: chrono::Duration,
		editor_timeout: chrono::Duration,
		extension_timeout: chrono::Duration,
	) {
		let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
		for handle in handles {
			handle
				.sweep(terminal_timeout, editor_timeout, extension_timeout)
				.await;
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use relay_proto::messages::{TerminalAction, TerminalPayload};

	use super::*;
	use crate::connection::ConnectionManager;

	fn limits() -> SessionLimits {
		SessionLimits {
			terminal_buffer_max_size: 100,
			editor_max_history_size: 50,
			extension_max_history_size: 20,
			resource_max_age: chrono::Duration::hours(1),
		}
	}

	fn manager() -> SessionManager {
		let connections = Arc::new(ConnectionManager::new(10, false, HashSet::new()));
		let notifier = Arc::new(NotificationDispatcher::new(connections));
		SessionManager::new(limits(), notifier)
	}

	#[tokio::test]
	async fn create_join_and_leave_destroys_when_empty() {
		let mgr = manager();
		let session_id = mgr
			.create(None, ClientId::new("alice"), None, None)
			.await
			.unwrap();

		let participants = mgr.join(&session_id, ClientId::new("bob")).await.unwrap();
		assert_eq!(participants.len(), 2);

		assert!(!mgr.leave(&session_id, ClientId::new("bob")).await.unwrap());
		assert!(mgr.leave(&session_id, ClientId::new("alice")).await.unwrap());
		assert!(mgr.get(&session_id).await.is_none());
	}

	#[tokio::test]
	async fn duplicate_session_id_rejected() {
		let mgr = manager();
		let id = SessionId::new("fixed");
		mgr.create(Some(id.clone()), ClientId::new("alice"), None, None)
			.await
			.unwrap();
		let err = mgr
			.create(Some(id), ClientId::new("bob"), None, None)
			.await
			.unwrap_err();
		assert_eq!(err, SessionError::AlreadyExists);
	}

	#[tokio::test]
	async fn pause_and_resume_require_participation() {
		let mgr = manager();
		let session_id = mgr
			.create(None, ClientId::new("alice"), None, None)
			.await
			.unwrap();
		let handle = mgr.get(&session_id).await.unwrap();

		let err = handle.pause(ClientId::new("eve")).await.unwrap_err();
		assert_eq!(err, SessionError::PermissionDenied);

		handle.pause(ClientId::new("alice")).await.unwrap();
		handle.resume(ClientId::new("alice")).await.unwrap();
	}

	#[tokio::test]
	async fn ended_session_rejects_further_mutation() {
		let mgr = manager();
		let session_id = mgr
			.create(None, ClientId::new("alice"), None, None)
			.await
			.unwrap();
		mgr.end(&session_id).await.unwrap();
		assert!(mgr.get(&session_id).await.is_none());
	}

	#[tokio::test]
	async fn terminal_create_then_input_round_trips_through_the_actor() {
		let mgr = manager();
		let session_id = mgr
			.create(None, ClientId::new("alice"), None, None)
			.await
			.unwrap();
		let handle = mgr.get(&session_id).await.unwrap();

		let created = handle
			.terminal(
				ClientId::new("alice"),
				TerminalPayload {
					action: TerminalAction::Create,
					session_id: Some(session_id.clone()),
					terminal_id: None,
					client_id: None,
					name: None,
					shell: None,
					cwd: None,
					cols: None,
					rows: None,
					data: None,
					limit: None,
				},
			)
			.await
			.unwrap();

		let outcome = handle
			.terminal(
				ClientId::new("alice"),
				TerminalPayload {
					action: TerminalAction::Input,
					session_id: Some(session_id),
					terminal_id: Some(created.terminal_id.clone()),
					client_id: None,
					name: None,
					shell: None,
					cwd: None,
					cols: None,
					rows: None,
					data: Some("ls\n".to_string()),
					limit: None,
				},
			)
			.await
			.unwrap();

		assert_eq!(outcome.terminal_id, created.terminal_id);
	}
}
