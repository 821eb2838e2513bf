//! Per-type payload records (spec.md §4.1, §6).
//!
//! Each payload is a plain `serde` struct. The router matches on
//! [`crate::envelope::MessageType`] and deserializes `Envelope::payload` into
//! the matching struct; unknown/extra fields are ignored, missing required
//! fields surface as `MISSING_REQUIRED_FIELD` at the `serde_json::from_value`
//! call site.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ClientId, EditorId, ExtensionId, SessionId, TerminalId};

// ---------------------------------------------------------------------
// Connection / ping
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPayload {
	pub client_id: ClientId,
	#[serde(default)]
	pub workspace_id: Option<String>,
	#[serde(default)]
	pub capabilities: HashSet<String>,
	#[serde(default)]
	pub metadata: HashMap<String, Value>,
	#[serde(default)]
	pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
	Connected,
	Rejected,
	Pending,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAckPayload {
	pub status: ConnectionStatus,
	pub server_time: String,
	pub connected_clients: usize,
	pub auth_required: bool,
	pub server_capabilities: HashSet<String>,
	pub session_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
	#[serde(default)]
	pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectAckPayload {
	pub acknowledged: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
	#[serde(default)]
	pub client_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
	pub server_time: String,
	pub client_time: Option<String>,
	pub connected_clients: usize,
}

// ---------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
	Token,
	Oauth,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePayload {
	pub token: String,
	pub auth_method: AuthMethod,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateAckPayload {
	pub authenticated: bool,
	pub permissions: HashSet<String>,
	pub token_valid_until: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshPayload {
	pub refresh_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRefreshStatus {
	Accepted,
	Rejected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshAckPayload {
	pub status: TokenRefreshStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub token_valid_until: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValidatePayload {
	#[serde(default)]
	pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValidateAckPayload {
	pub valid: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<String>,
}

// ---------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatePayload {
	#[serde(default)]
	pub session_id: Option<SessionId>,
	pub created_by: ClientId,
	#[serde(default)]
	pub workspace_id: Option<String>,
	#[serde(default)]
	pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCreateStatus {
	Created,
	Rejected,
	Pending,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreateAckPayload {
	pub status: SessionCreateStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionJoinPayload {
	pub session_id: SessionId,
	pub client_id: ClientId,
	#[serde(default)]
	pub workspace_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionJoinStatus {
	Joined,
	Rejected,
	Pending,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionJoinAckPayload {
	pub status: SessionJoinStatus,
	pub participants: Vec<ClientId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLeavePayload {
	pub session_id: SessionId,
	pub client_id: ClientId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLeaveAckPayload {
	pub left: bool,
	pub session_destroyed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndPayload {
	pub session_id: SessionId,
	#[serde(default)]
	pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndAckPayload {
	pub ended: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPausePayload {
	pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPauseAckPayload {
	pub paused: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumePayload {
	pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumeAckPayload {
	pub resumed: bool,
}

/// Notification payload for `session_participant_joined` / `_left`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParticipantEventPayload {
	pub session_id: SessionId,
	pub participant_id: ClientId,
}

// ---------------------------------------------------------------------
// Terminal (the `terminal` message type multiplexes sub-actions)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalAction {
	Create,
	Input,
	Output,
	Resize,
	Close,
	GetBuffer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalPayload {
	pub action: TerminalAction,
	#[serde(default)]
	pub session_id: Option<SessionId>,
	#[serde(default)]
	pub terminal_id: Option<TerminalId>,
	#[serde(default)]
	pub client_id: Option<ClientId>,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub shell: Option<String>,
	#[serde(default)]
	pub cwd: Option<String>,
	#[serde(default)]
	pub cols: Option<u16>,
	#[serde(default)]
	pub rows: Option<u16>,
	#[serde(default)]
	pub data: Option<String>,
	#[serde(default)]
	pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalBufferEntry {
	pub kind: TerminalBufferKind,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub client_id: Option<ClientId>,
	pub data: String,
	pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalBufferKind {
	Input,
	Output,
}

// ---------------------------------------------------------------------
// Editor
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorAction {
	Register,
	UpdateContent,
	UpdateCursor,
	UpdateSelections,
	Close,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorPayload {
	pub action: EditorAction,
	#[serde(default)]
	pub session_id: Option<SessionId>,
	#[serde(default)]
	pub editor_id: Option<EditorId>,
	#[serde(default)]
	pub client_id: Option<ClientId>,
	#[serde(default)]
	pub file_path: Option<String>,
	#[serde(default)]
	pub language: Option<String>,
	#[serde(default)]
	pub content: Option<String>,
	#[serde(default)]
	pub version: Option<u64>,
	#[serde(default)]
	pub line: Option<u32>,
	#[serde(default)]
	pub column: Option<u32>,
	#[serde(default)]
	pub selections: Option<Vec<SelectionRange>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRange {
	pub start_line: u32,
	pub start_column: u32,
	pub end_line: u32,
	pub end_column: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorChangedPayload {
	pub editor_id: EditorId,
	pub client_id: ClientId,
	pub version: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	/// True when this acknowledges a caller whose `version` was stale; the
	/// mutation was a silent no-op and `version` is the server's current one.
	pub stale: bool,
}

// ---------------------------------------------------------------------
// Extension
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionAction {
	Register,
	Update,
	Reset,
	Unregister,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionPayload {
	pub action: ExtensionAction,
	pub session_id: SessionId,
	pub extension_id: ExtensionId,
	#[serde(default)]
	pub client_id: Option<ClientId>,
	#[serde(default)]
	pub state: Option<HashMap<String, Value>>,
	#[serde(default)]
	pub version: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStateChangedPayload {
	pub extension_id: ExtensionId,
	pub version: u64,
	pub state: HashMap<String, Value>,
}

// ---------------------------------------------------------------------
// client_info / client_update (§4.10)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfoPayload {
	pub client_id: ClientId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfoAckPayload {
	pub client_id: ClientId,
	pub capabilities: HashSet<String>,
	pub metadata: HashMap<String, Value>,
	pub authenticated: bool,
	pub joined_sessions: Vec<SessionId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUpdatePayload {
	pub client_id: ClientId,
	#[serde(default)]
	pub capabilities: Option<HashSet<String>>,
	#[serde(default)]
	pub metadata: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUpdateAckPayload {
	pub updated: bool,
}

// ---------------------------------------------------------------------
// Tool invocation (§4.9)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvokePayload {
	pub name: String,
	#[serde(default)]
	pub args: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponsePayload {
	pub name: String,
	pub result: Value,
}

// ---------------------------------------------------------------------
// Notification envelope wrapper
// ---------------------------------------------------------------------

/// Payload of a generic `type: "notification"` message; `eventType`
/// discriminates among the kinds listed in spec.md §4.5.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
	pub event_type: String,
	pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerShutdownPayload {
	pub reason: String,
	pub time: String,
	pub planned_restart: bool,
	pub estimated_downtime: u64,
}
