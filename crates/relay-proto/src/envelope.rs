//! Message envelope and the closed set of message types (spec.md §4.1, §6).

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorCode;

/// Closed set of wire message types.
///
/// Serializes to/from the exact lowercase-with-underscore strings listed in
/// spec.md §6. An unrecognized string fails deserialization, which the
/// codec turns into `UNKNOWN_MESSAGE_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
	Connection,
	ConnectionAck,
	Disconnect,
	DisconnectAck,
	Ping,
	Pong,
	Authenticate,
	AuthenticateAck,
	TokenRefresh,
	TokenRefreshAck,
	TokenValidate,
	TokenValidateAck,
	SessionCreate,
	SessionCreateAck,
	SessionJoin,
	SessionJoinAck,
	SessionLeave,
	SessionLeaveAck,
	SessionEnd,
	SessionEndAck,
	SessionPause,
	SessionPauseAck,
	SessionResume,
	SessionResumeAck,
	Terminal,
	Editor,
	Extension,
	Notification,
	ServerShutdown,
	Error,
	ClientInfo,
	ClientUpdate,
	ToolInvoke,
	ToolResponse,
}

impl MessageType {
	/// Parses a raw `type` string, returning `None` for anything outside the closed set.
	pub fn parse(raw: &str) -> Option<Self> {
		// serde_json round-trip keeps this in lockstep with the derive above
		// instead of hand-maintaining a second match arm list.
		serde_json::from_value(Value::String(raw.to_string())).ok()
	}

	/// The `"<type>_ack"` response type for a request type, when one exists.
	pub fn ack_type(self) -> Option<Self> {
		use MessageType::*;
		Some(match self {
			Connection => ConnectionAck,
			Disconnect => DisconnectAck,
			Authenticate => AuthenticateAck,
			TokenRefresh => TokenRefreshAck,
			TokenValidate => TokenValidateAck,
			SessionCreate => SessionCreateAck,
			SessionJoin => SessionJoinAck,
			SessionLeave => SessionLeaveAck,
			SessionEnd => SessionEndAck,
			SessionPause => SessionPauseAck,
			SessionResume => SessionResumeAck,
			_ => return None,
		})
	}
}

/// Current time formatted the way this protocol requires (§4.1): ISO-8601
/// with a trailing `Z` and millisecond fractional seconds.
pub fn now_iso8601() -> String {
	chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn timestamp_pattern() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| {
		Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z$")
			.expect("timestamp pattern is a fixed valid regex")
	})
}

/// Validates an ISO-8601 `Z` timestamp per spec.md §4.1.
pub fn is_valid_timestamp(s: &str) -> bool {
	timestamp_pattern().is_match(s)
}

/// A parsed, envelope-valid message, before payload-level validation.
///
/// This is the output of phase one of the two-phase validator described in
/// spec.md §4.1: the four envelope fields are present and well-typed, but
/// `payload` has not yet been matched against its type-specific schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
	#[serde(rename = "type")]
	pub message_type: MessageType,
	pub id: String,
	pub timestamp: String,
	pub payload: Value,
	#[serde(skip_serializing_if = "Option::is_none", rename = "responseTo")]
	pub response_to: Option<String>,
}

/// Failure of phase-one envelope validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnvelopeError {
	#[error("message is not a JSON object")]
	NotAnObject,
	#[error("missing required field `{0}`")]
	MissingField(&'static str),
	#[error("field `{0}` has the wrong type")]
	WrongFieldType(&'static str),
	#[error("unknown message type `{0}`")]
	UnknownType(String),
	#[error("timestamp `{0}` does not match the required ISO-8601 pattern")]
	InvalidTimestamp(String),
}

impl EnvelopeError {
	/// Maps this parse failure onto its wire error code.
	pub fn code(&self) -> ErrorCode {
		match self {
			EnvelopeError::NotAnObject | EnvelopeError::WrongFieldType(_) => {
				ErrorCode::InvalidMessageFormat
			}
			EnvelopeError::MissingField(_) => ErrorCode::MissingRequiredField,
			EnvelopeError::UnknownType(_) => ErrorCode::UnknownMessageType,
			EnvelopeError::InvalidTimestamp(_) => ErrorCode::InvalidFieldValue,
		}
	}
}

impl Envelope {
	/// Parses a raw JSON frame into an envelope, performing phase-one
	/// (structural) validation only. Payload schema validation is the
	/// caller's responsibility (see `crate::messages`).
	pub fn parse(raw: &[u8]) -> Result<Self, EnvelopeError> {
		let value: Value =
			serde_json::from_slice(raw).map_err(|_| EnvelopeError::NotAnObject)?;
		Self::from_value(value)
	}

	/// Same as [`Envelope::parse`] but starting from an already-decoded value.
	pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
		let obj = value.as_object().ok_or(EnvelopeError::NotAnObject)?;

		let type_raw = obj
			.get("type")
			.and_then(Value::as_str)
			.ok_or(EnvelopeError::MissingField("type"))?;
		if type_raw.is_empty() {
			return Err(EnvelopeError::MissingField("type"));
		}
		let message_type = MessageType::parse(type_raw)
			.ok_or_else(|| EnvelopeError::UnknownType(type_raw.to_string()))?;

		let id = obj
			.get("id")
			.and_then(Value::as_str)
			.ok_or(EnvelopeError::MissingField("id"))?;
		if id.is_empty() {
			return Err(EnvelopeError::MissingField("id"));
		}

		let timestamp = obj
			.get("timestamp")
			.and_then(Value::as_str)
			.ok_or(EnvelopeError::MissingField("timestamp"))?;
		if !is_valid_timestamp(timestamp) {
			return Err(EnvelopeError::InvalidTimestamp(timestamp.to_string()));
		}

		let payload = obj
			.get("payload")
			.cloned()
			.ok_or(EnvelopeError::MissingField("payload"))?;
		if !payload.is_object() {
			return Err(EnvelopeError::WrongFieldType("payload"));
		}

		let response_to = match obj.get("responseTo") {
			None | Some(Value::Null) => None,
			Some(Value::String(s)) => Some(s.clone()),
			Some(_) => return Err(EnvelopeError::WrongFieldType("responseTo")),
		};

		Ok(Envelope {
			message_type,
			id: id.to_string(),
			timestamp: timestamp.to_string(),
			payload,
			response_to,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_well_formed_envelope() {
		let raw = br#"{"type":"ping","id":"r1","timestamp":"2026-07-27T10:00:00Z","payload":{}}"#;
		let env = Envelope::parse(raw).unwrap();
		assert_eq!(env.message_type, MessageType::Ping);
		assert_eq!(env.id, "r1");
		assert!(env.response_to.is_none());
	}

	#[test]
	fn rejects_unknown_type() {
		let raw = br#"{"type":"frobnicate","id":"r1","timestamp":"2026-07-27T10:00:00Z","payload":{}}"#;
		let err = Envelope::parse(raw).unwrap_err();
		assert_eq!(err.code(), ErrorCode::UnknownMessageType);
	}

	#[test]
	fn rejects_missing_id() {
		let raw = br#"{"type":"ping","timestamp":"2026-07-27T10:00:00Z","payload":{}}"#;
		let err = Envelope::parse(raw).unwrap_err();
		assert_eq!(err.code(), ErrorCode::MissingRequiredField);
	}

	#[test]
	fn rejects_bad_timestamp() {
		let raw = br#"{"type":"ping","id":"r1","timestamp":"not-a-time","payload":{}}"#;
		let err = Envelope::parse(raw).unwrap_err();
		assert_eq!(err.code(), ErrorCode::InvalidFieldValue);
	}

	#[test]
	fn accepts_fractional_seconds() {
		assert!(is_valid_timestamp("2026-07-27T10:00:00.123Z"));
		assert!(is_valid_timestamp("2026-07-27T10:00:00Z"));
		assert!(!is_valid_timestamp("2026-07-27T10:00:00"));
		assert!(!is_valid_timestamp("2026-07-27 10:00:00Z"));
	}

	#[test]
	fn now_iso8601_matches_own_pattern() {
		assert!(is_valid_timestamp(&now_iso8601()));
	}

	#[test]
	fn ack_type_only_defined_for_requests() {
		assert_eq!(MessageType::Ping.ack_type(), None);
		assert_eq!(
			MessageType::SessionCreate.ack_type(),
			Some(MessageType::SessionCreateAck)
		);
	}
}
