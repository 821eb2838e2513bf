//! Wire error taxonomy (spec.md §6, §7).

use serde::{Deserialize, Serialize};

/// Closed set of wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	InvalidMessageFormat,
	UnknownMessageType,
	MissingRequiredField,
	InvalidFieldValue,
	AuthFailed,
	AuthExpired,
	AuthRequired,
	ClientNotAuthenticated,
	SessionNotFound,
	SessionAlreadyExists,
	SessionJoinRejected,
	SessionFull,
	ResourceNotFound,
	ResourceLocked,
	ResourceLimitExceeded,
	ResourceConflict,
	ServerError,
	ServerOverloaded,
	ServerMaintenance,
	ServerShuttingDown,
	ClientTimeout,
	ClientRateLimited,
	ClientVersionUnsupported,
	MaxClientsReached,
	ClientIdInUse,
	PermissionDenied,
}

/// Top-level error category used for classification and recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorCategory {
	Protocol,
	Auth,
	Session,
	Resource,
	Server,
	Client,
}

impl ErrorCode {
	/// The category this code belongs to.
	pub fn category(self) -> ErrorCategory {
		use ErrorCategory::*;
		use ErrorCode::*;
		match self {
			InvalidMessageFormat | UnknownMessageType | MissingRequiredField
			| InvalidFieldValue => Protocol,
			AuthFailed | AuthExpired | AuthRequired | ClientNotAuthenticated => Auth,
			SessionNotFound | SessionAlreadyExists | SessionJoinRejected | SessionFull => Session,
			ResourceNotFound | ResourceLocked | ResourceLimitExceeded | ResourceConflict => {
				Resource
			}
			ServerError | ServerOverloaded | ServerMaintenance | ServerShuttingDown => Server,
			ClientTimeout | ClientRateLimited | ClientVersionUnsupported | MaxClientsReached
			| ClientIdInUse | PermissionDenied => Client,
		}
	}

	/// Whether a client may usefully retry the same request unmodified.
	///
	/// Mirrors spec.md §6: every PROTOCOL code and `CLIENT_TIMEOUT`,
	/// `RESOURCE_LOCKED`, `SESSION_NOT_FOUND`, `RESOURCE_NOT_FOUND`,
	/// `SERVER_ERROR`, `SERVER_OVERLOADED`, `CLIENT_RATE_LIMITED` are
	/// retryable; every AUTH code and `SERVER_MAINTENANCE`,
	/// `SERVER_SHUTTING_DOWN`, `SESSION_FULL`, `CLIENT_VERSION_UNSUPPORTED`,
	/// `RESOURCE_LIMIT_EXCEEDED`, `RESOURCE_CONFLICT` are not.
	pub fn retryable(self) -> bool {
		use ErrorCode::*;
		match self.category() {
			ErrorCategory::Protocol => true,
			ErrorCategory::Auth => false,
			_ => matches!(
				self,
				ClientTimeout
					| ResourceLocked | SessionNotFound
					| ResourceNotFound | ServerError
					| ServerOverloaded | ClientRateLimited
			),
		}
	}

	/// Advisory machine-readable code string sent on the wire.
	pub fn as_str(self) -> &'static str {
		use ErrorCode::*;
		match self {
			InvalidMessageFormat => "INVALID_MESSAGE_FORMAT",
			UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
			MissingRequiredField => "MISSING_REQUIRED_FIELD",
			InvalidFieldValue => "INVALID_FIELD_VALUE",
			AuthFailed => "AUTH_FAILED",
			AuthExpired => "AUTH_EXPIRED",
			AuthRequired => "AUTH_REQUIRED",
			ClientNotAuthenticated => "CLIENT_NOT_AUTHENTICATED",
			SessionNotFound => "SESSION_NOT_FOUND",
			SessionAlreadyExists => "SESSION_ALREADY_EXISTS",
			SessionJoinRejected => "SESSION_JOIN_REJECTED",
			SessionFull => "SESSION_FULL",
			ResourceNotFound => "RESOURCE_NOT_FOUND",
			ResourceLocked => "RESOURCE_LOCKED",
			ResourceLimitExceeded => "RESOURCE_LIMIT_EXCEEDED",
			ResourceConflict => "RESOURCE_CONFLICT",
			ServerError => "SERVER_ERROR",
			ServerOverloaded => "SERVER_OVERLOADED",
			ServerMaintenance => "SERVER_MAINTENANCE",
			ServerShuttingDown => "SERVER_SHUTTING_DOWN",
			ClientTimeout => "CLIENT_TIMEOUT",
			ClientRateLimited => "CLIENT_RATE_LIMITED",
			ClientVersionUnsupported => "CLIENT_VERSION_UNSUPPORTED",
			MaxClientsReached => "MAX_CLIENTS_REACHED",
			ClientIdInUse => "CLIENT_ID_IN_USE",
			PermissionDenied => "PERMISSION_DENIED",
		}
	}

	/// Advisory human-readable recovery action for this code.
	pub fn recovery_action(self) -> &'static str {
		use ErrorCode::*;
		match self {
			InvalidMessageFormat | MissingRequiredField | InvalidFieldValue => {
				"fix the message shape and resend"
			}
			UnknownMessageType => "upgrade the client to a supported protocol version",
			AuthFailed => "re-authenticate with valid credentials",
			AuthExpired => "call token_refresh and retry",
			AuthRequired | ClientNotAuthenticated => "authenticate before retrying",
			SessionNotFound => "create or join a valid session",
			SessionAlreadyExists => "use session_join instead of session_create",
			SessionJoinRejected | SessionFull => "choose a different session",
			ResourceNotFound => "re-create the resource or refresh session state",
			ResourceLocked => "retry shortly",
			ResourceLimitExceeded => "reduce payload size or request rate",
			ResourceConflict => "refresh resource state before retrying",
			ServerError | ServerOverloaded => "retry with backoff",
			ServerMaintenance | ServerShuttingDown => "reconnect later",
			ClientTimeout => "retry the request",
			ClientRateLimited => "slow down and retry with backoff",
			ClientVersionUnsupported => "upgrade the client",
			MaxClientsReached => "retry later or contact the operator",
			ClientIdInUse => "choose a different clientId",
			PermissionDenied => "join the session as a participant before mutating it",
		}
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// Payload of a `type: "error"` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
	pub code: ErrorCode,
	pub message: String,
	/// `id` of the request this error relates to, if any.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub related_to: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub fatal: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub category: Option<ErrorCategory>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub recovery_action: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

impl ErrorPayload {
	/// Builds a fully-populated error payload for `code`, related to request `related_to`.
	pub fn new(code: ErrorCode, message: impl Into<String>, related_to: Option<String>) -> Self {
		Self {
			code,
			message: message.into(),
			related_to,
			fatal: Some(false),
			category: Some(code.category()),
			recovery_action: Some(code.recovery_action().to_string()),
			details: None,
		}
	}

	/// Marks this error as fatal, requiring synchronous delivery (spec.md §5 backpressure).
	pub fn fatal(mut self) -> Self {
		self.fatal = Some(true);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retryable_matches_spec_table() {
		assert!(ErrorCode::InvalidMessageFormat.retryable());
		assert!(ErrorCode::ClientTimeout.retryable());
		assert!(ErrorCode::ResourceLocked.retryable());
		assert!(ErrorCode::SessionNotFound.retryable());
		assert!(ErrorCode::ResourceNotFound.retryable());
		assert!(ErrorCode::ServerError.retryable());
		assert!(ErrorCode::ServerOverloaded.retryable());
		assert!(ErrorCode::ClientRateLimited.retryable());

		assert!(!ErrorCode::AuthFailed.retryable());
		assert!(!ErrorCode::AuthExpired.retryable());
		assert!(!ErrorCode::ServerMaintenance.retryable());
		assert!(!ErrorCode::ServerShuttingDown.retryable());
		assert!(!ErrorCode::SessionFull.retryable());
		assert!(!ErrorCode::ClientVersionUnsupported.retryable());
		assert!(!ErrorCode::ResourceLimitExceeded.retryable());
		assert!(!ErrorCode::ResourceConflict.retryable());
	}

	#[test]
	fn categories_are_consistent() {
		assert_eq!(ErrorCode::AuthFailed.category(), ErrorCategory::Auth);
		assert_eq!(ErrorCode::SessionFull.category(), ErrorCategory::Session);
		assert_eq!(
			ErrorCode::ResourceConflict.category(),
			ErrorCategory::Resource
		);
	}
}
