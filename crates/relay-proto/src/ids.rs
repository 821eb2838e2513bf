//! Identity newtypes shared across the wire protocol.
//!
//! Client, session and request identities are caller-chosen strings (the
//! transport layer has no notion of a numeric handle); resource identities
//! within a session are server-generated.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub String);

		impl $name {
			/// Wraps a raw string as this identity type.
			pub fn new(id: impl Into<String>) -> Self {
				Self(id.into())
			}

			/// Borrows the underlying string.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<String> for $name {
			fn from(s: String) -> Self {
				Self(s)
			}
		}

		impl From<&str> for $name {
			fn from(s: &str) -> Self {
				Self(s.to_string())
			}
		}
	};
}

string_id!(ClientId, "Caller-chosen identity of a connected client.");
string_id!(SessionId, "Identity of a collaborative session.");
string_id!(RequestId, "Caller-chosen identity of a request/response pair.");
string_id!(TerminalId, "Server-generated identity of a shared terminal.");
string_id!(EditorId, "Server-generated identity of a shared editor.");
string_id!(ExtensionId, "Caller-chosen identity of an extension state blob.");
string_id!(ServerId, "Identity of a token-bearing upstream server.");
