//! Wire types for the Relay MCP collaboration protocol.
//!
//! This crate owns everything in the external-interfaces section of the
//! protocol: the message envelope, the closed set of message types, the
//! per-type payload records, the identity newtypes, and the error-code
//! taxonomy. It has no knowledge of transport, authentication policy, or
//! collaboration state — those live in `relay-core`.

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod messages;

pub use envelope::{now_iso8601, Envelope, EnvelopeError, MessageType};
pub use errors::{ErrorCategory, ErrorCode, ErrorPayload};
pub use ids::{ClientId, EditorId, ExtensionId, RequestId, ServerId, SessionId, TerminalId};
