//! Notification Dispatcher (spec.md §4.5).
//!
//! Delivery is best-effort: a failed send to one participant is logged and
//! does not abort the rest of the fan-out, mirroring the teacher's
//! `SessionService::broadcast`, which collects per-recipient failures
//! without aborting the loop.

use std::sync::Arc;

use relay_proto::{now_iso8601, ClientId, Envelope, MessageType};
use serde_json::Value;
use tracing::warn;

use crate::connection::ConnectionManager;

/// Thin fan-out helper over the Connection Manager. Holds no state of its
/// own; every method is a pure function of its arguments plus the shared
/// connection registry.
pub struct NotificationDispatcher {
	connections: Arc<ConnectionManager>,
}

impl NotificationDispatcher {
	pub fn new(connections: Arc<ConnectionManager>) -> Self {
		Self { connections }
	}

	fn build(event_type: &str, data: Value) -> Envelope {
		Envelope {
			message_type: MessageType::Notification,
			id: format!("ntf-{}", uuid::Uuid::new_v4()),
			timestamp: now_iso8601(),
			payload: serde_json::json!({ "eventType": event_type, "data": data }),
			response_to: None,
		}
	}

	/// Best-effort delivery of one notification to a precomputed recipient
	/// list (the session actor has already resolved participants minus any
	/// exclusion and released its own state before calling this).
	pub async fn notify(&self, recipients: &[ClientId], event_type: &str, data: Value) {
		let envelope = Self::build(event_type, data);
		for recipient in recipients {
			if !self.connections.try_send(recipient, envelope.clone()).await {
				warn!(client_id = %recipient, event_type, "dropped notification: outbound queue full or client gone");
			}
		}
	}

	/// Delivers a single fatal/synchronous message (e.g. `server_shutdown`,
	/// or an `error` with `fatal = true`) which must not be dropped under
	/// backpressure (spec.md §5).
	pub async fn notify_fatal(&self, recipient: &ClientId, envelope: Envelope) -> bool {
		self.connections.send_fatal(recipient, envelope).await
	}
}
