//! Tool invocation surface (spec.md §4.9).
//!
//! The collaboration core ships no tools of its own; it only defines the
//! seam a host binary plugs concrete tools into. `relay-server` wires a
//! `NullToolRegistry` by default, matching spec.md's explicit Non-goal
//! scoping real tool execution out of this layer.

use async_trait::async_trait;
use relay_proto::ErrorCode;
use serde_json::Value;

#[async_trait]
pub trait ToolInvoker: Send + Sync {
	async fn invoke(&self, name: &str, args: Value) -> Result<Value, ErrorCode>;
}

/// Default registry: every `tool_invoke` fails with `RESOURCE_NOT_FOUND`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullToolRegistry;

#[async_trait]
impl ToolInvoker for NullToolRegistry {
	async fn invoke(&self, _name: &str, _args: Value) -> Result<Value, ErrorCode> {
		Err(ErrorCode::ResourceNotFound)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn null_registry_rejects_every_tool() {
		let registry = NullToolRegistry;
		let err = registry
			.invoke("anything", Value::Null)
			.await
			.unwrap_err();
		assert_eq!(err, ErrorCode::ResourceNotFound);
	}
}
