//! Extension Manager (spec.md §3 ExtensionState, §4.4).
//!
//! Simpler than the Editor Manager: no path uniqueness, `state` is a shallow
//! map merged on update, and `reset` replaces it wholesale. Per the resolved
//! Open Question in spec.md §9, every `ExtensionState` is scoped to
//! `(sessionId, extensionId)` — there is no global/cross-session registry.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use relay_proto::{ClientId, ExtensionId};
use serde_json::Value;

use crate::resource::{ResourceError, ResourceState, RingBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
	Update,
	Reset,
}

#[derive(Debug, Clone)]
pub struct ExtensionHistoryEntry {
	pub client_id: ClientId,
	pub timestamp: DateTime<Utc>,
	pub version: u64,
	pub kind: HistoryKind,
}

#[derive(Debug, Clone)]
pub struct ExtensionState {
	pub extension_id: ExtensionId,
	pub registered_by: ClientId,
	pub state: HashMap<String, Value>,
	pub version: u64,
	pub history: RingBuffer<ExtensionHistoryEntry>,
	pub clients: HashSet<ClientId>,
	pub resource_state: ResourceState,
	pub last_activity: DateTime<Utc>,
}

pub struct ExtensionRegistry {
	extensions: HashMap<ExtensionId, ExtensionState>,
	max_history_size: usize,
	max_age: chrono::Duration,
}

impl ExtensionRegistry {
	pub fn new(max_history_size: usize, max_age: chrono::Duration) -> Self {
		Self {
			extensions: HashMap::new(),
			max_history_size,
			max_age,
		}
	}

	/// First `register` creates the record; later calls (by other clients)
	/// just add them as a client of the existing record.
	pub fn register(
		&mut self,
		extension_id: ExtensionId,
		client_id: ClientId,
		initial_state: HashMap<String, Value>,
	) -> &ExtensionState {
		if self.extensions.contains_key(&extension_id) {
			let entry = self.extensions.get_mut(&extension_id).expect("checked");
			entry.clients.insert(client_id);
			return self.extensions.get(&extension_id).expect("checked");
		}

		let now = Utc::now();
		let record = ExtensionState {
			extension_id: extension_id.clone(),
			registered_by: client_id.clone(),
			state: initial_state,
			version: 1,
			history: RingBuffer::new(self.max_history_size.max(1)),
			clients: HashSet::from([client_id]),
			resource_state: ResourceState::Active,
			last_activity: now,
		};
		self.extensions.insert(extension_id.clone(), record);
		self.extensions.get(&extension_id).expect("just inserted")
	}

	pub fn get(&self, id: &ExtensionId) -> Result<&ExtensionState, ResourceError> {
		self.extensions.get(id).ok_or(ResourceError::NotFound)
	}

	fn require_client(record: &ExtensionState, client_id: &ClientId) -> Result<(), ResourceError> {
		if record.resource_state == ResourceState::Closed {
			return Err(ResourceError::Conflict);
		}
		if !record.clients.contains(client_id) {
			return Err(ResourceError::PermissionDenied);
		}
		Ok(())
	}

	/// Shallow-merges `patch` into the stored state iff `version >= current`,
	/// otherwise rejected (unlike editor content, extension updates with a
	/// stale version are a hard `RESOURCE_CONFLICT`, not a silent no-op —
	/// extension state has no single well-ordered byte stream to reconcile
	/// against, so silently dropping a caller's patch would lose data with
	/// no echo for them to act on).
	pub fn update(
		&mut self,
		id: &ExtensionId,
		client_id: &ClientId,
		patch: HashMap<String, Value>,
		version: u64,
	) -> Result<(u64, Vec<ClientId>), ResourceError> {
		let record = self.extensions.get_mut(id).ok_or(ResourceError::NotFound)?;
		Self::require_client(record, client_id)?;
		if version < record.version {
			return Err(ResourceError::Conflict);
		}

		for (k, v) in patch {
			record.state.insert(k, v);
		}
		record.version += 1;
		record.history.push(ExtensionHistoryEntry {
			client_id: client_id.clone(),
			timestamp: Utc::now(),
			version: record.version,
			kind: HistoryKind::Update,
		});
		record.last_activity = Utc::now();

		Ok((
			record.version,
			record
				.clients
				.iter()
				.filter(|c| *c != client_id)
				.cloned()
				.collect(),
		))
	}

	pub fn reset(
		&mut self,
		id: &ExtensionId,
		client_id: &ClientId,
		new_state: HashMap<String, Value>,
	) -> Result<(u64, Vec<ClientId>), ResourceError> {
		let record = self.extensions.get_mut(id).ok_or(ResourceError::NotFound)?;
		Self::require_client(record, client_id)?;

		record.state = new_state;
		record.version += 1;
		record.history.push(ExtensionHistoryEntry {
			client_id: client_id.clone(),
			timestamp: Utc::now(),
			version: record.version,
			kind: HistoryKind::Reset,
		});
		record.last_activity = Utc::now();

		Ok((
			record.version,
			record
				.clients
				.iter()
				.filter(|c| *c != client_id)
				.cloned()
				.collect(),
		))
	}

	/// Unregisters `client_id`; removes the record entirely once it was the
	/// last client.
	pub fn unregister(&mut self, id: &ExtensionId, client_id: &ClientId) -> Result<(), ResourceError> {
		let record = self.extensions.get_mut(id).ok_or(ResourceError::NotFound)?;
		record.clients.remove(client_id);
		if record.clients.is_empty() {
			self.extensions.remove(id);
		}
		Ok(())
	}

	pub fn remove_client_everywhere(&mut self, client_id: &ClientId) {
		let ids: Vec<ExtensionId> = self.extensions.keys().cloned().collect();
		for id in ids {
			let _ = self.unregister(&id, client_id);
		}
	}

	pub fn sweep(&mut self, inactivity_timeout: chrono::Duration) {
		let now = Utc::now();
		let max_age = self.max_age;
		for record in self.extensions.values_mut() {
			if record.resource_state == ResourceState::Active
				&& now - record.last_activity > inactivity_timeout
			{
				record.resource_state = ResourceState::Closed;
				record.last_activity = now;
			}
		}
		self.extensions.retain(|_, r| {
			!(r.resource_state == ResourceState::Closed && now - r.last_activity > max_age)
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(s: &str) -> ExtensionId {
		ExtensionId::new(s)
	}

	#[test]
	fn register_twice_adds_client_not_duplicate_record() {
		let mut reg = ExtensionRegistry::new(20, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		let b = ClientId::new("b");
		reg.register(id("ext1"), a, HashMap::new());
		reg.register(id("ext1"), b, HashMap::new());
		assert_eq!(reg.get(&id("ext1")).unwrap().clients.len(), 2);
	}

	#[test]
	fn update_merges_shallowly() {
		let mut reg = ExtensionRegistry::new(20, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		reg.register(
			id("ext1"),
			a.clone(),
			HashMap::from([("x".to_string(), Value::from(1))]),
		);
		reg.update(
			&id("ext1"),
			&a,
			HashMap::from([("y".to_string(), Value::from(2))]),
			1,
		)
		.unwrap();
		let state = &reg.get(&id("ext1")).unwrap().state;
		assert_eq!(state.get("x"), Some(&Value::from(1)));
		assert_eq!(state.get("y"), Some(&Value::from(2)));
	}

	#[test]
	fn stale_version_rejected() {
		let mut reg = ExtensionRegistry::new(20, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		reg.register(id("ext1"), a.clone(), HashMap::new());
		reg.update(&id("ext1"), &a, HashMap::new(), 1).unwrap();
		let err = reg.update(&id("ext1"), &a, HashMap::new(), 1).unwrap_err();
		assert_eq!(err, ResourceError::Conflict);
	}

	#[test]
	fn unregister_last_client_removes_record() {
		let mut reg = ExtensionRegistry::new(20, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		reg.register(id("ext1"), a.clone(), HashMap::new());
		reg.unregister(&id("ext1"), &a).unwrap();
		assert_eq!(reg.get(&id("ext1")).unwrap_err(), ResourceError::NotFound);
	}
}
