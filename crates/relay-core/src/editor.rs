//! Editor Manager (spec.md §3 SharedEditor, §4.4).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use relay_proto::messages::SelectionRange;
use relay_proto::{ClientId, EditorId};

use crate::resource::{ResourceError, ResourceState, RingBuffer};

#[derive(Debug, Clone)]
pub struct Cursor {
	pub line: u32,
	pub column: u32,
}

#[derive(Debug, Clone)]
pub struct ChangeHistoryEntry {
	pub client_id: ClientId,
	pub timestamp: DateTime<Utc>,
	pub version: u64,
	pub old_content: String,
	pub new_content: String,
}

#[derive(Debug, Clone)]
pub struct SharedEditor {
	pub editor_id: EditorId,
	pub file_path: String,
	pub registered_by: ClientId,
	pub language: Option<String>,
	pub participants: HashSet<ClientId>,
	pub content: String,
	pub version: u64,
	pub cursors: HashMap<ClientId, Cursor>,
	pub selections: HashMap<ClientId, Vec<SelectionRange>>,
	pub change_history: RingBuffer<ChangeHistoryEntry>,
	pub state: ResourceState,
	pub last_activity: DateTime<Utc>,
}

/// Outcome of `update_content`: whether the caller's version was accepted or
/// was a stale no-op (spec.md §9 Open Question #3: silent no-op, never an
/// error, echoing the server's current version).
pub struct UpdateOutcome {
	pub accepted: bool,
	pub version: u64,
	pub recipients: Vec<ClientId>,
}

pub struct EditorRegistry {
	editors: HashMap<EditorId, SharedEditor>,
	by_path: HashMap<String, EditorId>,
	next_ordinal: u64,
	max_history_size: usize,
	max_age: chrono::Duration,
}

fn infer_language(file_path: &str) -> Option<String> {
	let ext = file_path.rsplit('.').next()?;
	let lang = match ext {
		"rs" => "rust",
		"ts" => "typescript",
		"tsx" => "typescriptreact",
		"js" => "javascript",
		"jsx" => "javascriptreact",
		"py" => "python",
		"go" => "go",
		"json" => "json",
		"toml" => "toml",
		"md" => "markdown",
		"yaml" | "yml" => "yaml",
		_ => return None,
	};
	Some(lang.to_string())
}

impl EditorRegistry {
	pub fn new(max_history_size: usize, max_age: chrono::Duration) -> Self {
		Self {
			editors: HashMap::new(),
			by_path: HashMap::new(),
			next_ordinal: 0,
			max_history_size,
			max_age,
		}
	}

	/// Idempotent on `(sessionId, filePath)`: a second registration by a
	/// different client just joins it to the existing editor's participants
	/// (spec.md §4.4, §8 idempotence law).
	pub fn register(
		&mut self,
		client_id: ClientId,
		file_path: String,
		language: Option<String>,
	) -> &SharedEditor {
		if let Some(existing_id) = self.by_path.get(&file_path).cloned() {
			let editor = self.editors.get_mut(&existing_id).expect("indexed");
			editor.participants.insert(client_id);
			return self.editors.get(&existing_id).expect("indexed");
		}

		self.next_ordinal += 1;
		let editor_id = EditorId::new(format!("editor-{}", self.next_ordinal));
		let language = language.or_else(|| infer_language(&file_path));
		let now = Utc::now();
		let editor = SharedEditor {
			editor_id: editor_id.clone(),
			file_path: file_path.clone(),
			registered_by: client_id.clone(),
			language,
			participants: HashSet::from([client_id]),
			content: String::new(),
			version: 1,
			cursors: HashMap::new(),
			selections: HashMap::new(),
			change_history: RingBuffer::new(self.max_history_size.max(1)),
			state: ResourceState::Active,
			last_activity: now,
		};
		self.editors.insert(editor_id.clone(), editor);
		self.by_path.insert(file_path, editor_id.clone());
		self.editors.get(&editor_id).expect("just inserted")
	}

	pub fn get(&self, id: &EditorId) -> Result<&SharedEditor, ResourceError> {
		self.editors.get(id).ok_or(ResourceError::NotFound)
	}

	fn require_participant(editor: &SharedEditor, client_id: &ClientId) -> Result<(), ResourceError> {
		if editor.state == ResourceState::Closed {
			return Err(ResourceError::Conflict);
		}
		if !editor.participants.contains(client_id) {
			return Err(ResourceError::PermissionDenied);
		}
		Ok(())
	}

	/// Accepts the update iff `version >= editor.version`; a stale version
	/// is a silent no-op that echoes the current server version.
	pub fn update_content(
		&mut self,
		id: &EditorId,
		client_id: &ClientId,
		content: String,
		version: u64,
	) -> Result<UpdateOutcome, ResourceError> {
		let editor = self.editors.get_mut(id).ok_or(ResourceError::NotFound)?;
		Self::require_participant(editor, client_id)?;

		if version < editor.version {
			return Ok(UpdateOutcome {
				accepted: false,
				version: editor.version,
				recipients: Vec::new(),
			});
		}

		let old_content = std::mem::replace(&mut editor.content, content.clone());
		editor.version += 1;
		editor.change_history.push(ChangeHistoryEntry {
			client_id: client_id.clone(),
			timestamp: Utc::now(),
			version: editor.version,
			old_content,
			new_content: content,
		});
		editor.last_activity = Utc::now();

		Ok(UpdateOutcome {
			accepted: true,
			version: editor.version,
			recipients: editor
				.participants
				.iter()
				.filter(|p| *p != client_id)
				.cloned()
				.collect(),
		})
	}

	/// Cursor/selection updates never change `version`; they only fan out.
	pub fn update_cursor(
		&mut self,
		id: &EditorId,
		client_id: &ClientId,
		cursor: Cursor,
	) -> Result<Vec<ClientId>, ResourceError> {
		let editor = self.editors.get_mut(id).ok_or(ResourceError::NotFound)?;
		Self::require_participant(editor, client_id)?;
		editor.cursors.insert(client_id.clone(), cursor);
		editor.last_activity = Utc::now();
		Ok(editor
			.participants
			.iter()
			.filter(|p| *p != client_id)
			.cloned()
			.collect())
	}

	pub fn update_selections(
		&mut self,
		id: &EditorId,
		client_id: &ClientId,
		selections: Vec<SelectionRange>,
	) -> Result<Vec<ClientId>, ResourceError> {
		let editor = self.editors.get_mut(id).ok_or(ResourceError::NotFound)?;
		Self::require_participant(editor, client_id)?;
		editor.selections.insert(client_id.clone(), selections);
		editor.last_activity = Utc::now();
		Ok(editor
			.participants
			.iter()
			.filter(|p| *p != client_id)
			.cloned()
			.collect())
	}

	pub fn close(&mut self, id: &EditorId, client_id: &ClientId) -> Result<Vec<ClientId>, ResourceError> {
		let editor = self.editors.get_mut(id).ok_or(ResourceError::NotFound)?;
		Self::require_participant(editor, client_id)?;
		let recipients: Vec<ClientId> = editor
			.participants
			.iter()
			.filter(|p| *p != client_id)
			.cloned()
			.collect();
		editor.state = ResourceState::Closed;
		editor.participants.clear();
		editor.last_activity = Utc::now();
		self.by_path.remove(&editor.file_path);
		Ok(recipients)
	}

	pub fn remove_client_everywhere(&mut self, client_id: &ClientId) {
		let ids: Vec<EditorId> = self.editors.keys().cloned().collect();
		for id in ids {
			if let Some(editor) = self.editors.get_mut(&id) {
				editor.participants.remove(client_id);
				editor.cursors.remove(client_id);
				editor.selections.remove(client_id);
				if editor.participants.is_empty() {
					editor.state = ResourceState::Closed;
					editor.last_activity = Utc::now();
					self.by_path.remove(&editor.file_path);
				}
			}
		}
	}

	pub fn sweep(&mut self, inactivity_timeout: chrono::Duration) {
		let now = Utc::now();
		for editor in self.editors.values_mut() {
			if editor.state == ResourceState::Active && now - editor.last_activity > inactivity_timeout
			{
				editor.state = ResourceState::Closed;
				editor.last_activity = now;
				self.by_path.remove(&editor.file_path);
			}
		}
		let max_age = self.max_age;
		self.editors
			.retain(|_, e| !(e.state == ResourceState::Closed && now - e.last_activity > max_age));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn register_is_idempotent_per_path() {
		let mut reg = EditorRegistry::new(10, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		let b = ClientId::new("b");

		let id1 = reg.register(a.clone(), "/x.txt".into(), None).editor_id.clone();
		let id2 = reg.register(b.clone(), "/x.txt".into(), None).editor_id.clone();
		assert_eq!(id1, id2);
		assert_eq!(reg.get(&id1).unwrap().participants.len(), 2);
	}

	#[test]
	fn stale_update_is_silent_no_op() {
		let mut reg = EditorRegistry::new(10, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		let b = ClientId::new("b");
		let id = reg.register(a.clone(), "/x.txt".into(), None).editor_id.clone();
		reg.register(b.clone(), "/x.txt".into(), None);

		let outcome = reg.update_content(&id, &a, "foo".into(), 1).unwrap();
		assert!(outcome.accepted);
		assert_eq!(outcome.version, 2);

		let stale = reg.update_content(&id, &b, "bar".into(), 1).unwrap();
		assert!(!stale.accepted);
		assert_eq!(stale.version, 2);

		let accepted = reg.update_content(&id, &b, "foobar".into(), 2).unwrap();
		assert!(accepted.accepted);
		assert_eq!(accepted.version, 3);
	}

	#[test]
	fn language_inferred_from_extension() {
		let mut reg = EditorRegistry::new(10, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		let editor = reg.register(a, "/src/main.rs".into(), None);
		assert_eq!(editor.language.as_deref(), Some("rust"));
	}

	#[test]
	fn close_unmaps_path_allowing_reregistration() {
		let mut reg = EditorRegistry::new(10, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		let id = reg.register(a.clone(), "/x.txt".into(), None).editor_id.clone();
		reg.close(&id, &a).unwrap();

		let id2 = reg.register(a, "/x.txt".into(), None).editor_id.clone();
		assert_ne!(id, id2);
	}
}
