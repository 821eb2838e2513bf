//! Terminal Manager (spec.md §3 SharedTerminal, §4.4).
//!
//! Lives entirely inside the owning session's actor (see `session.rs`); it
//! takes no lock of its own, satisfying spec.md §5's "terminals, editors and
//! extensions do not take independent locks" rule by construction.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use relay_proto::{ClientId, TerminalId};

use crate::resource::{ResourceError, ResourceState, RingBuffer};

#[derive(Debug, Clone)]
pub struct TerminalDimensions {
	pub cols: u16,
	pub rows: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEntryKind {
	Input,
	Output,
}

#[derive(Debug, Clone)]
pub struct BufferEntry {
	pub kind: BufferEntryKind,
	pub client_id: Option<ClientId>,
	pub data: String,
	pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SharedTerminal {
	pub terminal_id: TerminalId,
	pub created_by: ClientId,
	pub name: Option<String>,
	pub shell: Option<String>,
	pub cwd: Option<String>,
	pub dimensions: TerminalDimensions,
	pub participants: HashSet<ClientId>,
	pub buffer: RingBuffer<BufferEntry>,
	pub buffer_max_size: usize,
	pub state: ResourceState,
	pub last_activity: DateTime<Utc>,
}

pub struct TerminalOptions {
	pub name: Option<String>,
	pub shell: Option<String>,
	pub cwd: Option<String>,
	pub cols: u16,
	pub rows: u16,
	pub buffer_max_size: usize,
}

/// Owns every `SharedTerminal` for one session.
pub struct TerminalRegistry {
	terminals: HashMap<TerminalId, SharedTerminal>,
	next_ordinal: u64,
	default_buffer_max_size: usize,
	max_age: chrono::Duration,
}

impl TerminalRegistry {
	pub fn new(default_buffer_max_size: usize, max_age: chrono::Duration) -> Self {
		Self {
			terminals: HashMap::new(),
			next_ordinal: 0,
			default_buffer_max_size,
			max_age,
		}
	}

	/// Creates a terminal, seeding `participants` from the session's current
	/// participant snapshot (spec.md §4.4).
	pub fn create(
		&mut self,
		created_by: ClientId,
		session_participants: &[ClientId],
		opts: TerminalOptions,
	) -> &SharedTerminal {
		self.next_ordinal += 1;
		let terminal_id = TerminalId::new(format!("term-{}", self.next_ordinal));
		let now = Utc::now();
		let buffer_max_size = if opts.buffer_max_size == 0 {
			self.default_buffer_max_size
		} else {
			opts.buffer_max_size
		};
		let terminal = SharedTerminal {
			terminal_id: terminal_id.clone(),
			created_by,
			name: opts.name,
			shell: opts.shell,
			cwd: opts.cwd,
			dimensions: TerminalDimensions {
				cols: opts.cols,
				rows: opts.rows,
			},
			participants: session_participants.iter().cloned().collect(),
			buffer: RingBuffer::new(buffer_max_size),
			buffer_max_size,
			state: ResourceState::Active,
			last_activity: now,
		};
		self.terminals.insert(terminal_id.clone(), terminal);
		self.terminals.get(&terminal_id).expect("just inserted")
	}

	pub fn get(&self, id: &TerminalId) -> Result<&SharedTerminal, ResourceError> {
		self.terminals.get(id).ok_or(ResourceError::NotFound)
	}

	pub fn list(&self) -> impl Iterator<Item = &SharedTerminal> {
		self.terminals.values()
	}

	fn require_participant(
		terminal: &SharedTerminal,
		client_id: &ClientId,
	) -> Result<(), ResourceError> {
		if terminal.state == ResourceState::Closed {
			return Err(ResourceError::Conflict);
		}
		if !terminal.participants.contains(client_id) {
			return Err(ResourceError::PermissionDenied);
		}
		Ok(())
	}

	/// Appends server/process output and fans it out to every participant
	/// (the caller decides the fan-out; this just records it).
	pub fn process_output(
		&mut self,
		id: &TerminalId,
		data: String,
	) -> Result<Vec<ClientId>, ResourceError> {
		let terminal = self.terminals.get_mut(id).ok_or(ResourceError::NotFound)?;
		if terminal.state == ResourceState::Closed {
			return Err(ResourceError::Conflict);
		}
		terminal.buffer.push(BufferEntry {
			kind: BufferEntryKind::Output,
			client_id: None,
			data,
			timestamp: Utc::now(),
		});
		terminal.last_activity = Utc::now();
		Ok(terminal.participants.iter().cloned().collect())
	}

	/// Appends participant input; returns the recipients to fan out to
	/// (every *other* participant — the origin already displayed it
	/// locally, per spec.md §4.4).
	pub fn process_input(
		&mut self,
		id: &TerminalId,
		client_id: &ClientId,
		data: String,
	) -> Result<Vec<ClientId>, ResourceError> {
		let terminal = self.terminals.get_mut(id).ok_or(ResourceError::NotFound)?;
		Self::require_participant(terminal, client_id)?;
		terminal.buffer.push(BufferEntry {
			kind: BufferEntryKind::Input,
			client_id: Some(client_id.clone()),
			data,
			timestamp: Utc::now(),
		});
		terminal.last_activity = Utc::now();
		Ok(terminal
			.participants
			.iter()
			.filter(|p| *p != client_id)
			.cloned()
			.collect())
	}

	pub fn resize(
		&mut self,
		id: &TerminalId,
		client_id: &ClientId,
		cols: u16,
		rows: u16,
	) -> Result<Vec<ClientId>, ResourceError> {
		let terminal = self.terminals.get_mut(id).ok_or(ResourceError::NotFound)?;
		Self::require_participant(terminal, client_id)?;
		terminal.dimensions = TerminalDimensions { cols, rows };
		terminal.last_activity = Utc::now();
		Ok(terminal.participants.iter().cloned().collect())
	}

	pub fn get_buffer(&self, id: &TerminalId, limit: usize) -> Result<Vec<BufferEntry>, ResourceError> {
		let terminal = self.terminals.get(id).ok_or(ResourceError::NotFound)?;
		Ok(terminal.buffer.tail(limit))
	}

	pub fn add_client(&mut self, id: &TerminalId, client_id: ClientId) -> Result<(), ResourceError> {
		let terminal = self.terminals.get_mut(id).ok_or(ResourceError::NotFound)?;
		if terminal.state == ResourceState::Closed {
			return Err(ResourceError::Conflict);
		}
		terminal.participants.insert(client_id);
		Ok(())
	}

	/// Removes a client; if it was the last participant the terminal closes.
	pub fn remove_client(&mut self, id: &TerminalId, client_id: &ClientId) {
		if let Some(terminal) = self.terminals.get_mut(id) {
			terminal.participants.remove(client_id);
			if terminal.participants.is_empty() {
				terminal.state = ResourceState::Closed;
				terminal.last_activity = Utc::now();
			}
		}
	}

	/// Removes `client_id` from every terminal in this session (used on
	/// `session_leave`/disconnect cleanup).
	pub fn remove_client_everywhere(&mut self, client_id: &ClientId) {
		let ids: Vec<TerminalId> = self.terminals.keys().cloned().collect();
		for id in ids {
			self.remove_client(&id, client_id);
		}
	}

	pub fn close(&mut self, id: &TerminalId, client_id: &ClientId) -> Result<(), ResourceError> {
		let terminal = self.terminals.get_mut(id).ok_or(ResourceError::NotFound)?;
		Self::require_participant(terminal, client_id)?;
		terminal.state = ResourceState::Closed;
		terminal.participants.clear();
		terminal.last_activity = Utc::now();
		Ok(())
	}

	/// Closes active terminals idle longer than `inactivity_timeout`, and
	/// deletes closed terminals older than `maxAgeMs` (spec.md §4.4).
	pub fn sweep(&mut self, inactivity_timeout: chrono::Duration) {
		let now = Utc::now();
		for terminal in self.terminals.values_mut() {
			if terminal.state == ResourceState::Active
				&& now - terminal.last_activity > inactivity_timeout
			{
				terminal.state = ResourceState::Closed;
				terminal.last_activity = now;
			}
		}
		self.terminals
			.retain(|_, t| !(t.state == ResourceState::Closed && now - t.last_activity > self.max_age));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn opts() -> TerminalOptions {
		TerminalOptions {
			name: None,
			shell: None,
			cwd: None,
			cols: 80,
			rows: 24,
			buffer_max_size: 3,
		}
	}

	#[test]
	fn ring_buffer_caps_at_buffer_max_size() {
		let mut reg = TerminalRegistry::new(1000, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		let id = reg.create(a.clone(), &[a.clone()], opts()).terminal_id.clone();

		for i in 0..5 {
			reg.process_input(&id, &a, format!("line{i}")).unwrap();
		}
		assert_eq!(reg.get(&id).unwrap().buffer.len(), 3);
	}

	#[test]
	fn zero_buffer_max_size_falls_back_to_registry_default() {
		let mut reg = TerminalRegistry::new(5, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		let mut sentinel_opts = opts();
		sentinel_opts.buffer_max_size = 0;
		let id = reg
			.create(a.clone(), &[a.clone()], sentinel_opts)
			.terminal_id
			.clone();

		assert_eq!(reg.get(&id).unwrap().buffer_max_size, 5);
		for i in 0..8 {
			reg.process_input(&id, &a, format!("line{i}")).unwrap();
		}
		assert_eq!(reg.get(&id).unwrap().buffer.len(), 5);
	}

	#[test]
	fn input_does_not_fan_out_to_origin() {
		let mut reg = TerminalRegistry::new(1000, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		let b = ClientId::new("b");
		let id = reg
			.create(a.clone(), &[a.clone(), b.clone()], opts())
			.terminal_id
			.clone();

		let recipients = reg.process_input(&id, &a, "ls\n".into()).unwrap();
		assert_eq!(recipients, vec![b]);
	}

	#[test]
	fn non_participant_input_is_denied() {
		let mut reg = TerminalRegistry::new(1000, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		let outsider = ClientId::new("z");
		let id = reg.create(a.clone(), &[a], opts()).terminal_id.clone();

		let err = reg.process_input(&id, &outsider, "x".into()).unwrap_err();
		assert_eq!(err, ResourceError::PermissionDenied);
	}

	#[test]
	fn removing_last_participant_closes_terminal() {
		let mut reg = TerminalRegistry::new(1000, chrono::Duration::hours(24));
		let a = ClientId::new("a");
		let id = reg.create(a.clone(), &[a.clone()], opts()).terminal_id.clone();

		reg.remove_client(&id, &a);
		assert_eq!(reg.get(&id).unwrap().state, ResourceState::Closed);

		let err = reg.process_input(&id, &a, "x".into()).unwrap_err();
		assert_eq!(err, ResourceError::Conflict);
	}
}
