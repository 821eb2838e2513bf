//! Layered configuration: compiled defaults < TOML file < environment < CLI.
//!
//! Mirrors the option table in spec.md §6. Parsing is strict: a malformed
//! file or an env var that fails to parse its expected type is a hard
//! [`ConfigError`], never a silent fallback to the default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error reading {path}: {error}")]
	Io {
		path: PathBuf,
		error: std::io::Error,
	},
	#[error("TOML parse error in {path}: {error}")]
	Toml {
		path: PathBuf,
		error: toml::de::Error,
	},
	#[error("environment variable {0} has an invalid value: {1}")]
	InvalidEnvVar(&'static str, String),
	#[error("{0} must be greater than zero")]
	MustBePositive(&'static str),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Server-level admission and drain settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
	pub port: u16,
	pub host: String,
	pub max_clients: usize,
	pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			port: 3001,
			host: "localhost".to_string(),
			max_clients: 10,
			shutdown_timeout_ms: 5000,
		}
	}
}

/// Authentication policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthConfig {
	pub enabled: bool,
	pub token_expiration_seconds: u64,
	pub refresh_token_expiration_seconds: u64,
}

impl Default for AuthConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			token_expiration_seconds: 3600,
			refresh_token_expiration_seconds: 86_400,
		}
	}
}

/// Session eviction/sweep cadence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
	pub inactivity_timeout_ms: u64,
	pub cleanup_interval_ms: u64,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			inactivity_timeout_ms: 86_400_000,
			cleanup_interval_ms: 3_600_000,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TerminalConfig {
	pub max_buffer_size: usize,
	pub inactivity_timeout_ms: u64,
}

impl Default for TerminalConfig {
	fn default() -> Self {
		Self {
			max_buffer_size: 1000,
			inactivity_timeout_ms: 3_600_000,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EditorConfig {
	pub max_history_size: usize,
	pub inactivity_timeout_ms: u64,
}

impl Default for EditorConfig {
	fn default() -> Self {
		Self {
			max_history_size: 100,
			inactivity_timeout_ms: 3_600_000,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtensionConfig {
	pub max_history_size: usize,
	pub inactivity_timeout_ms: u64,
}

impl Default for ExtensionConfig {
	fn default() -> Self {
		Self {
			max_history_size: 20,
			inactivity_timeout_ms: 86_400_000,
		}
	}
}

/// Full server configuration, assembled from defaults, an optional TOML
/// file, environment variables, and (in `relay-server`) CLI flags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	pub server: ServerConfig,
	pub auth: AuthConfig,
	pub session: SessionConfig,
	pub terminal: TerminalConfig,
	pub editor: EditorConfig,
	pub extension: ExtensionConfig,
}

impl Config {
	/// Loads config starting from compiled defaults, layering an optional
	/// TOML file and then environment variables on top. CLI flags, if any,
	/// are applied by the caller after this returns (see `relay-server`).
	pub fn load(file_path: Option<&Path>) -> Result<Self> {
		let mut config = match file_path {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		config.apply_env()?;
		config.validate()?;
		Ok(config)
	}

	fn from_file(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		toml::from_str(&text).map_err(|error| ConfigError::Toml {
			path: path.to_path_buf(),
			error,
		})
	}

	fn apply_env(&mut self) -> Result<()> {
		if let Some(v) = parse_env("MCP_PORT")? {
			self.server.port = v;
		}
		if let Ok(v) = std::env::var("MCP_HOST") {
			self.server.host = v;
		}
		if let Some(v) = parse_env("MCP_MAX_CLIENTS")? {
			self.server.max_clients = v;
		}
		if let Some(v) = parse_env("MCP_SHUTDOWN_TIMEOUT_MS")? {
			self.server.shutdown_timeout_ms = v;
		}
		if let Some(v) = parse_env_bool("MCP_AUTH_ENABLED")? {
			self.auth.enabled = v;
		}
		if let Some(v) = parse_env("MCP_TOKEN_EXPIRATION_SECONDS")? {
			self.auth.token_expiration_seconds = v;
		}
		if let Some(v) = parse_env("MCP_REFRESH_TOKEN_EXPIRATION_SECONDS")? {
			self.auth.refresh_token_expiration_seconds = v;
		}
		if let Some(v) = parse_env("MCP_SESSION_INACTIVITY_TIMEOUT_MS")? {
			self.session.inactivity_timeout_ms = v;
		}
		if let Some(v) = parse_env("MCP_SESSION_CLEANUP_INTERVAL_MS")? {
			self.session.cleanup_interval_ms = v;
		}
		if let Some(v) = parse_env("MCP_TERMINAL_MAX_BUFFER_SIZE")? {
			self.terminal.max_buffer_size = v;
		}
		if let Some(v) = parse_env("MCP_EDITOR_MAX_HISTORY_SIZE")? {
			self.editor.max_history_size = v;
		}
		if let Some(v) = parse_env("MCP_EXTENSION_MAX_HISTORY_SIZE")? {
			self.extension.max_history_size = v;
		}
		Ok(())
	}

	fn validate(&self) -> Result<()> {
		if self.server.max_clients == 0 {
			return Err(ConfigError::MustBePositive("server.maxClients"));
		}
		if self.terminal.max_buffer_size == 0 {
			return Err(ConfigError::MustBePositive("terminal.maxBufferSize"));
		}
		Ok(())
	}

	pub fn shutdown_timeout(&self) -> Duration {
		Duration::from_millis(self.server.shutdown_timeout_ms)
	}

	pub fn session_cleanup_interval(&self) -> Duration {
		Duration::from_millis(self.session.cleanup_interval_ms)
	}
}

fn parse_env<T>(key: &'static str) -> Result<Option<T>>
where
	T: std::str::FromStr,
{
	match std::env::var(key) {
		Ok(raw) => raw
			.parse()
			.map(Some)
			.map_err(|_| ConfigError::InvalidEnvVar(key, raw)),
		Err(_) => Ok(None),
	}
}

fn parse_env_bool(key: &'static str) -> Result<Option<bool>> {
	match std::env::var(key) {
		Ok(raw) => match raw.to_ascii_lowercase().as_str() {
			"1" | "true" | "yes" | "on" => Ok(Some(true)),
			"0" | "false" | "no" | "off" => Ok(Some(false)),
			_ => Err(ConfigError::InvalidEnvVar(key, raw)),
		},
		Err(_) => Ok(None),
	}
}

/// Default config file search path, following the teacher's XDG-first,
/// temp-dir-fallback convention for locating runtime files.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("relay").join("relay.toml"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_spec_table() {
		let c = Config::default();
		assert_eq!(c.server.port, 3001);
		assert_eq!(c.server.host, "localhost");
		assert_eq!(c.server.max_clients, 10);
		assert_eq!(c.server.shutdown_timeout_ms, 5000);
		assert!(!c.auth.enabled);
		assert_eq!(c.auth.token_expiration_seconds, 3600);
		assert_eq!(c.session.inactivity_timeout_ms, 86_400_000);
		assert_eq!(c.terminal.max_buffer_size, 1000);
		assert_eq!(c.editor.max_history_size, 100);
		assert_eq!(c.extension.max_history_size, 20);
		assert_eq!(c.extension.inactivity_timeout_ms, 86_400_000);
	}

	#[test]
	fn rejects_zero_max_clients() {
		let mut c = Config::default();
		c.server.max_clients = 0;
		assert!(c.validate().is_err());
	}

	#[test]
	fn toml_overlay_parses_partial_tables() {
		let toml_text = r#"
            [server]
            port = 4000
        "#;
		let c: Config = toml::from_str(toml_text).unwrap();
		assert_eq!(c.server.port, 4000);
		assert_eq!(c.server.host, "localhost");
	}
}
