//! Auth Registry (spec.md §3 Token, §4.2).
//!
//! Holds opaque, SHA-256-hashed tokens keyed by [`ServerId`]. A token is
//! never stored or logged in cleartext; only its hash is retained once
//! [`AuthRegistry::set_token`] returns. The registry also validates the
//! tokens clients present in `authenticate`/`token_refresh` against that
//! same store, scanning by constant-time hash comparison since a connecting
//! client names no `serverId` of its own — it simply proves it holds *a*
//! credential the operator provisioned.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use relay_proto::ServerId;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
	#[error("token is invalid")]
	Failed,
	#[error("token has expired")]
	Expired,
	#[error("no token registered for this server")]
	NotFound,
}

impl AuthError {
	pub fn to_wire(self) -> relay_proto::ErrorCode {
		match self {
			AuthError::Failed => relay_proto::ErrorCode::AuthFailed,
			AuthError::Expired => relay_proto::ErrorCode::AuthExpired,
			AuthError::NotFound => relay_proto::ErrorCode::AuthFailed,
		}
	}
}

#[derive(Debug, Clone)]
struct TokenRecord {
	token_hash: String,
	expires_at: Option<DateTime<Utc>>,
	refresh_token: Option<String>,
	refresh_token_expires_at: Option<DateTime<Utc>>,
	permissions: Vec<String>,
}

/// Result of a successful client-facing authentication or refresh.
#[derive(Debug, Clone)]
pub struct AuthGrant {
	pub permissions: Vec<String>,
	pub token_valid_until: DateTime<Utc>,
	pub refresh_token: Option<String>,
}

fn hash_token(token: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(token.as_bytes());
	hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
	use std::fmt::Write;
	let mut out = String::with_capacity(bytes.len() * 2);
	for b in bytes {
		let _ = write!(out, "{:02x}", b);
	}
	out
}

/// Per-server opaque token store, per spec.md §3/§4.2.
pub struct AuthRegistry {
	tokens: RwLock<HashMap<ServerId, TokenRecord>>,
}

impl Default for AuthRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl AuthRegistry {
	pub fn new() -> Self {
		Self {
			tokens: RwLock::new(HashMap::new()),
		}
	}

	/// Stores `token` for `server_id`, caching its hash. Used both to
	/// provision operator-issued credentials and to record the outcome of a
	/// successful `token_refresh`.
	pub async fn set_token(
		&self,
		server_id: ServerId,
		token: &str,
		expires_at: Option<DateTime<Utc>>,
		permissions: Vec<String>,
	) {
		let record = TokenRecord {
			token_hash: hash_token(token),
			expires_at,
			refresh_token: None,
			refresh_token_expires_at: None,
			permissions,
		};
		self.tokens.write().await.insert(server_id, record);
	}

	/// Returns the stored hash for `server_id`, evicting and failing with
	/// [`AuthError::Expired`] if the token has lapsed.
	pub async fn get_token(&self, server_id: &ServerId) -> Result<String, AuthError> {
		let now = Utc::now();
		let mut tokens = self.tokens.write().await;
		let Some(record) = tokens.get(server_id) else {
			return Err(AuthError::NotFound);
		};
		if record.expires_at.is_some_and(|exp| exp <= now) {
			tokens.remove(server_id);
			return Err(AuthError::Expired);
		}
		Ok(record.token_hash.clone())
	}

	/// True when `server_id`'s token expires within `threshold` from now.
	pub async fn is_token_about_to_expire(
		&self,
		server_id: &ServerId,
		threshold: chrono::Duration,
	) -> bool {
		let tokens = self.tokens.read().await;
		tokens
			.get(server_id)
			.and_then(|r| r.expires_at)
			.is_some_and(|exp| exp <= Utc::now() + threshold)
	}

	/// Atomically replaces the token and hash for `server_id`.
	pub async fn refresh_token(
		&self,
		server_id: &ServerId,
		new_token: &str,
		expires_at: Option<DateTime<Utc>>,
	) -> Result<(), AuthError> {
		let mut tokens = self.tokens.write().await;
		let record = tokens.get_mut(server_id).ok_or(AuthError::NotFound)?;
		record.token_hash = hash_token(new_token);
		record.expires_at = expires_at;
		Ok(())
	}

	/// Finds the first record whose hash constant-time-matches
	/// `presented_hash`, skipping any whose token has expired.
	fn find_matching<'a>(
		tokens: &'a HashMap<ServerId, TokenRecord>,
		presented_hash: &str,
		now: DateTime<Utc>,
	) -> Option<(&'a ServerId, &'a TokenRecord)> {
		tokens.iter().find(|(_, record)| {
			!record.expires_at.is_some_and(|exp| exp <= now)
				&& bool::from(record.token_hash.as_bytes().ct_eq(presented_hash.as_bytes()))
		})
	}

	/// Validates a client-presented token against every registered
	/// credential via constant-time hash comparison. On a match, issues and
	/// persists a fresh refresh token (valid for `refresh_ttl`) alongside the
	/// grant, so a subsequent `token_refresh` has something real to redeem.
	pub async fn authenticate_client(
		&self,
		presented_token: &str,
		refresh_ttl: chrono::Duration,
	) -> Result<AuthGrant, AuthError> {
		let presented_hash = hash_token(presented_token);
		let now = Utc::now();
		let mut tokens = self.tokens.write().await;
		let server_id = Self::find_matching(&tokens, &presented_hash, now)
			.map(|(id, _)| id.clone())
			.ok_or(AuthError::Failed)?;

		let record = tokens.get_mut(&server_id).expect("just matched");
		let refresh_token = uuid::Uuid::new_v4().to_string();
		record.refresh_token = Some(refresh_token.clone());
		record.refresh_token_expires_at = Some(now + refresh_ttl);

		Ok(AuthGrant {
			permissions: record.permissions.clone(),
			token_valid_until: record
				.expires_at
				.unwrap_or_else(|| now + chrono::Duration::hours(1)),
			refresh_token: Some(refresh_token),
		})
	}

	/// Read-only counterpart of [`Self::authenticate_client`] for
	/// `token_validate`: checks a presented token's validity without
	/// rotating its refresh token.
	pub async fn validate_token(&self, presented_token: &str) -> Result<AuthGrant, AuthError> {
		let presented_hash = hash_token(presented_token);
		let now = Utc::now();
		let tokens = self.tokens.read().await;
		let (_, record) =
			Self::find_matching(&tokens, &presented_hash, now).ok_or(AuthError::Failed)?;
		Ok(AuthGrant {
			permissions: record.permissions.clone(),
			token_valid_until: record
				.expires_at
				.unwrap_or_else(|| now + chrono::Duration::hours(1)),
			refresh_token: record.refresh_token.clone(),
		})
	}

	/// Resolves a presented refresh token to its owning `server_id`, provided
	/// it hasn't expired. An expired refresh token is evicted and treated as
	/// not found.
	pub async fn find_by_refresh_token(&self, refresh_token: &str) -> Option<ServerId> {
		let now = Utc::now();
		let mut tokens = self.tokens.write().await;
		let server_id = tokens
			.iter()
			.find(|(_, record)| record.refresh_token.as_deref() == Some(refresh_token))
			.map(|(id, _)| id.clone())?;

		let record = tokens.get_mut(&server_id).expect("just matched");
		if record.refresh_token_expires_at.is_some_and(|exp| exp <= now) {
			record.refresh_token = None;
			record.refresh_token_expires_at = None;
			return None;
		}
		Some(server_id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const TTL: chrono::Duration = chrono::Duration::hours(24);

	#[tokio::test]
	async fn set_and_authenticate_round_trip() {
		let registry = AuthRegistry::new();
		registry
			.set_token(
				ServerId::new("srv-1"),
				"secret-token",
				Some(Utc::now() + chrono::Duration::hours(1)),
				vec!["read".into(), "write".into()],
			)
			.await;

		let grant = registry
			.authenticate_client("secret-token", TTL)
			.await
			.unwrap();
		assert_eq!(grant.permissions, vec!["read", "write"]);

		let err = registry
			.authenticate_client("wrong-token", TTL)
			.await
			.unwrap_err();
		assert_eq!(err, AuthError::Failed);
	}

	#[tokio::test]
	async fn authenticate_issues_a_redeemable_refresh_token() {
		let registry = AuthRegistry::new();
		registry
			.set_token(ServerId::new("srv-1"), "secret-token", None, vec![])
			.await;

		let grant = registry
			.authenticate_client("secret-token", TTL)
			.await
			.unwrap();
		let refresh_token = grant.refresh_token.expect("authenticate issues a refresh token");

		let server_id = registry
			.find_by_refresh_token(&refresh_token)
			.await
			.expect("refresh token resolves to its server");
		assert_eq!(server_id, ServerId::new("srv-1"));
	}

	#[tokio::test]
	async fn expired_refresh_token_is_not_found() {
		let registry = AuthRegistry::new();
		registry
			.set_token(ServerId::new("srv-1"), "secret-token", None, vec![])
			.await;

		let grant = registry
			.authenticate_client("secret-token", chrono::Duration::seconds(-1))
			.await
			.unwrap();
		let refresh_token = grant.refresh_token.unwrap();

		assert!(registry.find_by_refresh_token(&refresh_token).await.is_none());
	}

	#[tokio::test]
	async fn validate_token_does_not_rotate_refresh_token() {
		let registry = AuthRegistry::new();
		registry
			.set_token(ServerId::new("srv-1"), "secret-token", None, vec![])
			.await;
		let issued = registry
			.authenticate_client("secret-token", TTL)
			.await
			.unwrap()
			.refresh_token
			.unwrap();

		let grant = registry.validate_token("secret-token").await.unwrap();
		assert_eq!(grant.refresh_token, Some(issued));
	}

	#[tokio::test]
	async fn expired_token_is_evicted() {
		let registry = AuthRegistry::new();
		let server_id = ServerId::new("srv-1");
		registry
			.set_token(
				server_id.clone(),
				"secret-token",
				Some(Utc::now() - chrono::Duration::seconds(1)),
				vec![],
			)
			.await;

		let err = registry.get_token(&server_id).await.unwrap_err();
		assert_eq!(err, AuthError::Expired);
		assert_eq!(
			registry.get_token(&server_id).await.unwrap_err(),
			AuthError::NotFound
		);
	}

	#[tokio::test]
	async fn refresh_replaces_hash() {
		let registry = AuthRegistry::new();
		let server_id = ServerId::new("srv-1");
		registry.set_token(server_id.clone(), "old", None, vec![]).await;
		registry
			.refresh_token(&server_id, "new", None)
			.await
			.unwrap();

		assert!(registry.authenticate_client("old", TTL).await.is_err());
		assert!(registry.authenticate_client("new", TTL).await.is_ok());
	}
}
