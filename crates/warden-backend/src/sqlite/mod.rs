// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! File-backed backend on SQLite.
//!
//! Secret versions and the admin token are encrypted with the resident root key
//! before they reach the database; each ciphertext is bound to its record
//! identity. Multi-row writes run in one transaction, so a dropped future rolls
//! back instead of leaving a half-written secret.

mod schema;

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use warden_core::crypto::{self, EncryptedData};
use warden_core::{
	Policy, PolicyId, PolicyPermission, RecoveryMetadata, RootKey, RootKeySlot, SecretMeta,
	SecretPath, SecretString, SecretVersion, StoredSecret,
};
use zeroize::Zeroizing;

use crate::backend::Backend;
use crate::config::{BackendConfig, JournalMode, SqliteSettings};
use crate::error::{BackendError, BackendResult};

const ADMIN_TOKEN_AAD: &[u8] = b"warden:admin_token";

enum State {
	Uninitialized,
	Open(SqlitePool),
	Closed,
}

pub struct SqliteBackend {
	config: BackendConfig,
	key_slot: RootKeySlot,
	state: RwLock<State>,
}

type VersionRow = (i64, Vec<u8>, Vec<u8>, String, Option<String>);
type PolicyRow = (String, String, String, String, String, String, String);

impl SqliteBackend {
	pub fn new(config: BackendConfig, key_slot: RootKeySlot) -> Self {
		Self {
			config,
			key_slot,
			state: RwLock::new(State::Uninitialized),
		}
	}

	async fn pool(&self) -> BackendResult<SqlitePool> {
		match &*self.state.read().await {
			State::Open(pool) => Ok(pool.clone()),
			State::Uninitialized => Err(BackendError::NotInitialized),
			State::Closed => Err(BackendError::Closed),
		}
	}

	fn root_key(&self) -> BackendResult<Arc<RootKey>> {
		self.key_slot.get().ok_or(BackendError::Sealed)
	}

	async fn open_pool(settings: &SqliteSettings) -> BackendResult<SqlitePool> {
		tokio::fs::create_dir_all(&settings.data_dir)
			.await
			.map_err(|e| {
				BackendError::Configuration(format!(
					"cannot create data directory {}: {e}",
					settings.data_dir.display()
				))
			})?;

		let path = settings.database_path();
		let options = SqliteConnectOptions::new()
			.filename(&path)
			.create_if_missing(true)
			.journal_mode(journal_mode(settings.journal_mode))
			.synchronous(SqliteSynchronous::Normal)
			.busy_timeout(settings.busy_timeout)
			.foreign_keys(true);

		SqlitePoolOptions::new()
			.max_connections(settings.max_open_conns)
			.min_connections(settings.max_idle_conns)
			.max_lifetime(settings.conn_max_lifetime)
			.connect_with(options)
			.await
			.map_err(|e| {
				BackendError::Configuration(format!("cannot open database {}: {e}", path.display()))
			})
	}
}

fn journal_mode(mode: JournalMode) -> SqliteJournalMode {
	match mode {
		JournalMode::Delete => SqliteJournalMode::Delete,
		JournalMode::Truncate => SqliteJournalMode::Truncate,
		JournalMode::Persist => SqliteJournalMode::Persist,
		JournalMode::Memory => SqliteJournalMode::Memory,
		JournalMode::Wal => SqliteJournalMode::Wal,
		JournalMode::Off => SqliteJournalMode::Off,
	}
}

fn timestamp(what: &str, raw: &str) -> BackendResult<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(raw)
		.map(|t| t.with_timezone(&Utc))
		.map_err(|e| BackendError::Corrupt {
			what: what.to_string(),
			detail: format!("bad timestamp {raw:?}: {e}"),
		})
}

fn version_number(what: &str, raw: i64) -> BackendResult<u32> {
	u32::try_from(raw).map_err(|_| BackendError::Corrupt {
		what: what.to_string(),
		detail: format!("version out of range: {raw}"),
	})
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
	if let sqlx::Error::Database(ref db_err) = e {
		return db_err.message().contains("UNIQUE constraint failed");
	}
	false
}

fn policy_from_row(row: PolicyRow) -> BackendResult<Policy> {
	let (id, name, spiffe_id_pattern, path_pattern, permissions, created_at, created_by) = row;
	let what = format!("policy {id}");
	let parsed_id = PolicyId::from_str(&id).map_err(|e| BackendError::Corrupt {
		what: what.clone(),
		detail: e.to_string(),
	})?;
	let permissions: BTreeSet<PolicyPermission> = serde_json::from_str(&permissions)?;
	Ok(Policy {
		id: parsed_id,
		name,
		spiffe_id_pattern,
		path_pattern,
		permissions,
		created_at: timestamp(&what, &created_at)?,
		created_by,
	})
}

#[async_trait]
impl Backend for SqliteBackend {
	#[instrument(skip(self))]
	async fn initialize(&self) -> BackendResult<()> {
		let mut state = self.state.write().await;
		match *state {
			State::Uninitialized => {}
			State::Open(_) => return Err(BackendError::AlreadyInitialized),
			State::Closed => return Err(BackendError::Closed),
		}

		let settings = SqliteSettings::from_config(&self.config)?;
		let pool = Self::open_pool(&settings).await?;

		if let Err(e) = schema::migrate(&pool).await {
			pool.close().await;
			return Err(e);
		}

		info!(
			path = %settings.database_path().display(),
			max_open_conns = settings.max_open_conns,
			"sqlite backend initialized"
		);
		*state = State::Open(pool);
		Ok(())
	}

	async fn close(&self) -> BackendResult<()> {
		let mut state = self.state.write().await;
		if let State::Open(pool) = std::mem::replace(&mut *state, State::Closed) {
			pool.close().await;
			debug!("sqlite backend closed");
		}
		Ok(())
	}

	#[instrument(skip(self, secret), fields(path = %path, versions = secret.versions.len()))]
	async fn store_secret(&self, path: &SecretPath, secret: &StoredSecret) -> BackendResult<()> {
		let pool = self.pool().await?;
		let key = self.root_key()?;

		let mut sealed = Vec::with_capacity(secret.versions.len());
		for version in secret.versions.values() {
			let plaintext = Zeroizing::new(serde_json::to_vec(&version.data)?);
			let encrypted = crypto::encrypt(&key, &plaintext, &path.record_aad(version.version))?;
			sealed.push((version, encrypted));
		}

		let mut tx = pool
			.begin()
			.await
			.map_err(BackendError::storage("begin store secret"))?;

		sqlx::query(
			r#"
			INSERT INTO secret_metadata (path, current_version, oldest_version, max_versions, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?)
			ON CONFLICT(path) DO UPDATE SET
				current_version = excluded.current_version,
				oldest_version = excluded.oldest_version,
				max_versions = excluded.max_versions,
				created_at = excluded.created_at,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(path.as_str())
		.bind(i64::from(secret.meta.current_version))
		.bind(i64::from(secret.meta.oldest_version))
		.bind(i64::from(secret.meta.max_versions))
		.bind(secret.meta.created_at.to_rfc3339())
		.bind(secret.meta.updated_at.to_rfc3339())
		.execute(&mut *tx)
		.await
		.map_err(BackendError::storage("upsert secret metadata"))?;

		sqlx::query("DELETE FROM secret_versions WHERE path = ?")
			.bind(path.as_str())
			.execute(&mut *tx)
			.await
			.map_err(BackendError::storage("replace secret versions"))?;

		for (version, encrypted) in &sealed {
			sqlx::query(
				r#"
				INSERT INTO secret_versions (path, version, nonce, ciphertext, created_at, deleted_at)
				VALUES (?, ?, ?, ?, ?, ?)
				"#,
			)
			.bind(path.as_str())
			.bind(i64::from(version.version))
			.bind(encrypted.nonce.as_slice())
			.bind(encrypted.ciphertext.as_slice())
			.bind(version.created_at.to_rfc3339())
			.bind(version.deleted_at.map(|t| t.to_rfc3339()))
			.execute(&mut *tx)
			.await
			.map_err(BackendError::storage("insert secret version"))?;
		}

		tx.commit()
			.await
			.map_err(BackendError::storage("commit store secret"))?;

		debug!("secret stored");
		Ok(())
	}

	#[instrument(skip(self), fields(path = %path))]
	async fn load_secret(&self, path: &SecretPath) -> BackendResult<StoredSecret> {
		let pool = self.pool().await?;
		let key = self.root_key()?;

		// Both reads share one snapshot so a concurrent store is seen whole or not at all.
		let mut tx = pool
			.begin()
			.await
			.map_err(BackendError::storage("begin load secret"))?;

		let meta: Option<(i64, i64, i64, String, String)> = sqlx::query_as(
			r#"
			SELECT current_version, oldest_version, max_versions, created_at, updated_at
			FROM secret_metadata
			WHERE path = ?
			"#,
		)
		.bind(path.as_str())
		.fetch_optional(&mut *tx)
		.await
		.map_err(BackendError::storage("load secret metadata"))?;

		let Some((current, oldest, max_versions, created_at, updated_at)) = meta else {
			return Err(BackendError::not_found("secret", path.as_str()));
		};

		let rows: Vec<VersionRow> = sqlx::query_as(
			r#"
			SELECT version, nonce, ciphertext, created_at, deleted_at
			FROM secret_versions
			WHERE path = ?
			ORDER BY version
			"#,
		)
		.bind(path.as_str())
		.fetch_all(&mut *tx)
		.await
		.map_err(BackendError::storage("load secret versions"))?;

		tx.commit()
			.await
			.map_err(BackendError::storage("end load secret"))?;

		let what = format!("secret {path}");
		let mut versions = BTreeMap::new();
		for (version, nonce, ciphertext, created_at, deleted_at) in rows {
			let version = version_number(&what, version)?;
			let encrypted = EncryptedData::from_parts(ciphertext, &nonce)?;
			let plaintext = crypto::decrypt(&key, &encrypted, &path.record_aad(version))?;
			let data: BTreeMap<String, String> = serde_json::from_slice(&plaintext)?;
			versions.insert(
				version,
				SecretVersion {
					version,
					data,
					created_at: timestamp(&what, &created_at)?,
					deleted_at: deleted_at
						.as_deref()
						.map(|raw| timestamp(&what, raw))
						.transpose()?,
				},
			);
		}

		Ok(StoredSecret {
			versions,
			meta: SecretMeta {
				current_version: version_number(&what, current)?,
				oldest_version: version_number(&what, oldest)?,
				max_versions: version_number(&what, max_versions)?,
				created_at: timestamp(&what, &created_at)?,
				updated_at: timestamp(&what, &updated_at)?,
			},
		})
	}

	async fn list_secret_paths(&self) -> BackendResult<Vec<SecretPath>> {
		let pool = self.pool().await?;
		let rows: Vec<(String,)> = sqlx::query_as("SELECT path FROM secret_metadata ORDER BY path")
			.fetch_all(&pool)
			.await
			.map_err(BackendError::storage("list secret paths"))?;

		rows.into_iter()
			.map(|(raw,)| {
				SecretPath::parse(&raw).map_err(|e| BackendError::Corrupt {
					what: format!("secret path {raw:?}"),
					detail: e.to_string(),
				})
			})
			.collect()
	}

	#[instrument(skip(self, token))]
	async fn store_admin_token(&self, token: &SecretString) -> BackendResult<()> {
		let pool = self.pool().await?;
		let key = self.root_key()?;
		let encrypted = crypto::encrypt(&key, token.expose().as_bytes(), ADMIN_TOKEN_AAD)?;

		sqlx::query(
			r#"
			INSERT INTO admin_token (id, nonce, ciphertext, updated_at)
			VALUES (1, ?, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				nonce = excluded.nonce,
				ciphertext = excluded.ciphertext,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(encrypted.nonce.as_slice())
		.bind(encrypted.ciphertext.as_slice())
		.bind(Utc::now().to_rfc3339())
		.execute(&pool)
		.await
		.map_err(BackendError::storage("store admin token"))?;

		debug!("admin token stored");
		Ok(())
	}

	async fn load_admin_signing_token(&self) -> BackendResult<SecretString> {
		let pool = self.pool().await?;
		let key = self.root_key()?;

		let row: Option<(Vec<u8>, Vec<u8>)> =
			sqlx::query_as("SELECT nonce, ciphertext FROM admin_token WHERE id = 1")
				.fetch_optional(&pool)
				.await
				.map_err(BackendError::storage("load admin token"))?;
		let (nonce, ciphertext) = row.ok_or_else(|| BackendError::not_found("admin token", "current"))?;

		let encrypted = EncryptedData::from_parts(ciphertext, &nonce)?;
		let plaintext = crypto::decrypt(&key, &encrypted, ADMIN_TOKEN_AAD)?;
		let token = String::from_utf8(plaintext.to_vec()).map_err(|_| BackendError::Corrupt {
			what: "admin token".to_string(),
			detail: "not valid UTF-8".to_string(),
		})?;
		Ok(SecretString::new(token))
	}

	#[instrument(skip(self, metadata), fields(key_id = %metadata.key_id))]
	async fn store_admin_recovery_metadata(&self, metadata: &RecoveryMetadata) -> BackendResult<()> {
		let pool = self.pool().await?;
		let json = serde_json::to_string(metadata)?;

		sqlx::query(
			r#"
			INSERT INTO recovery_metadata (id, metadata, updated_at)
			VALUES (1, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				metadata = excluded.metadata,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(json)
		.bind(Utc::now().to_rfc3339())
		.execute(&pool)
		.await
		.map_err(BackendError::storage("store recovery metadata"))?;

		debug!("recovery metadata stored");
		Ok(())
	}

	async fn load_admin_recovery_metadata(&self) -> BackendResult<RecoveryMetadata> {
		let pool = self.pool().await?;
		let row: Option<(String,)> =
			sqlx::query_as("SELECT metadata FROM recovery_metadata WHERE id = 1")
				.fetch_optional(&pool)
				.await
				.map_err(BackendError::storage("load recovery metadata"))?;
		let (json,) = row.ok_or_else(|| BackendError::not_found("recovery metadata", "current"))?;
		Ok(serde_json::from_str(&json)?)
	}

	async fn delete_admin_recovery_metadata(&self) -> BackendResult<()> {
		let pool = self.pool().await?;
		sqlx::query("DELETE FROM recovery_metadata WHERE id = 1")
			.execute(&pool)
			.await
			.map_err(BackendError::storage("delete recovery metadata"))?;

		debug!("recovery metadata deleted");
		Ok(())
	}

	#[instrument(skip(self, policy), fields(policy_id = %policy.id, name = %policy.name))]
	async fn store_policy(&self, policy: &Policy) -> BackendResult<()> {
		let pool = self.pool().await?;
		let permissions = serde_json::to_string(&policy.permissions)?;

		let result = sqlx::query(
			r#"
			INSERT INTO policies (id, name, spiffe_id_pattern, path_pattern, permissions, created_at, created_by)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				name = excluded.name,
				spiffe_id_pattern = excluded.spiffe_id_pattern,
				path_pattern = excluded.path_pattern,
				permissions = excluded.permissions,
				created_at = excluded.created_at,
				created_by = excluded.created_by
			"#,
		)
		.bind(policy.id.to_string())
		.bind(&policy.name)
		.bind(&policy.spiffe_id_pattern)
		.bind(&policy.path_pattern)
		.bind(permissions)
		.bind(policy.created_at.to_rfc3339())
		.bind(&policy.created_by)
		.execute(&pool)
		.await;

		match result {
			Ok(_) => {
				debug!("policy stored");
				Ok(())
			}
			Err(e) if is_unique_violation(&e) => Err(BackendError::Conflict(format!(
				"policy name already exists: {}",
				policy.name
			))),
			Err(e) => Err(BackendError::storage("store policy")(e)),
		}
	}

	async fn load_policy(&self, id: PolicyId) -> BackendResult<Policy> {
		let pool = self.pool().await?;
		let row: Option<PolicyRow> = sqlx::query_as(
			r#"
			SELECT id, name, spiffe_id_pattern, path_pattern, permissions, created_at, created_by
			FROM policies
			WHERE id = ?
			"#,
		)
		.bind(id.to_string())
		.fetch_optional(&pool)
		.await
		.map_err(BackendError::storage("load policy"))?;

		let row = row.ok_or_else(|| BackendError::not_found("policy", id.to_string()))?;
		policy_from_row(row)
	}

	#[instrument(skip(self), fields(policy_id = %id))]
	async fn delete_policy(&self, id: PolicyId) -> BackendResult<()> {
		let pool = self.pool().await?;
		let result = sqlx::query("DELETE FROM policies WHERE id = ?")
			.bind(id.to_string())
			.execute(&pool)
			.await
			.map_err(BackendError::storage("delete policy"))?;

		if result.rows_affected() == 0 {
			return Err(BackendError::not_found("policy", id.to_string()));
		}
		debug!("policy deleted");
		Ok(())
	}

	async fn list_policies(&self) -> BackendResult<Vec<Policy>> {
		let pool = self.pool().await?;
		let rows: Vec<PolicyRow> = sqlx::query_as(
			r#"
			SELECT id, name, spiffe_id_pattern, path_pattern, permissions, created_at, created_by
			FROM policies
			ORDER BY name
			"#,
		)
		.fetch_all(&pool)
		.await
		.map_err(BackendError::storage("list policies"))?;

		rows.into_iter().map(policy_from_row).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::BackendOption;

	async fn open(dir: &std::path::Path, slot: RootKeySlot) -> SqliteBackend {
		let backend = SqliteBackend::new(BackendConfig::new(dir), slot);
		backend.initialize().await.unwrap();
		backend
	}

	fn secret(value: &str) -> StoredSecret {
		let now = Utc::now();
		let mut secret = StoredSecret::new(warden_core::DEFAULT_MAX_VERSIONS, now);
		secret.put(BTreeMap::from([("v".to_string(), value.to_string())]), now);
		secret
	}

	#[tokio::test]
	async fn secrets_require_installed_key() {
		let dir = tempfile::tempdir().unwrap();
		let slot = RootKeySlot::new();
		let backend = open(dir.path(), slot.clone()).await;
		let path = SecretPath::parse("apps/db").unwrap();

		assert!(matches!(
			backend.store_secret(&path, &secret("x")).await,
			Err(BackendError::Sealed)
		));
		// Metadata is readable while sealed; recovery depends on it.
		assert!(backend.load_admin_recovery_metadata().await.unwrap_err().is_not_found());

		slot.install(RootKey::generate());
		backend.store_secret(&path, &secret("x")).await.unwrap();
	}

	#[tokio::test]
	async fn ciphertext_on_disk_does_not_contain_plaintext() {
		let dir = tempfile::tempdir().unwrap();
		let slot = RootKeySlot::new();
		slot.install(RootKey::generate());
		let backend = open(dir.path(), slot).await;
		let path = SecretPath::parse("apps/db").unwrap();
		backend
			.store_secret(&path, &secret("plaintext-marker"))
			.await
			.unwrap();

		let pool = backend.pool().await.unwrap();
		let (ciphertext,): (Vec<u8>,) =
			sqlx::query_as("SELECT ciphertext FROM secret_versions WHERE path = 'apps/db'")
				.fetch_one(&pool)
				.await
				.unwrap();
		let haystack = String::from_utf8_lossy(&ciphertext);
		assert!(!haystack.contains("plaintext-marker"));
	}

	#[tokio::test]
	async fn data_survives_reopen_with_same_key() {
		let dir = tempfile::tempdir().unwrap();
		let key = RootKey::generate();
		let bytes = *key.as_bytes();
		let slot = RootKeySlot::new();
		slot.install(key);

		let path = SecretPath::parse("apps/db").unwrap();
		let backend = open(dir.path(), slot).await;
		backend.store_secret(&path, &secret("persisted")).await.unwrap();
		backend.close().await.unwrap();

		let reopened_slot = RootKeySlot::new();
		reopened_slot.install(RootKey::from_slice(&bytes).unwrap());
		let reopened = open(dir.path(), reopened_slot).await;
		let loaded = reopened.load_secret(&path).await.unwrap();
		assert_eq!(loaded.current().unwrap().data["v"], "persisted");
	}

	#[tokio::test]
	async fn wrong_key_surfaces_storage_fault_not_not_found() {
		let dir = tempfile::tempdir().unwrap();
		let slot = RootKeySlot::new();
		slot.install(RootKey::generate());
		let backend = open(dir.path(), slot.clone()).await;
		let path = SecretPath::parse("apps/db").unwrap();
		backend.store_secret(&path, &secret("x")).await.unwrap();

		slot.install(RootKey::generate());
		let err = backend.load_secret(&path).await.unwrap_err();
		assert!(matches!(err, BackendError::Crypto(_)));
		assert_eq!(err.kind(), warden_core::ErrorKind::Storage);
	}

	#[tokio::test]
	async fn unwritable_location_is_configuration_error() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("not-a-dir");
		std::fs::write(&file, b"x").unwrap();

		let backend = SqliteBackend::new(BackendConfig::new(&file), RootKeySlot::new());
		assert!(matches!(
			backend.initialize().await,
			Err(BackendError::Configuration(_))
		));
		// A failed initialize leaves the backend unopened.
		assert!(matches!(
			backend.list_policies().await,
			Err(BackendError::NotInitialized)
		));
	}

	#[tokio::test]
	async fn journal_mode_option_is_applied() {
		let dir = tempfile::tempdir().unwrap();
		let config =
			BackendConfig::new(dir.path()).with_option(BackendOption::JournalMode, "truncate");
		let backend = SqliteBackend::new(config, RootKeySlot::new());
		backend.initialize().await.unwrap();

		let pool = backend.pool().await.unwrap();
		let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(mode.to_lowercase(), "truncate");
	}
}
