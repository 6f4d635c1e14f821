// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The storage contract every backend variant satisfies.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_core::{Policy, PolicyId, RecoveryMetadata, RootKeySlot, SecretPath, SecretString, StoredSecret};

use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::memory::MemoryBackend;
use crate::sqlite::SqliteBackend;

/// Transactional persistence for secrets, the admin token, recovery metadata
/// and policies.
///
/// Every operation is atomic per record: a future dropped mid-operation leaves
/// the record either untouched or fully written. Bound calls with
/// `tokio::time::timeout` to cancel them.
#[async_trait]
pub trait Backend: Send + Sync {
	/// Open or create storage. A second call fails with `AlreadyInitialized`.
	async fn initialize(&self) -> BackendResult<()>;

	/// Release every handle. Later operations fail with `Closed`; closing twice is a no-op.
	async fn close(&self) -> BackendResult<()>;

	async fn store_secret(&self, path: &SecretPath, secret: &StoredSecret) -> BackendResult<()>;

	/// `NotFound` when nothing was ever stored at `path`.
	async fn load_secret(&self, path: &SecretPath) -> BackendResult<StoredSecret>;

	async fn list_secret_paths(&self) -> BackendResult<Vec<SecretPath>>;

	/// Replaces the single admin token atomically.
	async fn store_admin_token(&self, token: &SecretString) -> BackendResult<()>;

	async fn load_admin_signing_token(&self) -> BackendResult<SecretString>;

	async fn store_admin_recovery_metadata(&self, metadata: &RecoveryMetadata) -> BackendResult<()>;

	async fn load_admin_recovery_metadata(&self) -> BackendResult<RecoveryMetadata>;

	/// Drop the recovery metadata. Succeeds when none is stored.
	async fn delete_admin_recovery_metadata(&self) -> BackendResult<()>;

	async fn store_policy(&self, policy: &Policy) -> BackendResult<()>;

	async fn load_policy(&self, id: PolicyId) -> BackendResult<Policy>;

	/// `NotFound` when no policy has this id.
	async fn delete_policy(&self, id: PolicyId) -> BackendResult<()>;

	/// All policies ordered by name.
	async fn list_policies(&self) -> BackendResult<Vec<Policy>>;
}

/// Storage engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
	#[default]
	Sqlite,
	Memory,
}

impl BackendKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			BackendKind::Sqlite => "sqlite",
			BackendKind::Memory => "memory",
		}
	}
}

impl fmt::Display for BackendKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for BackendKind {
	type Err = BackendError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"sqlite" => Ok(BackendKind::Sqlite),
			"memory" | "in-memory" => Ok(BackendKind::Memory),
			other => Err(BackendError::Configuration(format!(
				"unknown backend kind: {other}"
			))),
		}
	}
}

/// Build an uninitialized backend of the requested kind.
pub fn create_backend(
	kind: BackendKind,
	config: BackendConfig,
	key_slot: RootKeySlot,
) -> Arc<dyn Backend> {
	tracing::debug!(backend = %kind, "creating backend");
	match kind {
		BackendKind::Sqlite => Arc::new(SqliteBackend::new(config, key_slot)),
		BackendKind::Memory => Arc::new(MemoryBackend::new()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kind_parses_case_insensitively() {
		assert_eq!("SQLite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
		assert_eq!("in-memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
		assert!("postgres".parse::<BackendKind>().is_err());
	}

	#[tokio::test]
	async fn factory_builds_usable_memory_backend() {
		let backend = create_backend(BackendKind::Memory, BackendConfig::default(), RootKeySlot::new());
		backend.initialize().await.unwrap();
		assert!(backend.list_policies().await.unwrap().is_empty());
	}
}
