// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory backend. State lives for the lifetime of the process.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use warden_core::{Policy, PolicyId, RecoveryMetadata, SecretPath, SecretString, StoredSecret};

use crate::backend::Backend;
use crate::error::{BackendError, BackendResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
	Uninitialized,
	Open,
	Closed,
}

/// Each table has its own lock so unrelated records never contend.
pub struct MemoryBackend {
	lifecycle: Mutex<Lifecycle>,
	secrets: RwLock<HashMap<SecretPath, StoredSecret>>,
	admin_token: RwLock<Option<SecretString>>,
	recovery_metadata: RwLock<Option<RecoveryMetadata>>,
	policies: RwLock<HashMap<PolicyId, Policy>>,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self {
			lifecycle: Mutex::new(Lifecycle::Uninitialized),
			secrets: RwLock::new(HashMap::new()),
			admin_token: RwLock::new(None),
			recovery_metadata: RwLock::new(None),
			policies: RwLock::new(HashMap::new()),
		}
	}

	fn ensure_open(&self) -> BackendResult<()> {
		match *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) {
			Lifecycle::Open => Ok(()),
			Lifecycle::Uninitialized => Err(BackendError::NotInitialized),
			Lifecycle::Closed => Err(BackendError::Closed),
		}
	}
}

impl Default for MemoryBackend {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Backend for MemoryBackend {
	async fn initialize(&self) -> BackendResult<()> {
		let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
		match *lifecycle {
			Lifecycle::Uninitialized => {
				*lifecycle = Lifecycle::Open;
				debug!("memory backend initialized");
				Ok(())
			}
			Lifecycle::Open => Err(BackendError::AlreadyInitialized),
			Lifecycle::Closed => Err(BackendError::Closed),
		}
	}

	async fn close(&self) -> BackendResult<()> {
		let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
		*lifecycle = Lifecycle::Closed;
		Ok(())
	}

	#[instrument(skip(self, secret), fields(path = %path))]
	async fn store_secret(&self, path: &SecretPath, secret: &StoredSecret) -> BackendResult<()> {
		self.ensure_open()?;
		self.secrets.write().await.insert(path.clone(), secret.clone());
		Ok(())
	}

	#[instrument(skip(self), fields(path = %path))]
	async fn load_secret(&self, path: &SecretPath) -> BackendResult<StoredSecret> {
		self.ensure_open()?;
		self.secrets
			.read()
			.await
			.get(path)
			.cloned()
			.ok_or_else(|| BackendError::not_found("secret", path.as_str()))
	}

	async fn list_secret_paths(&self) -> BackendResult<Vec<SecretPath>> {
		self.ensure_open()?;
		let mut paths: Vec<SecretPath> = self.secrets.read().await.keys().cloned().collect();
		paths.sort();
		Ok(paths)
	}

	async fn store_admin_token(&self, token: &SecretString) -> BackendResult<()> {
		self.ensure_open()?;
		*self.admin_token.write().await = Some(token.clone());
		Ok(())
	}

	async fn load_admin_signing_token(&self) -> BackendResult<SecretString> {
		self.ensure_open()?;
		self.admin_token
			.read()
			.await
			.clone()
			.ok_or_else(|| BackendError::not_found("admin token", "current"))
	}

	async fn store_admin_recovery_metadata(&self, metadata: &RecoveryMetadata) -> BackendResult<()> {
		self.ensure_open()?;
		*self.recovery_metadata.write().await = Some(metadata.clone());
		Ok(())
	}

	async fn load_admin_recovery_metadata(&self) -> BackendResult<RecoveryMetadata> {
		self.ensure_open()?;
		self.recovery_metadata
			.read()
			.await
			.clone()
			.ok_or_else(|| BackendError::not_found("recovery metadata", "current"))
	}

	async fn delete_admin_recovery_metadata(&self) -> BackendResult<()> {
		self.ensure_open()?;
		*self.recovery_metadata.write().await = None;
		Ok(())
	}

	#[instrument(skip(self, policy), fields(policy_id = %policy.id, name = %policy.name))]
	async fn store_policy(&self, policy: &Policy) -> BackendResult<()> {
		self.ensure_open()?;
		let mut policies = self.policies.write().await;
		if policies
			.values()
			.any(|p| p.name == policy.name && p.id != policy.id)
		{
			return Err(BackendError::Conflict(format!(
				"policy name already exists: {}",
				policy.name
			)));
		}
		policies.insert(policy.id, policy.clone());
		Ok(())
	}

	async fn load_policy(&self, id: PolicyId) -> BackendResult<Policy> {
		self.ensure_open()?;
		self.policies
			.read()
			.await
			.get(&id)
			.cloned()
			.ok_or_else(|| BackendError::not_found("policy", id.to_string()))
	}

	async fn delete_policy(&self, id: PolicyId) -> BackendResult<()> {
		self.ensure_open()?;
		match self.policies.write().await.remove(&id) {
			Some(_) => Ok(()),
			None => Err(BackendError::not_found("policy", id.to_string())),
		}
	}

	async fn list_policies(&self) -> BackendResult<Vec<Policy>> {
		self.ensure_open()?;
		let mut policies: Vec<Policy> = self.policies.read().await.values().cloned().collect();
		policies.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(policies)
	}
}
