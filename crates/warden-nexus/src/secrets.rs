// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Versioned secret operations on top of the backend.
//!
//! The backend stores whole records. Every mutation here is a
//! read-modify-write, serialized per path by [`KeyedLocks`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};
use warden_backend::{Backend, BackendError};
use warden_core::{SecretMeta, SecretPath, SecretVersion, StoredSecret, ValidationError};

use crate::error::{NexusError, NexusResult};
use crate::locks::KeyedLocks;

pub struct SecretsService {
	backend: Arc<dyn Backend>,
	locks: KeyedLocks<SecretPath>,
	max_versions: u32,
}

impl SecretsService {
	pub fn new(backend: Arc<dyn Backend>, max_versions: u32) -> Self {
		Self {
			backend,
			locks: KeyedLocks::new(),
			max_versions,
		}
	}

	/// Write a new version. Returns its number.
	#[instrument(skip(self, values), fields(path = %path, keys = values.len()))]
	pub async fn put(
		&self,
		path: &SecretPath,
		values: BTreeMap<String, String>,
	) -> NexusResult<u32> {
		if values.is_empty() {
			return Err(ValidationError::EmptySecret.into());
		}
		let _guard = self.locks.lock(path).await;

		let now = Utc::now();
		let mut stored = match self.backend.load_secret(path).await {
			Ok(stored) => stored,
			Err(e) if e.is_not_found() => StoredSecret::new(self.max_versions, now),
			Err(e) => return Err(e.into()),
		};
		let version = stored.put(values, now);
		self.backend.store_secret(path, &stored).await?;
		debug!(version, "secret version written");
		Ok(version)
	}

	/// Read a live version; `None` means current.
	#[instrument(skip(self), fields(path = %path))]
	pub async fn get(&self, path: &SecretPath, version: Option<u32>) -> NexusResult<SecretVersion> {
		let stored = self.load(path).await?;
		stored.get(version).cloned().ok_or_else(|| match version {
			Some(v) => NexusError::not_found(format!("version {v} of secret {path}")),
			None => NexusError::not_found(format!("secret {path}")),
		})
	}

	/// Soft-delete versions. An empty list means the current version.
	#[instrument(skip(self), fields(path = %path))]
	pub async fn delete(&self, path: &SecretPath, versions: &[u32]) -> NexusResult<()> {
		let _guard = self.locks.lock(path).await;
		let mut stored = self.load(path).await?;
		stored.delete(versions, Utc::now());
		self.backend.store_secret(path, &stored).await?;
		Ok(())
	}

	/// Restore soft-deleted versions. An empty list means the newest.
	#[instrument(skip(self), fields(path = %path))]
	pub async fn undelete(&self, path: &SecretPath, versions: &[u32]) -> NexusResult<()> {
		let _guard = self.locks.lock(path).await;
		let mut stored = self.load(path).await?;
		stored.undelete(versions, Utc::now());
		self.backend.store_secret(path, &stored).await?;
		Ok(())
	}

	pub async fn list(&self) -> NexusResult<Vec<SecretPath>> {
		Ok(self.backend.list_secret_paths().await?)
	}

	/// Bookkeeping and per-version timestamps. Values are not returned.
	#[instrument(skip(self), fields(path = %path))]
	pub async fn metadata(&self, path: &SecretPath) -> NexusResult<(SecretMeta, Vec<SecretVersion>)> {
		let stored = self.load(path).await?;
		let versions = stored
			.versions
			.into_values()
			.map(|mut v| {
				v.data.clear();
				v
			})
			.collect();
		Ok((stored.meta, versions))
	}

	async fn load(&self, path: &SecretPath) -> NexusResult<StoredSecret> {
		self.backend.load_secret(path).await.map_err(|e| match e {
			BackendError::NotFound { .. } => NexusError::not_found(format!("secret {path}")),
			other => other.into(),
		})
	}
}
