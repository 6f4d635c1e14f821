// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy store. Thin layer over the backend: identity, timestamps, validation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument};
use warden_backend::{Backend, BackendError};
use warden_core::{Policy, PolicyId, PolicyPermission};

use crate::error::{NexusError, NexusResult};

/// Caller-supplied fields of a new policy.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyInput {
	pub name: String,
	pub spiffe_id_pattern: String,
	pub path_pattern: String,
	pub permissions: BTreeSet<PolicyPermission>,
}

pub struct PolicyStore {
	backend: Arc<dyn Backend>,
}

impl PolicyStore {
	pub fn new(backend: Arc<dyn Backend>) -> Self {
		Self { backend }
	}

	#[instrument(skip(self, input), fields(name = %input.name))]
	pub async fn create(&self, input: PolicyInput, created_by: &str) -> NexusResult<Policy> {
		let policy = Policy {
			id: PolicyId::generate(),
			name: input.name.trim().to_string(),
			spiffe_id_pattern: input.spiffe_id_pattern,
			path_pattern: input.path_pattern,
			permissions: input.permissions,
			created_at: Utc::now(),
			created_by: created_by.to_string(),
		};
		policy.validate()?;
		self.backend.store_policy(&policy).await?;
		info!(policy_id = %policy.id, "policy created");
		Ok(policy)
	}

	pub async fn get(&self, id: PolicyId) -> NexusResult<Policy> {
		self.backend.load_policy(id).await.map_err(|e| not_found(e, id))
	}

	#[instrument(skip(self), fields(policy_id = %id))]
	pub async fn delete(&self, id: PolicyId) -> NexusResult<()> {
		self.backend.delete_policy(id).await.map_err(|e| not_found(e, id))?;
		info!("policy deleted");
		Ok(())
	}

	pub async fn list(&self) -> NexusResult<Vec<Policy>> {
		Ok(self.backend.list_policies().await?)
	}
}

fn not_found(e: BackendError, id: PolicyId) -> NexusError {
	if e.is_not_found() {
		NexusError::not_found(format!("policy {id}"))
	} else {
		e.into()
	}
}
