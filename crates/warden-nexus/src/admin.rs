// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Admin bearer token: install, verify, rotate.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};
use warden_backend::Backend;
use warden_core::SecretString;

use crate::error::{NexusError, NexusResult};

pub const MIN_TOKEN_LEN: usize = 16;

pub struct AdminTokens {
	backend: Arc<dyn Backend>,
}

impl AdminTokens {
	pub fn new(backend: Arc<dyn Backend>) -> Self {
		Self { backend }
	}

	/// Store `token` as the admin credential, replacing any previous one.
	pub async fn install(&self, token: &SecretString) -> NexusResult<()> {
		if token.expose().len() < MIN_TOKEN_LEN {
			return Err(NexusError::Invalid(format!(
				"admin token must be at least {MIN_TOKEN_LEN} characters"
			)));
		}
		self.backend.store_admin_token(token).await?;
		Ok(())
	}

	/// Check a presented bearer token. No stored token means nobody is admin.
	pub async fn verify(&self, presented: Option<&str>) -> NexusResult<()> {
		let Some(presented) = presented else {
			return Err(NexusError::Unauthorized);
		};
		let stored = match self.backend.load_admin_signing_token().await {
			Ok(stored) => stored,
			Err(e) if e.is_not_found() => {
				warn!("admin request rejected: no admin token installed");
				return Err(NexusError::Unauthorized);
			}
			Err(e) => return Err(e.into()),
		};
		// Compare fixed-length digests, not the raw strings.
		let expected = Sha256::digest(stored.expose().as_bytes());
		let got = Sha256::digest(presented.as_bytes());
		if bool::from(expected.as_slice().ct_eq(got.as_slice())) {
			Ok(())
		} else {
			Err(NexusError::Unauthorized)
		}
	}

	#[instrument(skip_all)]
	pub async fn rotate(&self, presented: Option<&str>, new_token: &SecretString) -> NexusResult<()> {
		self.verify(presented).await?;
		self.install(new_token).await?;
		info!("admin token rotated");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use warden_backend::MemoryBackend;

	async fn tokens() -> AdminTokens {
		let backend = Arc::new(MemoryBackend::new());
		backend.initialize().await.unwrap();
		AdminTokens::new(backend)
	}

	fn token(raw: &str) -> SecretString {
		SecretString::new(raw.to_string())
	}

	#[tokio::test]
	async fn nothing_verifies_before_install() {
		let admin = tokens().await;
		assert!(matches!(
			admin.verify(Some("anything-at-all-long")).await,
			Err(NexusError::Unauthorized)
		));
	}

	#[tokio::test]
	async fn short_tokens_are_refused() {
		let admin = tokens().await;
		assert!(matches!(
			admin.install(&token("short")).await,
			Err(NexusError::Invalid(_))
		));
	}

	#[tokio::test]
	async fn rotate_requires_current_token() {
		let admin = tokens().await;
		admin.install(&token("first-admin-token")).await.unwrap();

		assert!(matches!(
			admin.rotate(Some("wrong-admin-token"), &token("second-admin-token")).await,
			Err(NexusError::Unauthorized)
		));
		assert!(matches!(
			admin.rotate(None, &token("second-admin-token")).await,
			Err(NexusError::Unauthorized)
		));

		admin
			.rotate(Some("first-admin-token"), &token("second-admin-token"))
			.await
			.unwrap();
		assert!(admin.verify(Some("second-admin-token")).await.is_ok());
		assert!(admin.verify(Some("first-admin-token")).await.is_err());
	}
}
