// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use tokio::sync::watch;
use warden_backend::Backend;
use warden_custody::RecoveryState;

use crate::admin::AdminTokens;
use crate::policy::PolicyStore;
use crate::secrets::SecretsService;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
	pub secrets: Arc<SecretsService>,
	pub policies: Arc<PolicyStore>,
	pub admin: Arc<AdminTokens>,
	pub recovery: watch::Receiver<RecoveryState>,
}

impl AppState {
	pub fn new(
		backend: Arc<dyn Backend>,
		max_versions: u32,
		recovery: watch::Receiver<RecoveryState>,
	) -> Self {
		Self {
			secrets: Arc::new(SecretsService::new(Arc::clone(&backend), max_versions)),
			policies: Arc::new(PolicyStore::new(Arc::clone(&backend))),
			admin: Arc::new(AdminTokens::new(backend)),
			recovery,
		}
	}

	pub fn recovery_state(&self) -> RecoveryState {
		self.recovery.borrow().clone()
	}
}
