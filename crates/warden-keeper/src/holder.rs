// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The one share a keeper holds. Memory only: a restarted keeper is empty
//! until nexus re-seeds it.

use std::sync::RwLock;

use tracing::info;
use warden_core::KeyId;
use warden_custody::KeyShare;

#[derive(Default)]
pub struct ShareHolder {
	held: RwLock<Option<(KeyId, KeyShare)>>,
}

impl ShareHolder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Keep `share` for `key_id`, replacing whatever was held before.
	pub fn store(&self, key_id: KeyId, share: KeyShare) {
		let mut held = self.held.write().unwrap_or_else(|e| e.into_inner());
		let replaced = held.as_ref().map(|(id, _)| id != &key_id);
		info!(%key_id, index = share.index, replaced_other_key = replaced.unwrap_or(false), "share stored");
		*held = Some((key_id, share));
	}

	/// The held share, only if it belongs to `key_id`.
	pub fn get(&self, key_id: &KeyId) -> Option<KeyShare> {
		let held = self.held.read().unwrap_or_else(|e| e.into_inner());
		match held.as_ref() {
			Some((id, share)) if id == key_id => Some(share.clone()),
			_ => None,
		}
	}

	pub fn held_key(&self) -> Option<KeyId> {
		let held = self.held.read().unwrap_or_else(|e| e.into_inner());
		held.as_ref().map(|(id, _)| id.clone())
	}
}
