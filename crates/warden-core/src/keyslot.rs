// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process-wide home of the resident root key.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::crypto::RootKey;

/// Shared handle to the in-memory root key.
///
/// Backends read it for every encrypt/decrypt; only the custody manager
/// installs a key. An empty slot means the service is sealed.
#[derive(Clone, Default)]
pub struct RootKeySlot {
	inner: Arc<RwLock<Option<Arc<RootKey>>>>,
}

impl RootKeySlot {
	pub fn new() -> Self {
		Self::default()
	}

	/// Current key, if one has been installed.
	pub fn get(&self) -> Option<Arc<RootKey>> {
		let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
		guard.clone()
	}

	pub fn is_sealed(&self) -> bool {
		self.get().is_none()
	}

	/// Install a key. A previously installed key is replaced, never mutated.
	pub fn install(&self, key: RootKey) -> Arc<RootKey> {
		let key = Arc::new(key);
		let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
		let replaced = guard.replace(Arc::clone(&key)).is_some();
		debug!(replaced, "root key installed");
		key
	}

	/// Drop the resident key, sealing the service again.
	pub fn clear(&self) {
		let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
		if guard.take().is_some() {
			debug!("root key cleared");
		}
	}
}

impl std::fmt::Debug for RootKeySlot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RootKeySlot")
			.field("sealed", &self.is_sealed())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_slot_is_sealed() {
		assert!(RootKeySlot::new().is_sealed());
	}

	#[test]
	fn clones_share_the_installed_key() {
		let slot = RootKeySlot::new();
		let reader = slot.clone();
		let installed = slot.install(RootKey::generate());

		let seen = reader.get().unwrap();
		assert_eq!(seen.as_bytes(), installed.as_bytes());

		slot.clear();
		assert!(reader.is_sealed());
	}
}
