// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-path async locks for read-modify-write of versioned secrets.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async mutex per key. Entries are dropped once unused.
pub struct KeyedLocks<K> {
	locks: Mutex<HashMap<K, Weak<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
	pub fn new() -> Self {
		Self {
			locks: Mutex::new(HashMap::new()),
		}
	}

	/// Wait for exclusive access to `key`.
	pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
		let mutex = {
			let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
			locks.retain(|_, weak| weak.strong_count() > 0);
			match locks.get(key).and_then(Weak::upgrade) {
				Some(existing) => existing,
				None => {
					let fresh = Arc::new(AsyncMutex::new(()));
					locks.insert(key.clone(), Arc::downgrade(&fresh));
					fresh
				}
			}
		};
		mutex.lock_owned().await
	}

	#[cfg(test)]
	fn tracked(&self) -> usize {
		self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
	}
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn same_key_is_exclusive() {
		let locks = Arc::new(KeyedLocks::<String>::new());
		let held = locks.lock(&"a".to_string()).await;

		let contender = {
			let locks = Arc::clone(&locks);
			tokio::spawn(async move {
				let _guard = locks.lock(&"a".to_string()).await;
			})
		};
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!contender.is_finished());

		drop(held);
		tokio::time::timeout(Duration::from_secs(1), contender)
			.await
			.unwrap()
			.unwrap();
	}

	#[tokio::test]
	async fn different_keys_do_not_block() {
		let locks = KeyedLocks::<String>::new();
		let _a = locks.lock(&"a".to_string()).await;
		tokio::time::timeout(Duration::from_secs(1), locks.lock(&"b".to_string()))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn released_entries_are_pruned() {
		let locks = KeyedLocks::<String>::new();
		drop(locks.lock(&"a".to_string()).await);
		let _b = locks.lock(&"b".to_string()).await;
		assert_eq!(locks.tracked(), 1);
	}
}
