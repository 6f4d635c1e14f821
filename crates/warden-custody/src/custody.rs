// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Root key custody: generate, split, verify, reconstruct, activate.
//!
//! [`KeyCustody`] is the only writer of the [`RootKeySlot`]. Everything else
//! holds a clone of the slot and reads it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};
use warden_core::{
	KeyId, KeyVerification, RecoveryMetadata, RootKey, RootKeySlot, RECOVERY_SCHEME_VERSION,
};
use zeroize::Zeroizing;

use crate::error::{CustodyError, CustodyResult};
use crate::shamir::{self, KeyShare, SHARE_SIZE};

const COEFFICIENT_CONTEXT: &[u8] = b"warden/shamir-coefficients/v1";

/// Upper bound on k-subsets tried before giving up on a share set.
const MAX_COMBINATIONS: usize = 1024;

/// A freshly generated key together with its shares and metadata.
#[derive(Debug)]
pub struct SplitOutcome {
	pub shares: Vec<KeyShare>,
	pub metadata: RecoveryMetadata,
	pub key: RootKey,
}

#[derive(Debug, Clone)]
pub struct KeyCustody {
	slot: RootKeySlot,
}

impl KeyCustody {
	pub fn new(slot: RootKeySlot) -> Self {
		Self { slot }
	}

	pub fn slot(&self) -> &RootKeySlot {
		&self.slot
	}

	/// Generate a new root key and split it into `n` shares with threshold `k`.
	///
	/// The key is returned, not activated.
	#[instrument(skip(self))]
	pub fn generate_and_split(&self, n: usize, k: usize) -> CustodyResult<SplitOutcome> {
		let (n, k) = validate_parameters(n, k)?;
		let key = RootKey::generate();
		let key_id = KeyId::generate();
		let shares = split_validated(&key, n, k);
		let metadata = build_metadata(&key, key_id, &shares, k);
		debug!(key_id = %metadata.key_id, n, k, "generated root key");
		Ok(SplitOutcome {
			shares,
			metadata,
			key,
		})
	}

	/// Split an existing key. Deterministic for a given key, `n` and `k`.
	pub fn split(key: &RootKey, n: usize, k: usize) -> CustodyResult<Vec<KeyShare>> {
		let (n, k) = validate_parameters(n, k)?;
		Ok(split_validated(key, n, k))
	}

	/// Whether `share` is one of the shares recorded in `metadata`.
	pub fn share_matches(metadata: &RecoveryMetadata, share: &KeyShare) -> bool {
		share.index != 0
			&& share.index <= metadata.total_shares
			&& metadata
				.share_digests
				.get(&share.index)
				.is_some_and(|digest| *digest == share.digest())
	}

	/// Rebuild the root key from `shares` and check it against `metadata`.
	///
	/// Duplicate indices collapse to the first occurrence. Shares that do not
	/// match a recorded digest are dropped before interpolation. The key is
	/// not activated.
	#[instrument(skip(self, metadata, shares), fields(key_id = %metadata.key_id, offered = shares.len()))]
	pub fn reconstruct(
		&self,
		metadata: &RecoveryMetadata,
		shares: &[KeyShare],
	) -> CustodyResult<RootKey> {
		let need = metadata.threshold as usize;
		if need == 0 {
			return Err(CustodyError::InvalidParameters(
				"recovery metadata has a zero threshold".to_string(),
			));
		}

		let mut distinct: BTreeMap<u8, &KeyShare> = BTreeMap::new();
		for share in shares {
			if !Self::share_matches(metadata, share) {
				warn!(index = share.index, "discarding share that does not match recovery metadata");
				continue;
			}
			distinct.entry(share.index).or_insert(share);
		}

		let candidates: Vec<&KeyShare> = distinct.into_values().collect();
		if candidates.len() < need {
			return Err(CustodyError::InsufficientShares {
				have: candidates.len(),
				need,
			});
		}

		for (attempt, subset) in Combinations::new(candidates.len(), need)
			.take(MAX_COMBINATIONS)
			.enumerate()
		{
			let picked: Vec<&KeyShare> = subset.iter().map(|&i| candidates[i]).collect();
			let secret = shamir::combine(&picked);
			let key = RootKey::from_slice(secret.as_slice())?;
			if metadata
				.verification
				.matches(&key, metadata.key_id.as_str())
			{
				debug!(attempt, "reconstructed root key verified");
				return Ok(key);
			}
		}

		Err(CustodyError::VerificationFailure {
			key_id: metadata.key_id.clone(),
		})
	}

	/// Install `key` as the resident root key.
	pub fn activate(&self, key: RootKey) -> Arc<RootKey> {
		self.slot.install(key)
	}

	pub fn is_active(&self) -> bool {
		!self.slot.is_sealed()
	}

	pub fn resident_key(&self) -> Option<Arc<RootKey>> {
		self.slot.get()
	}
}

fn validate_parameters(n: usize, k: usize) -> CustodyResult<(u8, u8)> {
	if n == 0 {
		return Err(CustodyError::InvalidParameters(
			"share count must be at least 1".to_string(),
		));
	}
	if n > u8::MAX as usize {
		return Err(CustodyError::InvalidParameters(format!(
			"share count {n} exceeds 255"
		)));
	}
	if k == 0 {
		return Err(CustodyError::InvalidParameters(
			"threshold must be at least 1".to_string(),
		));
	}
	if k > n {
		return Err(CustodyError::InvalidParameters(format!(
			"threshold {k} exceeds share count {n}"
		)));
	}
	Ok((n as u8, k as u8))
}

fn split_validated(key: &RootKey, n: u8, k: u8) -> Vec<KeyShare> {
	shamir::split(key.as_bytes(), n, k, |degree| {
		let coefficients: Zeroizing<[u8; SHARE_SIZE]> =
			Zeroizing::new(key.mac(&[COEFFICIENT_CONTEXT, &[degree], &[n], &[k]]));
		coefficients
	})
}

fn build_metadata(key: &RootKey, key_id: KeyId, shares: &[KeyShare], k: u8) -> RecoveryMetadata {
	RecoveryMetadata {
		scheme_version: RECOVERY_SCHEME_VERSION,
		verification: KeyVerification::compute(key, key_id.as_str()),
		key_id,
		total_shares: shares.len() as u8,
		threshold: k,
		share_digests: shares.iter().map(|s| (s.index, s.digest())).collect(),
		created_at: Utc::now(),
	}
}

/// Lexicographic k-combinations of `0..n`.
struct Combinations {
	indices: Vec<usize>,
	n: usize,
	done: bool,
}

impl Combinations {
	fn new(n: usize, k: usize) -> Self {
		Self {
			indices: (0..k).collect(),
			n,
			done: k > n,
		}
	}
}

impl Iterator for Combinations {
	type Item = Vec<usize>;

	fn next(&mut self) -> Option<Vec<usize>> {
		if self.done {
			return None;
		}
		let current = self.indices.clone();

		let k = self.indices.len();
		let mut i = k;
		loop {
			if i == 0 {
				self.done = true;
				break;
			}
			i -= 1;
			if self.indices[i] < self.n - k + i {
				self.indices[i] += 1;
				for j in i + 1..k {
					self.indices[j] = self.indices[j - 1] + 1;
				}
				break;
			}
		}
		Some(current)
	}
}
