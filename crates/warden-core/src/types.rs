// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Domain model: versioned secrets, access policies and recovery metadata.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::KeyVerification;
use crate::error::ValidationError;

/// Versions kept per secret unless configured otherwise.
pub const DEFAULT_MAX_VERSIONS: u32 = 10;

/// Format version of [`RecoveryMetadata`].
pub const RECOVERY_SCHEME_VERSION: u32 = 1;

const MAX_PATH_LEN: usize = 1024;

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl FromStr for $name {
			type Err = uuid::Error;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Uuid::parse_str(s).map(Self)
			}
		}
	};
}

define_id_type!(PolicyId, "Unique identifier for an access policy.");

/// Identifier of one root key generation.
///
/// Recovery metadata and every share carry it, so a custodian never hands out
/// a share belonging to a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// 128 random bits, hex encoded.
	pub fn generate() -> Self {
		let mut bytes = [0u8; 16];
		rand::rngs::OsRng.fill_bytes(&mut bytes);
		Self(hex::encode(bytes))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for KeyId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// A validated hierarchical secret path such as `apps/billing/db`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SecretPath(String);

impl SecretPath {
	/// Normalize and validate a path. Leading and trailing `/` are stripped.
	pub fn parse(raw: &str) -> Result<Self, ValidationError> {
		let invalid = |reason| ValidationError::Path {
			path: raw.to_string(),
			reason,
		};

		let trimmed = raw.trim_matches('/');
		if trimmed.is_empty() {
			return Err(invalid("path is empty"));
		}
		if trimmed.len() > MAX_PATH_LEN {
			return Err(invalid("path exceeds 1024 bytes"));
		}
		for segment in trimmed.split('/') {
			match segment {
				"" => return Err(invalid("empty path segment")),
				"." | ".." => return Err(invalid("relative path segment")),
				s if s.chars().any(char::is_control) => {
					return Err(invalid("control character in path"))
				}
				_ => {}
			}
		}
		Ok(Self(trimmed.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Associated data binding a ciphertext to this path and version.
	pub fn record_aad(&self, version: u32) -> Vec<u8> {
		format!("{}:{}", self.0, version).into_bytes()
	}
}

impl fmt::Display for SecretPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for SecretPath {
	type Err = ValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl<'de> Deserialize<'de> for SecretPath {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		Self::parse(&raw).map_err(serde::de::Error::custom)
	}
}

/// One version of a secret's key/value data.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretVersion {
	pub version: u32,
	pub data: BTreeMap<String, String>,
	pub created_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl SecretVersion {
	pub fn is_deleted(&self) -> bool {
		self.deleted_at.is_some()
	}
}

impl fmt::Debug for SecretVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SecretVersion")
			.field("version", &self.version)
			.field("keys", &self.data.keys().collect::<Vec<_>>())
			.field("created_at", &self.created_at)
			.field("deleted_at", &self.deleted_at)
			.finish()
	}
}

/// Bookkeeping kept alongside the versions of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMeta {
	/// Latest non-deleted version, or 0 when every version is deleted.
	pub current_version: u32,
	pub oldest_version: u32,
	pub max_versions: u32,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// The full record stored at one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSecret {
	pub versions: BTreeMap<u32, SecretVersion>,
	pub meta: SecretMeta,
}

impl StoredSecret {
	pub fn new(max_versions: u32, now: DateTime<Utc>) -> Self {
		Self {
			versions: BTreeMap::new(),
			meta: SecretMeta {
				current_version: 0,
				oldest_version: 0,
				max_versions: max_versions.max(1),
				created_at: now,
				updated_at: now,
			},
		}
	}

	/// Append a new version and make it current. Returns its number.
	pub fn put(&mut self, data: BTreeMap<String, String>, now: DateTime<Utc>) -> u32 {
		let version = self.versions.keys().next_back().copied().unwrap_or(0) + 1;
		self.versions.insert(
			version,
			SecretVersion {
				version,
				data,
				created_at: now,
				deleted_at: None,
			},
		);
		self.meta.current_version = version;
		self.meta.updated_at = now;
		self.prune();
		version
	}

	fn prune(&mut self) {
		while self.versions.len() > self.meta.max_versions as usize {
			self.versions.pop_first();
		}
		self.meta.oldest_version = self.versions.keys().next().copied().unwrap_or(0);
	}

	/// A live version: `None` asks for the current one. Deleted versions are hidden.
	pub fn get(&self, version: Option<u32>) -> Option<&SecretVersion> {
		let wanted = match version {
			Some(v) => v,
			None => self.meta.current_version,
		};
		self.versions.get(&wanted).filter(|v| !v.is_deleted())
	}

	pub fn current(&self) -> Option<&SecretVersion> {
		self.get(None)
	}

	/// Soft-delete versions. An empty list means the current version.
	pub fn delete(&mut self, versions: &[u32], now: DateTime<Utc>) {
		let targets = self.targets(versions);
		for v in targets {
			if let Some(entry) = self.versions.get_mut(&v) {
				if entry.deleted_at.is_none() {
					entry.deleted_at = Some(now);
				}
			}
		}
		self.meta.current_version = self
			.versions
			.values()
			.rev()
			.find(|v| !v.is_deleted())
			.map(|v| v.version)
			.unwrap_or(0);
		self.meta.updated_at = now;
	}

	/// Restore soft-deleted versions. Restoring a version newer than the
	/// current one makes it current.
	pub fn undelete(&mut self, versions: &[u32], now: DateTime<Utc>) {
		let targets = if versions.is_empty() {
			// Nothing is current after a full delete; restore the newest.
			self.versions.keys().next_back().copied().into_iter().collect()
		} else {
			versions.to_vec()
		};
		for v in targets {
			if let Some(entry) = self.versions.get_mut(&v) {
				entry.deleted_at = None;
				if v > self.meta.current_version {
					self.meta.current_version = v;
				}
			}
		}
		self.meta.updated_at = now;
	}

	fn targets(&self, versions: &[u32]) -> Vec<u32> {
		if versions.is_empty() {
			if self.meta.current_version == 0 {
				Vec::new()
			} else {
				vec![self.meta.current_version]
			}
		} else {
			versions.to_vec()
		}
	}

	/// True when no version is readable.
	pub fn is_fully_deleted(&self) -> bool {
		self.meta.current_version == 0
	}
}

/// Permission granted by a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPermission {
	Read,
	Write,
	List,
	/// Implies every other permission.
	Super,
}

impl PolicyPermission {
	pub fn as_str(&self) -> &'static str {
		match self {
			PolicyPermission::Read => "read",
			PolicyPermission::Write => "write",
			PolicyPermission::List => "list",
			PolicyPermission::Super => "super",
		}
	}
}

impl fmt::Display for PolicyPermission {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// An access policy. Patterns are opaque to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
	pub id: PolicyId,
	pub name: String,
	pub spiffe_id_pattern: String,
	pub path_pattern: String,
	pub permissions: BTreeSet<PolicyPermission>,
	pub created_at: DateTime<Utc>,
	pub created_by: String,
}

impl Policy {
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.name.trim().is_empty() {
			return Err(ValidationError::Policy("name must not be empty".into()));
		}
		if self.spiffe_id_pattern.trim().is_empty() {
			return Err(ValidationError::Policy(
				"spiffe_id_pattern must not be empty".into(),
			));
		}
		if self.path_pattern.trim().is_empty() {
			return Err(ValidationError::Policy(
				"path_pattern must not be empty".into(),
			));
		}
		if self.permissions.is_empty() {
			return Err(ValidationError::Policy(
				"at least one permission is required".into(),
			));
		}
		Ok(())
	}
}

/// Everything needed to validate a reconstructed root key.
///
/// Holds no key material: the verification tag is a MAC under the key, and the
/// share digests are hashes of the individual shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryMetadata {
	pub scheme_version: u32,
	pub key_id: KeyId,
	pub total_shares: u8,
	pub threshold: u8,
	pub verification: KeyVerification,
	/// Share index to hex SHA-256 of the share payload.
	pub share_digests: BTreeMap<u8, String>,
	pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn data(value: &str) -> BTreeMap<String, String> {
		BTreeMap::from([("password".to_string(), value.to_string())])
	}

	#[test]
	fn path_normalization() {
		assert_eq!(SecretPath::parse("/apps/db/").unwrap().as_str(), "apps/db");
		assert_eq!(SecretPath::parse("single").unwrap().as_str(), "single");
	}

	#[test]
	fn path_rejections() {
		for bad in ["", "/", "//", "a//b", "a/../b", "./a", "a/.", "a/\u{7}"] {
			assert!(SecretPath::parse(bad).is_err(), "{bad:?} should be rejected");
		}
		assert!(SecretPath::parse(&"a".repeat(1025)).is_err());
		assert!(SecretPath::parse(&"a".repeat(1024)).is_ok());
	}

	#[test]
	fn path_deserialize_validates() {
		assert!(serde_json::from_str::<SecretPath>("\"a/../b\"").is_err());
		let path: SecretPath = serde_json::from_str("\"/a/b\"").unwrap();
		assert_eq!(path.as_str(), "a/b");
	}

	#[test]
	fn put_assigns_increasing_versions() {
		let now = Utc::now();
		let mut secret = StoredSecret::new(DEFAULT_MAX_VERSIONS, now);
		assert_eq!(secret.put(data("one"), now), 1);
		assert_eq!(secret.put(data("two"), now), 2);
		assert_eq!(secret.current().unwrap().data, data("two"));
		assert_eq!(secret.get(Some(1)).unwrap().data, data("one"));
	}

	#[test]
	fn versions_are_pruned_oldest_first() {
		let now = Utc::now();
		let mut secret = StoredSecret::new(3, now);
		for i in 0..5 {
			secret.put(data(&i.to_string()), now);
		}
		assert_eq!(secret.versions.len(), 3);
		assert_eq!(secret.meta.oldest_version, 3);
		assert_eq!(secret.meta.current_version, 5);
		assert!(secret.get(Some(2)).is_none());
	}

	#[test]
	fn deleting_current_falls_back_to_previous() {
		let now = Utc::now();
		let mut secret = StoredSecret::new(DEFAULT_MAX_VERSIONS, now);
		secret.put(data("one"), now);
		secret.put(data("two"), now);

		secret.delete(&[], now);
		assert_eq!(secret.meta.current_version, 1);
		assert!(secret.get(Some(2)).is_none());

		secret.delete(&[1], now);
		assert!(secret.is_fully_deleted());
		assert!(secret.current().is_none());
	}

	#[test]
	fn undelete_restores_and_promotes() {
		let now = Utc::now();
		let mut secret = StoredSecret::new(DEFAULT_MAX_VERSIONS, now);
		secret.put(data("one"), now);
		secret.put(data("two"), now);
		secret.delete(&[1, 2], now);

		secret.undelete(&[1], now);
		assert_eq!(secret.meta.current_version, 1);
		secret.undelete(&[2], now);
		assert_eq!(secret.meta.current_version, 2);
		assert_eq!(secret.current().unwrap().data, data("two"));
	}

	#[test]
	fn undelete_without_versions_restores_newest() {
		let now = Utc::now();
		let mut secret = StoredSecret::new(DEFAULT_MAX_VERSIONS, now);
		secret.put(data("one"), now);
		secret.delete(&[], now);
		secret.undelete(&[], now);
		assert_eq!(secret.meta.current_version, 1);
	}

	#[test]
	fn secret_version_debug_hides_values() {
		let now = Utc::now();
		let mut secret = StoredSecret::new(DEFAULT_MAX_VERSIONS, now);
		secret.put(data("hunter2"), now);
		let debug = format!("{secret:?}");
		assert!(debug.contains("password"));
		assert!(!debug.contains("hunter2"));
	}

	#[test]
	fn policy_validation() {
		let mut policy = Policy {
			id: PolicyId::generate(),
			name: "billing-readers".into(),
			spiffe_id_pattern: "^spiffe://example.org/billing/.*$".into(),
			path_pattern: "^apps/billing/.*$".into(),
			permissions: BTreeSet::from([PolicyPermission::Read]),
			created_at: Utc::now(),
			created_by: "admin".into(),
		};
		assert!(policy.validate().is_ok());

		policy.permissions.clear();
		assert!(policy.validate().is_err());

		policy.permissions.insert(PolicyPermission::List);
		policy.name = "  ".into();
		assert!(policy.validate().is_err());
	}

	#[test]
	fn permission_serde_is_snake_case() {
		let json = serde_json::to_string(&PolicyPermission::Super).unwrap();
		assert_eq!(json, "\"super\"");
	}

	#[test]
	fn key_ids_are_unique_hex() {
		let a = KeyId::generate();
		let b = KeyId::generate();
		assert_ne!(a, b);
		assert_eq!(a.as_str().len(), 32);
		assert!(hex::decode(a.as_str()).is_ok());
	}

	#[test]
	fn recovery_metadata_json_roundtrip() {
		let key = crate::crypto::RootKey::generate();
		let key_id = KeyId::generate();
		let metadata = RecoveryMetadata {
			scheme_version: RECOVERY_SCHEME_VERSION,
			verification: KeyVerification::compute(&key, key_id.as_str()),
			key_id,
			total_shares: 3,
			threshold: 2,
			share_digests: BTreeMap::from([(1u8, "aa".to_string()), (2, "bb".into())]),
			created_at: Utc::now(),
		};
		let json = serde_json::to_string(&metadata).unwrap();
		let parsed: RecoveryMetadata = serde_json::from_str(&json).unwrap();
		assert_eq!(parsed, metadata);
		assert!(parsed.verification.matches(&key, parsed.key_id.as_str()));
	}

	proptest! {
		#[test]
		fn valid_segments_always_parse(segments in proptest::collection::vec("[a-zA-Z0-9_-]{1,12}", 1..8)) {
			let raw = segments.join("/");
			let path = SecretPath::parse(&format!("/{raw}/")).unwrap();
			prop_assert_eq!(path.as_str(), raw.as_str());
		}

		#[test]
		fn current_version_is_never_deleted(ops in proptest::collection::vec((any::<bool>(), 1u32..8), 1..30)) {
			let now = Utc::now();
			let mut secret = StoredSecret::new(5, now);
			for (is_put, v) in ops {
				if is_put {
					secret.put(BTreeMap::new(), now);
				} else {
					secret.delete(&[v], now);
				}
				if secret.meta.current_version != 0 {
					prop_assert!(secret.current().is_some());
				}
				prop_assert!(secret.versions.len() <= 5);
			}
		}
	}
}
