// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! At-rest encryption under the root key.
//!
//! Uses AES-256-GCM. Every ciphertext carries associated data naming the record
//! it belongs to, so a ciphertext copied to another path or version fails to
//! decrypt. Root keys are verified with an HMAC-SHA256 tag over a random salt.

use std::fmt;

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng, Payload},
	Aes256Gcm, Key, Nonce,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

/// Size of the root key in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the random salt mixed into the verification tag.
pub const SALT_SIZE: usize = 16;

const VERIFICATION_CONTEXT: &[u8] = b"warden/root-key-verification/v1";

type HmacSha256 = Hmac<Sha256>;

/// The root encryption key.
///
/// Deliberately has no `Serialize` impl and a redacted `Debug`: the only
/// durable forms of the key are its shares and its verification tag.
pub struct RootKey {
	bytes: Zeroizing<[u8; KEY_SIZE]>,
}

impl RootKey {
	/// Generate a fresh random root key.
	pub fn generate() -> Self {
		let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
		OsRng.fill_bytes(bytes.as_mut());
		Self { bytes }
	}

	pub fn from_bytes(bytes: Zeroizing<[u8; KEY_SIZE]>) -> Self {
		Self { bytes }
	}

	/// Build a key from a slice, e.g. the output of share interpolation.
	pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
		if slice.len() != KEY_SIZE {
			return Err(CryptoError::InvalidKeySize {
				expected: KEY_SIZE,
				actual: slice.len(),
			});
		}
		let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
		bytes.copy_from_slice(slice);
		Ok(Self { bytes })
	}

	/// Raw key bytes, for splitting and for the cipher.
	pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
		&self.bytes
	}

	/// Keyed HMAC-SHA256 over `parts`, using the root key as the MAC key.
	pub fn mac(&self, parts: &[&[u8]]) -> [u8; 32] {
		let mut mac = new_mac(self.bytes.as_slice());
		for part in parts {
			mac.update(part);
		}
		let mut out = [0u8; 32];
		out.copy_from_slice(&mac.finalize().into_bytes());
		out
	}
}

impl fmt::Debug for RootKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RootKey")
			.field("bytes", &crate::secret::REDACTED)
			.finish()
	}
}

fn new_mac(key: &[u8]) -> HmacSha256 {
	// HMAC accepts keys of any length; the error arm cannot be reached.
	match <HmacSha256 as Mac>::new_from_slice(key) {
		Ok(mac) => mac,
		Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
	}
}

/// Encrypted data with nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
	pub ciphertext: Vec<u8>,
	pub nonce: [u8; NONCE_SIZE],
}

impl EncryptedData {
	/// Rebuild from stored columns, validating the nonce length.
	pub fn from_parts(ciphertext: Vec<u8>, nonce: &[u8]) -> CryptoResult<Self> {
		let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| CryptoError::InvalidNonce {
			expected: NONCE_SIZE,
			actual: nonce.len(),
		})?;
		Ok(Self { ciphertext, nonce })
	}
}

/// Generate a random nonce.
///
/// 96-bit random nonces are safe for the record volumes a single root key sees;
/// a fresh nonce is drawn for every write, so (key, nonce) pairs never repeat
/// in practice.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
	let mut nonce = [0u8; NONCE_SIZE];
	OsRng.fill_bytes(&mut nonce);
	nonce
}

/// Encrypt `plaintext` under the root key, binding it to `aad`.
pub fn encrypt(key: &RootKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<EncryptedData> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

	let nonce_bytes = generate_nonce();
	let nonce = Nonce::from_slice(&nonce_bytes);

	let ciphertext = cipher
		.encrypt(
			nonce,
			Payload {
				msg: plaintext,
				aad,
			},
		)
		.map_err(|e| CryptoError::Encryption(format!("record encryption failed: {e}")))?;

	Ok(EncryptedData {
		ciphertext,
		nonce: nonce_bytes,
	})
}

/// Decrypt a record previously sealed with [`encrypt`] and the same `aad`.
pub fn decrypt(
	key: &RootKey,
	encrypted: &EncryptedData,
	aad: &[u8],
) -> CryptoResult<Zeroizing<Vec<u8>>> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
	let nonce = Nonce::from_slice(&encrypted.nonce);

	let plaintext = cipher
		.decrypt(
			nonce,
			Payload {
				msg: encrypted.ciphertext.as_slice(),
				aad,
			},
		)
		.map_err(|e| CryptoError::Decryption(format!("record decryption failed: {e}")))?;

	Ok(Zeroizing::new(plaintext))
}

/// Material proving a candidate key is the root key without revealing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVerification {
	#[serde(with = "hex::serde")]
	pub salt: Vec<u8>,
	#[serde(with = "hex::serde")]
	pub tag: Vec<u8>,
}

impl KeyVerification {
	/// Compute verification material for `key`, bound to `key_id`.
	pub fn compute(key: &RootKey, key_id: &str) -> Self {
		let mut salt = vec![0u8; SALT_SIZE];
		OsRng.fill_bytes(&mut salt);
		let tag = key
			.mac(&[VERIFICATION_CONTEXT, &salt, key_id.as_bytes()])
			.to_vec();
		Self { salt, tag }
	}

	/// Constant-time check that `key` produced this tag.
	pub fn matches(&self, key: &RootKey, key_id: &str) -> bool {
		let mut mac = new_mac(key.as_bytes());
		mac.update(VERIFICATION_CONTEXT);
		mac.update(&self.salt);
		mac.update(key_id.as_bytes());
		mac.verify_slice(&self.tag).is_ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn generated_keys_differ() {
		let a = RootKey::generate();
		let b = RootKey::generate();
		assert_ne!(a.as_bytes(), b.as_bytes());
	}

	#[test]
	fn from_slice_rejects_wrong_length() {
		let result = RootKey::from_slice(&[0u8; 16]);
		assert!(matches!(
			result,
			Err(CryptoError::InvalidKeySize {
				expected: 32,
				actual: 16
			})
		));
	}

	#[test]
	fn record_roundtrip() {
		let key = RootKey::generate();
		let encrypted = encrypt(&key, b"db-password", b"apps/db:1").unwrap();
		let decrypted = decrypt(&key, &encrypted, b"apps/db:1").unwrap();
		assert_eq!(decrypted.as_slice(), b"db-password");
	}

	#[test]
	fn ciphertext_moved_to_other_record_fails() {
		let key = RootKey::generate();
		let encrypted = encrypt(&key, b"db-password", b"apps/db:1").unwrap();
		assert!(decrypt(&key, &encrypted, b"apps/db:2").is_err());
		assert!(decrypt(&key, &encrypted, b"apps/cache:1").is_err());
	}

	#[test]
	fn wrong_key_fails_decryption() {
		let encrypted = encrypt(&RootKey::generate(), b"value", b"p").unwrap();
		assert!(decrypt(&RootKey::generate(), &encrypted, b"p").is_err());
	}

	#[test]
	fn nonce_length_is_validated_on_rebuild() {
		assert!(EncryptedData::from_parts(vec![1, 2, 3], &[0u8; 11]).is_err());
		assert!(EncryptedData::from_parts(vec![1, 2, 3], &[0u8; NONCE_SIZE]).is_ok());
	}

	#[test]
	fn verification_accepts_only_the_original_key() {
		let key = RootKey::generate();
		let verification = KeyVerification::compute(&key, "key-1");

		assert!(verification.matches(&key, "key-1"));
		assert!(!verification.matches(&key, "key-2"));
		assert!(!verification.matches(&RootKey::generate(), "key-1"));
	}

	#[test]
	fn debug_does_not_leak_key() {
		let key = RootKey::from_slice(&[0xAB; KEY_SIZE]).unwrap();
		let debug = format!("{key:?}");
		assert!(debug.contains("[REDACTED]"));
		assert!(!debug.to_lowercase().contains("abab"));
	}

	proptest! {
		#[test]
		fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..4096), aad in "[a-z/]{1,40}") {
			let key = RootKey::generate();
			let encrypted = encrypt(&key, &plaintext, aad.as_bytes()).unwrap();
			let decrypted = decrypt(&key, &encrypted, aad.as_bytes()).unwrap();
			prop_assert_eq!(plaintext, decrypted.to_vec());
		}

		#[test]
		fn prop_tampered_ciphertext_fails(
			plaintext in proptest::collection::vec(any::<u8>(), 1..512),
			tamper_idx in 0usize..512usize,
		) {
			let key = RootKey::generate();
			let mut encrypted = encrypt(&key, &plaintext, b"aad").unwrap();
			let idx = tamper_idx % encrypted.ciphertext.len();
			encrypted.ciphertext[idx] ^= 0xFF;
			prop_assert!(decrypt(&key, &encrypted, b"aad").is_err());
		}
	}
}
