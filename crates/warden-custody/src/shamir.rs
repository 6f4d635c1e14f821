// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Byte-wise Shamir secret sharing of the 32-byte root key.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use warden_core::crypto::KEY_SIZE;
use warden_core::REDACTED;
use zeroize::{Zeroize, Zeroizing};

use crate::gf256::{evaluate, interpolate_at_zero, Gf256};

/// Size of a share payload; one byte per byte of key.
pub const SHARE_SIZE: usize = KEY_SIZE;

/// Share payload. Base64 on the wire, redacted everywhere else.
#[derive(Clone, PartialEq, Eq)]
pub struct SharePayload(Zeroizing<[u8; SHARE_SIZE]>);

impl SharePayload {
	pub fn new(bytes: [u8; SHARE_SIZE]) -> Self {
		Self(Zeroizing::new(bytes))
	}

	pub fn from_slice(bytes: &[u8]) -> Option<Self> {
		let array: [u8; SHARE_SIZE] = bytes.try_into().ok()?;
		Some(Self::new(array))
	}

	pub fn as_bytes(&self) -> &[u8; SHARE_SIZE] {
		&self.0
	}
}

impl fmt::Debug for SharePayload {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("SharePayload").field(&REDACTED).finish()
	}
}

impl Serialize for SharePayload {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let encoded = Zeroizing::new(BASE64.encode(self.0.as_slice()));
		serializer.serialize_str(&encoded)
	}
}

impl<'de> Deserialize<'de> for SharePayload {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let encoded = Zeroizing::new(String::deserialize(deserializer)?);
		let decoded = Zeroizing::new(
			BASE64
				.decode(encoded.as_bytes())
				.map_err(serde::de::Error::custom)?,
		);
		SharePayload::from_slice(&decoded).ok_or_else(|| {
			serde::de::Error::custom(format!(
				"share must be {SHARE_SIZE} bytes, got {}",
				decoded.len()
			))
		})
	}
}

/// One point of the split key: the x coordinate and 32 y values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShare {
	/// 1..=255. Zero would be the key itself.
	pub index: u8,
	pub payload: SharePayload,
}

impl KeyShare {
	/// Hex SHA-256 over index and payload, as recorded in recovery metadata.
	pub fn digest(&self) -> String {
		let mut hasher = Sha256::new();
		hasher.update(b"warden/share/v1");
		hasher.update([self.index]);
		hasher.update(self.payload.as_bytes());
		hex::encode(hasher.finalize())
	}
}

/// Split `secret` into `n` shares with threshold `k`.
///
/// `coefficient(degree)` supplies the 32 bytes of polynomial coefficients for
/// each degree in `1..k`. Parameters are validated by the caller.
pub fn split<F>(secret: &[u8; SHARE_SIZE], n: u8, k: u8, mut coefficient: F) -> Vec<KeyShare>
where
	F: FnMut(u8) -> Zeroizing<[u8; SHARE_SIZE]>,
{
	let higher: Vec<Zeroizing<[u8; SHARE_SIZE]>> = (1..k).map(&mut coefficient).collect();

	(1..=n)
		.map(|index| {
			let x = Gf256(index);
			let mut payload = [0u8; SHARE_SIZE];
			let mut poly = Zeroizing::new(vec![Gf256::ZERO; k as usize]);
			for (byte, out) in payload.iter_mut().enumerate() {
				poly[0] = Gf256(secret[byte]);
				for (degree, coeffs) in higher.iter().enumerate() {
					poly[degree + 1] = Gf256(coeffs[byte]);
				}
				*out = evaluate(&poly, x).0;
			}
			let share = KeyShare {
				index,
				payload: SharePayload::new(payload),
			};
			payload.zeroize();
			share
		})
		.collect()
}

/// Recombine shares with distinct non-zero indices into the secret.
pub fn combine(shares: &[&KeyShare]) -> Zeroizing<[u8; SHARE_SIZE]> {
	let mut secret = Zeroizing::new([0u8; SHARE_SIZE]);
	let mut points = vec![(Gf256::ZERO, Gf256::ZERO); shares.len()];
	for byte in 0..SHARE_SIZE {
		for (point, share) in points.iter_mut().zip(shares) {
			*point = (Gf256(share.index), Gf256(share.payload.as_bytes()[byte]));
		}
		secret[byte] = interpolate_at_zero(&points).0;
	}
	for (_, y) in points.iter_mut() {
		y.zeroize();
	}
	secret
}
