// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error taxonomy shared by all warden crates.

use thiserror::Error;

/// Classification every crate-level error maps onto.
///
/// Callers branch on the kind rather than on concrete error variants: a
/// `NotFound` on one secret is handled very differently from `Unavailable`
/// for the whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Record or peer response absent. Caller decides the fallback.
	NotFound,
	/// Peer unreachable or TLS handshake failed. Retryable with backoff.
	Connectivity,
	/// Peer answered with a non-success, non-404 status. Not retried blindly.
	Peer,
	/// Storage engine or transactional failure.
	Storage,
	/// Fewer distinct valid key shares than the quorum threshold.
	InsufficientShares,
	/// Reconstructed key does not match recovery metadata.
	Verification,
	/// Malformed or unusable configuration. Fatal at startup.
	Configuration,
	/// Service is sealed or recovering.
	Unavailable,
	/// Operation cancelled by the caller.
	Cancelled,
	/// Caller supplied invalid input.
	Invalid,
}

impl ErrorKind {
	/// Whether retrying the same operation with backoff can succeed.
	pub fn is_retryable(self) -> bool {
		matches!(self, ErrorKind::Connectivity)
	}

	/// HTTP status used when this kind crosses the API boundary.
	pub fn status_code(self) -> u16 {
		match self {
			ErrorKind::NotFound => 404,
			ErrorKind::Invalid => 400,
			ErrorKind::Unavailable
			| ErrorKind::InsufficientShares
			| ErrorKind::Verification
			| ErrorKind::Cancelled => 503,
			ErrorKind::Connectivity | ErrorKind::Peer => 502,
			ErrorKind::Storage | ErrorKind::Configuration => 500,
		}
	}
}

/// Result type alias for cipher operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by the at-rest cipher and key verification.
#[derive(Debug, Error)]
pub enum CryptoError {
	#[error("encryption failed: {0}")]
	Encryption(String),

	#[error("decryption failed: {0}")]
	Decryption(String),

	#[error("invalid key size: expected {expected}, got {actual}")]
	InvalidKeySize { expected: usize, actual: usize },

	#[error("invalid nonce: expected {expected} bytes, got {actual}")]
	InvalidNonce { expected: usize, actual: usize },
}

impl CryptoError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			CryptoError::InvalidKeySize { .. } => ErrorKind::Configuration,
			_ => ErrorKind::Storage,
		}
	}
}

/// Caller-supplied input rejected before it reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
	#[error("invalid secret path {path:?}: {reason}")]
	Path { path: String, reason: &'static str },

	#[error("invalid policy: {0}")]
	Policy(String),

	#[error("secret has no data")]
	EmptySecret,
}

impl ValidationError {
	pub fn kind(&self) -> ErrorKind {
		ErrorKind::Invalid
	}
}
