// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use warden_backend::BackendError;
use warden_core::{CryptoError, ErrorKind, KeyId};

pub type CustodyResult<T> = Result<T, CustodyError>;

#[derive(Debug, Error)]
pub enum CustodyError {
	#[error("invalid split parameters: {0}")]
	InvalidParameters(String),

	#[error("insufficient shares: have {have}, need {need}")]
	InsufficientShares { have: usize, need: usize },

	#[error("reconstructed key does not verify against metadata for key {key_id}")]
	VerificationFailure { key_id: KeyId },

	#[error("no root key is resident")]
	NotReady,

	#[error("recovery cancelled")]
	Cancelled,

	#[error("recovery failed after {rounds} rounds: {reason}")]
	RecoveryFailed { rounds: u32, reason: String },

	#[error("only {delivered} of {needed} custodians accepted a share after {rounds} rounds")]
	DistributionFailed {
		delivered: usize,
		needed: usize,
		rounds: u32,
	},

	#[error("storage error: {0}")]
	Backend(#[from] BackendError),

	#[error("key error: {0}")]
	Crypto(#[from] CryptoError),
}

impl CustodyError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			CustodyError::InvalidParameters(_) => ErrorKind::Invalid,
			CustodyError::InsufficientShares { .. } => ErrorKind::InsufficientShares,
			CustodyError::VerificationFailure { .. } => ErrorKind::Verification,
			CustodyError::NotReady
			| CustodyError::RecoveryFailed { .. }
			| CustodyError::DistributionFailed { .. } => ErrorKind::Unavailable,
			CustodyError::Cancelled => ErrorKind::Cancelled,
			CustodyError::Backend(e) => e.kind(),
			CustodyError::Crypto(e) => e.kind(),
		}
	}
}
