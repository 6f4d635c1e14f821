// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for storage backends.

use thiserror::Error;
use warden_core::{CryptoError, ErrorKind};

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
	#[error("{resource} not found: {id}")]
	NotFound { resource: &'static str, id: String },

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("backend configuration error: {0}")]
	Configuration(String),

	#[error("backend already initialized")]
	AlreadyInitialized,

	#[error("backend not initialized")]
	NotInitialized,

	#[error("backend closed")]
	Closed,

	#[error("root key not available; backend is sealed")]
	Sealed,

	#[error("storage error during {operation}: {source}")]
	Storage {
		operation: &'static str,
		#[source]
		source: sqlx::Error,
	},

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("cipher error: {0}")]
	Crypto(#[from] CryptoError),

	#[error("corrupt record {what}: {detail}")]
	Corrupt { what: String, detail: String },
}

impl BackendError {
	pub(crate) fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
		Self::NotFound {
			resource,
			id: id.into(),
		}
	}

	pub(crate) fn storage(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
		move |source| Self::Storage { operation, source }
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, BackendError::NotFound { .. })
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			BackendError::NotFound { .. } => ErrorKind::NotFound,
			BackendError::Conflict(_) => ErrorKind::Invalid,
			BackendError::Configuration(_) | BackendError::AlreadyInitialized => {
				ErrorKind::Configuration
			}
			BackendError::NotInitialized | BackendError::Closed | BackendError::Sealed => {
				ErrorKind::Unavailable
			}
			BackendError::Storage { .. }
			| BackendError::Serialization(_)
			| BackendError::Crypto(_)
			| BackendError::Corrupt { .. } => ErrorKind::Storage,
		}
	}
}
