// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use warden_backend::BackendError;
use warden_core::{ErrorKind, ValidationError};

pub type NexusResult<T> = Result<T, NexusError>;

/// Errors raised by the nexus services behind the HTTP API.
#[derive(Debug, Error)]
pub enum NexusError {
	#[error(transparent)]
	Backend(#[from] BackendError),

	#[error(transparent)]
	Validation(#[from] ValidationError),

	#[error("{what} not found")]
	NotFound { what: String },

	#[error("invalid request: {0}")]
	Invalid(String),

	#[error("missing or invalid admin token")]
	Unauthorized,
}

impl NexusError {
	pub fn not_found(what: impl Into<String>) -> Self {
		NexusError::NotFound { what: what.into() }
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			NexusError::Backend(e) => e.kind(),
			NexusError::Validation(e) => e.kind(),
			NexusError::NotFound { .. } => ErrorKind::NotFound,
			NexusError::Invalid(_) | NexusError::Unauthorized => ErrorKind::Invalid,
		}
	}
}
