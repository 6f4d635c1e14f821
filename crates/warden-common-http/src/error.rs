// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use thiserror::Error;
use warden_core::ErrorKind;

use crate::retry::RetryableError;

/// Failure of a single POST to a peer.
///
/// The variants are what callers branch on: `Connectivity` is worth retrying,
/// `NotFound` means the peer has nothing for us, `Peer` means it answered but
/// refused.
#[derive(Debug, Error)]
pub enum TransportError {
	#[error("connectivity failure posting to {url}: {source}")]
	Connectivity {
		url: String,
		#[source]
		source: reqwest::Error,
	},

	#[error("{url} returned 404 not found")]
	NotFound { url: String },

	#[error("{url} returned status {status}: {message}")]
	Peer {
		url: String,
		status: u16,
		message: String,
	},

	#[error("failed reading response body from {url}: {source}")]
	ReadBody {
		url: String,
		#[source]
		source: reqwest::Error,
	},

	#[error("failed to encode request body: {0}")]
	Encode(#[source] serde_json::Error),

	#[error("failed to decode response from {url}: {source}")]
	Decode {
		url: String,
		#[source]
		source: serde_json::Error,
	},
}

impl TransportError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			TransportError::Connectivity { .. } => ErrorKind::Connectivity,
			TransportError::NotFound { .. } => ErrorKind::NotFound,
			TransportError::Peer { .. }
			| TransportError::ReadBody { .. }
			| TransportError::Decode { .. } => ErrorKind::Peer,
			TransportError::Encode(_) => ErrorKind::Invalid,
		}
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, TransportError::NotFound { .. })
	}
}

impl RetryableError for TransportError {
	fn is_retryable(&self) -> bool {
		self.kind().is_retryable()
	}
}

/// Failure loading transport identities or building TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
	#[error("failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid PEM in {path}: {source}")]
	Pem {
		path: PathBuf,
		#[source]
		source: rustls_pki_types::pem::Error,
	},

	#[error("no certificates found in {path}")]
	NoCertificates { path: PathBuf },

	#[error("TLS configuration error: {0}")]
	Rustls(#[from] rustls::Error),

	#[error("client certificate verifier error: {0}")]
	Verifier(String),

	#[error("failed to build HTTP client: {0}")]
	Client(#[source] reqwest::Error),
}

impl TlsError {
	pub fn kind(&self) -> ErrorKind {
		ErrorKind::Configuration
	}
}
