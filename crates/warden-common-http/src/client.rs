// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP client pinned to the deployment CA and presenting a client identity.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Certificate, Client, ClientBuilder, Identity};
use serde::Deserialize;

use crate::error::TlsError;

/// PEM files making up one workload's transport identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsIdentity {
	/// Certificate chain presented to peers.
	pub cert: PathBuf,
	/// Private key for `cert`.
	pub key: PathBuf,
	/// CA bundle peers must chain to. Built-in roots are never trusted.
	pub ca: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
	/// `None` is only accepted together with `allow_insecure`.
	pub identity: Option<TlsIdentity>,
	/// Permit plain `http://` peers. Local development and tests only.
	pub allow_insecure: bool,
	pub timeout: Duration,
	pub connect_timeout: Duration,
}

impl Default for ClientOptions {
	fn default() -> Self {
		Self {
			identity: None,
			allow_insecure: false,
			timeout: Duration::from_secs(10),
			connect_timeout: Duration::from_secs(5),
		}
	}
}

/// Returns the standard warden User-Agent string.
///
/// Format: `warden/{version}`
pub fn user_agent() -> String {
	format!("warden/{}", env!("CARGO_PKG_VERSION"))
}

/// Creates a new HTTP client builder with the standard warden User-Agent header.
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Build the peer client.
///
/// With an identity the client speaks rustls only, trusts exactly the
/// configured CA, and presents the workload certificate on every handshake.
pub fn build_client(options: &ClientOptions) -> Result<Client, TlsError> {
	let mut builder = builder()
		.use_rustls_tls()
		.tls_built_in_root_certs(false)
		.timeout(options.timeout)
		.connect_timeout(options.connect_timeout);

	match &options.identity {
		Some(identity) => {
			let ca_pem = read(&identity.ca)?;
			let ca = Certificate::from_pem(&ca_pem).map_err(TlsError::Client)?;

			let mut identity_pem = read(&identity.cert)?;
			identity_pem.push(b'\n');
			identity_pem.extend_from_slice(&read(&identity.key)?);
			let client_identity = Identity::from_pem(&identity_pem).map_err(TlsError::Client)?;

			builder = builder
				.add_root_certificate(ca)
				.identity(client_identity)
				.https_only(!options.allow_insecure);
		}
		None if options.allow_insecure => {
			tracing::warn!("building peer client without TLS identity; insecure mode enabled");
		}
		None => {
			return Err(TlsError::Verifier(
				"a TLS identity is required unless allow_insecure is set".to_string(),
			));
		}
	}

	builder.build().map_err(TlsError::Client)
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
	std::fs::read(path).map_err(|source| TlsError::Read {
		path: path.to_path_buf(),
		source,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_agent_has_correct_format() {
		let ua = user_agent();
		assert!(ua.starts_with("warden/"));
		assert_eq!(ua.split('/').count(), 2);
	}

	#[test]
	fn insecure_client_builds_without_identity() {
		let options = ClientOptions {
			allow_insecure: true,
			..Default::default()
		};
		assert!(build_client(&options).is_ok());
	}

	#[test]
	fn missing_identity_is_rejected_in_secure_mode() {
		let result = build_client(&ClientOptions::default());
		assert!(matches!(result, Err(TlsError::Verifier(_))));
	}

	#[test]
	fn missing_identity_files_are_reported_by_path() {
		let dir = tempfile::tempdir().unwrap();
		let options = ClientOptions {
			identity: Some(TlsIdentity {
				cert: dir.path().join("svid.pem"),
				key: dir.path().join("svid.key"),
				ca: dir.path().join("bundle.pem"),
			}),
			..Default::default()
		};
		match build_client(&options) {
			Err(TlsError::Read { path, .. }) => assert!(path.ends_with("bundle.pem")),
			other => panic!("expected read error, got {other:?}"),
		}
	}
}
