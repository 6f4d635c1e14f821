// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Accept loop serving an axum router over mutually authenticated TLS.
//!
//! Uses hyper http1 with TokioIo, one task per connection. Requests arriving
//! over TLS carry the client's [`PeerIdentity`] as a request extension.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{Extension, Router};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use x509_parser::prelude::{parse_x509_certificate, GeneralName};

use crate::client::TlsIdentity;
use crate::error::TlsError;

/// Build a server configuration that requires a client certificate chaining
/// to `identity.ca`.
pub fn load_server_tls(identity: &TlsIdentity) -> Result<Arc<ServerConfig>, TlsError> {
	let certs = load_certs(&identity.cert)?;
	let key = PrivateKeyDer::from_pem_file(&identity.key).map_err(|source| TlsError::Pem {
		path: identity.key.clone(),
		source,
	})?;

	let mut roots = RootCertStore::empty();
	for ca in load_certs(&identity.ca)? {
		roots.add(ca)?;
	}

	let provider = Arc::new(rustls::crypto::ring::default_provider());
	let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
		.build()
		.map_err(|e| TlsError::Verifier(e.to_string()))?;

	let mut config = ServerConfig::builder_with_provider(provider)
		.with_safe_default_protocol_versions()?
		.with_client_cert_verifier(verifier)
		.with_single_cert(certs, key)?;
	config.alpn_protocols = vec![b"http/1.1".to_vec()];

	Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
	let pem_error = |source| TlsError::Pem {
		path: path.to_path_buf(),
		source,
	};
	let certs = CertificateDer::pem_file_iter(path)
		.map_err(pem_error)?
		.collect::<Result<Vec<_>, _>>()
		.map_err(pem_error)?;
	if certs.is_empty() {
		return Err(TlsError::NoCertificates {
			path: path.to_path_buf(),
		});
	}
	Ok(certs)
}

/// Identity of an authenticated client, taken from its leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity(String);

impl PeerIdentity {
	pub fn new(identity: impl Into<String>) -> Self {
		Self(identity.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for PeerIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// The verified client certificate's identity: its first URI SAN (a SPIFFE
/// id), else its first DNS SAN.
pub fn peer_identity(connection: &ServerConnection) -> Option<PeerIdentity> {
	let leaf = connection.peer_certificates()?.first()?;
	identity_from_der(leaf.as_ref())
}

fn identity_from_der(der: &[u8]) -> Option<PeerIdentity> {
	let (_, cert) = parse_x509_certificate(der).ok()?;
	let san = cert.subject_alternative_name().ok()??;
	let names = &san.value.general_names;
	names
		.iter()
		.find_map(|name| match name {
			GeneralName::URI(uri) => Some(*uri),
			_ => None,
		})
		.or_else(|| {
			names.iter().find_map(|name| match name {
				GeneralName::DNSName(dns) => Some(*dns),
				_ => None,
			})
		})
		.map(PeerIdentity::new)
}

/// Serve `router` on `listener` until `shutdown` is cancelled.
///
/// With `tls` set every connection must complete an mTLS handshake before a
/// request is read. Without it the router is served over plain HTTP.
pub async fn serve(
	listener: TcpListener,
	router: Router,
	tls: Option<Arc<ServerConfig>>,
	shutdown: CancellationToken,
) -> std::io::Result<()> {
	let acceptor = tls.map(TlsAcceptor::from);
	let addr = listener.local_addr()?;
	info!(%addr, tls = acceptor.is_some(), "listening");

	loop {
		let (stream, peer) = tokio::select! {
			_ = shutdown.cancelled() => {
				info!(%addr, "listener shutting down");
				return Ok(());
			}
			accepted = listener.accept() => match accepted {
				Ok(accepted) => accepted,
				Err(e) => {
					warn!(error = %e, "error accepting connection");
					continue;
				}
			},
		};

		let router = router.clone();
		let acceptor = acceptor.clone();
		let shutdown = shutdown.clone();
		tokio::spawn(async move {
			match acceptor {
				Some(acceptor) => match acceptor.accept(stream).await {
					Ok(tls_stream) => {
						let router = match peer_identity(tls_stream.get_ref().1) {
							Some(identity) => {
								debug!(%peer, %identity, "client authenticated");
								router.layer(Extension(identity))
							}
							None => {
								warn!(%peer, "client certificate carries no usable identity");
								router
							}
						};
						serve_connection(tls_stream, router, peer, shutdown).await
					}
					Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
				},
				None => serve_connection(stream, router, peer, shutdown).await,
			}
		});
	}
}

async fn serve_connection<I>(io: I, router: Router, peer: SocketAddr, shutdown: CancellationToken)
where
	I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let service = TowerToHyperService::new(router);
	let connection = http1::Builder::new().serve_connection(TokioIo::new(io), service);
	tokio::pin!(connection);

	tokio::select! {
		result = connection.as_mut() => {
			if let Err(err) = result {
				debug!(%peer, error = %err, "error serving connection");
			}
		}
		_ = shutdown.cancelled() => {
			connection.as_mut().graceful_shutdown();
			if let Err(err) = connection.await {
				debug!(%peer, error = %err, "error during connection shutdown");
			}
		}
	}
}
