// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! warden-keeper: custodian node holding one root key share.
//!
//! Nexus pushes a share with `contribute` and asks for it back with `shard`
//! when it restarts. The share lives in memory only.

pub mod access;
pub mod config;
pub mod holder;
pub mod routes;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_common_http::{load_server_tls, serve};

pub use access::AccessPolicy;
pub use config::{load_config, KeeperConfig};
pub use holder::ShareHolder;
pub use routes::create_router;

/// Serve the keeper API until `shutdown` is cancelled.
pub async fn run(config: KeeperConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
	let tls = config
		.identity
		.as_ref()
		.map(load_server_tls)
		.transpose()
		.context("failed to load server TLS identity")?;
	if config.access == AccessPolicy::Open {
		warn!("serving without TLS, any caller may store or fetch the share");
	}
	let router = create_router(Arc::new(ShareHolder::new()), Arc::new(config.access.clone()));

	let addr = config.socket_addr();
	let listener = TcpListener::bind(&addr)
		.await
		.with_context(|| format!("failed to bind {addr}"))?;
	serve(listener, router, tls, shutdown).await.context("server error")?;
	info!("keeper stopped");
	Ok(())
}
