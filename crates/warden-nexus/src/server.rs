// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process wiring: backend, recovery, share sync and the HTTP listener.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_backend::{create_backend, Backend};
use warden_common_http::{build_client, load_server_tls, serve, ClientOptions};
use warden_core::{RootKeySlot, SecretString};
use warden_custody::{
	CustodianClient, HttpCustodianClient, KeyCustody, RecoveryCoordinator, RecoveryState,
	ShareSync,
};

use crate::admin::AdminTokens;
use crate::config::NexusConfig;
use crate::routes::create_router;
use crate::state::AppState;

/// Run nexus until `shutdown` is cancelled.
pub async fn run(config: NexusConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
	let slot = RootKeySlot::new();
	let backend = create_backend(
		config.backend.kind,
		config.backend.config.clone(),
		slot.clone(),
	);
	backend
		.initialize()
		.await
		.context("failed to initialize backend")?;

	let http = build_client(&ClientOptions {
		identity: config.tls.identity.clone(),
		allow_insecure: config.tls.allow_insecure,
		timeout: config.recovery.policy.call_timeout,
		..ClientOptions::default()
	})
	.context("failed to build custodian client")?;
	let client: Arc<dyn CustodianClient> = Arc::new(HttpCustodianClient::new(http));

	let custody = KeyCustody::new(slot);
	let coordinator = Arc::new(RecoveryCoordinator::new(
		Arc::clone(&backend),
		custody.clone(),
		Arc::clone(&client),
		config.recovery.custodians.clone(),
		config.recovery.policy.clone(),
	));
	let recovery = coordinator.subscribe();

	let recovery_task = {
		let coordinator = Arc::clone(&coordinator);
		tokio::spawn(async move {
			match coordinator.run().await {
				Ok(key_id) => info!(%key_id, "root key resident"),
				Err(e) => error!(error = %e, "root key recovery failed"),
			}
		})
	};

	let sync = ShareSync::new(
		Arc::clone(&backend),
		custody,
		client,
		config.recovery.custodians.clone(),
		config.recovery.policy.clone(),
		config.recovery.resync_interval,
	);
	let sync_task = tokio::spawn(sync.run(recovery.clone(), shutdown.clone()));

	let admin_task = config.admin_token.clone().map(|token| {
		tokio::spawn(install_admin_token(
			Arc::clone(&backend),
			recovery.clone(),
			token,
		))
	});

	let state = AppState::new(
		Arc::clone(&backend),
		config.secrets.max_versions,
		recovery,
	);
	let router = create_router(state);
	let tls = config
		.tls
		.identity
		.as_ref()
		.map(load_server_tls)
		.transpose()
		.context("failed to load server TLS identity")?;

	let addr = config.socket_addr();
	let listener = TcpListener::bind(&addr)
		.await
		.with_context(|| format!("failed to bind {addr}"))?;
	let served = serve(listener, router, tls, shutdown.clone()).await;

	info!("shutting down");
	shutdown.cancel();
	coordinator.shutdown();
	for task in [Some(recovery_task), Some(sync_task), admin_task]
		.into_iter()
		.flatten()
	{
		if let Err(e) = task.await {
			warn!(error = %e, "background task ended abnormally");
		}
	}
	backend.close().await.context("failed to close backend")?;

	served.context("server error")
}

/// Install the configured admin token once the backend can encrypt it.
async fn install_admin_token(
	backend: Arc<dyn Backend>,
	mut recovery: watch::Receiver<RecoveryState>,
	token: SecretString,
) {
	let ready = recovery
		.wait_for(|s| s.is_ready() || matches!(s, RecoveryState::Failed { .. }))
		.await
		.map(|s| s.is_ready())
		.unwrap_or(false);
	if !ready {
		warn!("admin token not installed: root key never became resident");
		return;
	}
	match AdminTokens::new(backend).install(&token).await {
		Ok(()) => info!("admin token installed from configuration"),
		Err(e) => error!(error = %e, "failed to install admin token"),
	}
}
