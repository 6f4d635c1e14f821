// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic re-seeding of custodians from the resident key.
//!
//! Keepers hold their share in memory only, so a restarted keeper comes back
//! empty. While the key is resident, [`ShareSync`] re-derives every share and
//! pushes it again.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use warden_backend::Backend;
use warden_common_http::RetryConfig;
use warden_core::KeyId;

use crate::coordinator::{RecoveryPolicy, RecoveryState};
use crate::custodian::{bounded, CustodianClient, CustodianEndpoint};
use crate::custody::KeyCustody;
use crate::error::{CustodyError, CustodyResult};
use crate::shamir::KeyShare;

/// Push each share to its custodian, concurrently. The result holds one flag
/// per target, in target order, set when that delivery landed.
///
/// Failures are logged and otherwise left to the caller.
pub(crate) async fn distribute<'a>(
	client: &dyn CustodianClient,
	targets: impl IntoIterator<Item = (&'a CustodianEndpoint, &'a KeyShare)>,
	key_id: &KeyId,
	policy: &RetryConfig,
	call_timeout: Duration,
) -> Vec<bool> {
	let calls = targets.into_iter().map(|(endpoint, share)| async move {
		let result = bounded(policy, call_timeout, || client.contribute(endpoint, key_id, share)).await;
		if let Err(e) = &result {
			warn!(custodian = %endpoint.id, index = share.index, error = %e, "failed to deliver share");
		}
		result.is_ok()
	});
	join_all(calls).await
}

pub struct ShareSync {
	backend: Arc<dyn Backend>,
	custody: KeyCustody,
	client: Arc<dyn CustodianClient>,
	custodians: Vec<CustodianEndpoint>,
	policy: RecoveryPolicy,
	interval: Duration,
}

impl ShareSync {
	pub fn new(
		backend: Arc<dyn Backend>,
		custody: KeyCustody,
		client: Arc<dyn CustodianClient>,
		custodians: Vec<CustodianEndpoint>,
		policy: RecoveryPolicy,
		interval: Duration,
	) -> Self {
		Self {
			backend,
			custody,
			client,
			custodians,
			policy,
			interval,
		}
	}

	/// Re-derive shares from the resident key and push each to its custodian.
	#[instrument(skip(self))]
	pub async fn sync_once(&self) -> CustodyResult<usize> {
		let key = self.custody.resident_key().ok_or(CustodyError::NotReady)?;
		let metadata = self.backend.load_admin_recovery_metadata().await?;

		let shares = KeyCustody::split(
			&key,
			metadata.total_shares as usize,
			metadata.threshold as usize,
		)?;
		if !shares
			.iter()
			.all(|share| KeyCustody::share_matches(&metadata, share))
		{
			return Err(CustodyError::VerificationFailure {
				key_id: metadata.key_id,
			});
		}

		let delivered = distribute(
			&*self.client,
			self.custodians.iter().zip(&shares),
			&metadata.key_id,
			&self.policy.retry,
			self.policy.call_timeout,
		)
		.await
		.into_iter()
		.filter(|landed| *landed)
		.count();
		debug!(delivered, total = shares.len(), "shares re-distributed");
		Ok(delivered)
	}

	/// Sync every interval while `state` reports ready, until `shutdown` fires.
	pub async fn run(self, state: watch::Receiver<RecoveryState>, shutdown: CancellationToken) {
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		// The first tick completes immediately; shares were just delivered.
		ticker.tick().await;

		info!(interval_secs = self.interval.as_secs(), "share sync started");
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				_ = ticker.tick() => {}
			}
			if !state.borrow().is_ready() {
				continue;
			}
			if let Err(e) = self.sync_once().await {
				warn!(error = %e, "share sync failed");
			}
		}
		info!("share sync stopped");
	}
}
