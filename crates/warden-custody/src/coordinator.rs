// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Recovery coordinator.
//!
//! Drives the service from a cold start to a resident root key:
//!
//! ```text
//! no metadata:  Uninitialized ──► Distributing ──(k delivered)──► Ready
//!                     ▲              │    │
//!                     └─(cancelled)──┘    └──(rounds spent)──► Failed
//!
//! metadata:     Uninitialized ──► AwaitingShares ──(k shares)──► Reconstructing ──► Ready
//!                                   ▲     │                            │
//!                                   │     └──(rounds spent)──► Failed  │
//!                                   └───────(verification fails)───────┘
//! ```
//!
//! A first run that does not reach `Ready` deletes the metadata it stored,
//! so the next run generates a fresh key instead of hunting for shares
//! that were never delivered.
//!
//! State is published on a [`watch`] channel so the API layer can gate
//! requests without polling the coordinator.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use warden_backend::Backend;
use warden_common_http::RetryConfig;
use warden_core::{KeyId, RecoveryMetadata};

use crate::custodian::{bounded, CustodianCallError, CustodianClient, CustodianEndpoint};
use crate::custody::KeyCustody;
use crate::error::{CustodyError, CustodyResult};
use crate::shamir::KeyShare;
use crate::sync::distribute;

/// Tunables for talking to custodians and for recovery rounds.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
	/// Shares needed to rebuild the key. Only used when generating a new key;
	/// recovery reads the threshold from stored metadata.
	pub threshold: usize,
	/// Budget for a single custodian call attempt.
	pub call_timeout: Duration,
	pub retry: RetryConfig,
	/// Pause between recovery or distribution rounds that ended short.
	pub round_backoff: Duration,
	pub max_rounds: u32,
	/// Name this service presents when requesting shares.
	pub requester: String,
}

impl Default for RecoveryPolicy {
	fn default() -> Self {
		Self {
			threshold: 2,
			call_timeout: Duration::from_secs(5),
			retry: RetryConfig::default(),
			round_backoff: Duration::from_secs(2),
			max_rounds: 10,
			requester: "warden-nexus".to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecoveryState {
	Uninitialized,
	Distributing {
		delivered: usize,
		needed: usize,
		round: u32,
	},
	AwaitingShares {
		collected: usize,
		needed: usize,
		round: u32,
	},
	Reconstructing {
		shares: usize,
	},
	Ready {
		key_id: KeyId,
	},
	Failed {
		reason: String,
	},
}

impl RecoveryState {
	pub fn is_ready(&self) -> bool {
		matches!(self, RecoveryState::Ready { .. })
	}

	pub fn name(&self) -> &'static str {
		match self {
			RecoveryState::Uninitialized => "uninitialized",
			RecoveryState::Distributing { .. } => "distributing",
			RecoveryState::AwaitingShares { .. } => "awaiting_shares",
			RecoveryState::Reconstructing { .. } => "reconstructing",
			RecoveryState::Ready { .. } => "ready",
			RecoveryState::Failed { .. } => "failed",
		}
	}
}

pub struct RecoveryCoordinator {
	backend: Arc<dyn Backend>,
	custody: KeyCustody,
	client: Arc<dyn CustodianClient>,
	custodians: Vec<CustodianEndpoint>,
	policy: RecoveryPolicy,
	state: watch::Sender<RecoveryState>,
	shutdown: CancellationToken,
	attempt: Mutex<CancellationToken>,
}

impl RecoveryCoordinator {
	pub fn new(
		backend: Arc<dyn Backend>,
		custody: KeyCustody,
		client: Arc<dyn CustodianClient>,
		custodians: Vec<CustodianEndpoint>,
		policy: RecoveryPolicy,
	) -> Self {
		let (state, _) = watch::channel(RecoveryState::Uninitialized);
		let shutdown = CancellationToken::new();
		let attempt = Mutex::new(shutdown.child_token());
		Self {
			backend,
			custody,
			client,
			custodians,
			policy,
			state,
			shutdown,
			attempt,
		}
	}

	pub fn subscribe(&self) -> watch::Receiver<RecoveryState> {
		self.state.subscribe()
	}

	pub fn state(&self) -> RecoveryState {
		self.state.borrow().clone()
	}

	pub fn custody(&self) -> &KeyCustody {
		&self.custody
	}

	/// Abandon the recovery attempt in progress. A later [`run`](Self::run)
	/// starts over. A first run cancelled here leaves nothing persisted.
	pub fn cancel(&self) {
		let mut attempt = self.attempt.lock().unwrap_or_else(|e| e.into_inner());
		attempt.cancel();
		*attempt = self.shutdown.child_token();
	}

	/// Cancel for good. The coordinator ends in `Failed { reason: "shutdown" }`.
	pub fn shutdown(&self) {
		self.shutdown.cancel();
		self.publish(RecoveryState::Failed {
			reason: "shutdown".to_string(),
		});
	}

	pub fn shutdown_token(&self) -> CancellationToken {
		self.shutdown.clone()
	}

	/// Bring the root key into memory, generating it on first run.
	pub async fn run(&self) -> CustodyResult<KeyId> {
		let token = self
			.attempt
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.clone();

		let result = self.drive(&token).await;

		match &result {
			Ok(_) => {}
			Err(CustodyError::Cancelled) if self.shutdown.is_cancelled() => {
				self.publish(RecoveryState::Failed {
					reason: "shutdown".to_string(),
				});
			}
			Err(CustodyError::Cancelled) => {
				info!(state = self.state().name(), "recovery attempt cancelled");
			}
			Err(e) => {
				self.publish(RecoveryState::Failed {
					reason: e.to_string(),
				});
			}
		}
		result
	}

	async fn drive(&self, token: &CancellationToken) -> CustodyResult<KeyId> {
		let loaded = tokio::select! {
			biased;
			_ = token.cancelled() => return Err(CustodyError::Cancelled),
			loaded = self.backend.load_admin_recovery_metadata() => loaded,
		};
		match loaded {
			Ok(metadata) => tokio::select! {
				biased;
				_ = token.cancelled() => Err(CustodyError::Cancelled),
				result = self.recover(&metadata) => result,
			},
			Err(e) if e.is_not_found() => self.first_run(token).await,
			Err(e) => Err(e.into()),
		}
	}

	#[instrument(skip(self, token), fields(custodians = self.custodians.len(), threshold = self.policy.threshold))]
	async fn first_run(&self, token: &CancellationToken) -> CustodyResult<KeyId> {
		info!("no recovery metadata found, generating a new root key");
		let outcome = self
			.custody
			.generate_and_split(self.custodians.len(), self.policy.threshold)?;
		let key_id = outcome.metadata.key_id.clone();
		if token.is_cancelled() {
			return Err(CustodyError::Cancelled);
		}

		// Metadata must be durable before any share leaves the process.
		self.backend
			.store_admin_recovery_metadata(&outcome.metadata)
			.await?;

		let seeded = tokio::select! {
			biased;
			_ = token.cancelled() => Err(CustodyError::Cancelled),
			seeded = self.seed_custodians(&key_id, &outcome.shares) => seeded,
		};
		match seeded {
			Ok(delivered) => {
				info!(%key_id, delivered, total = outcome.shares.len(), "initial shares distributed");
				self.custody.activate(outcome.key);
				self.publish(RecoveryState::Ready {
					key_id: key_id.clone(),
				});
				Ok(key_id)
			}
			Err(e) => {
				self.abandon_first_run(&key_id).await?;
				Err(e)
			}
		}
	}

	/// Deliver shares round by round until `threshold` custodians hold one.
	async fn seed_custodians(&self, key_id: &KeyId, shares: &[KeyShare]) -> CustodyResult<usize> {
		let needed = self.policy.threshold;
		let max_rounds = self.policy.max_rounds.max(1);
		let mut remaining: Vec<(&CustodianEndpoint, &KeyShare)> =
			self.custodians.iter().zip(shares).collect();
		let total = remaining.len();

		for round in 1..=max_rounds {
			self.publish(RecoveryState::Distributing {
				delivered: total - remaining.len(),
				needed,
				round,
			});

			let landed = distribute(
				&*self.client,
				remaining.iter().copied(),
				key_id,
				&self.policy.retry,
				self.policy.call_timeout,
			)
			.await;
			let mut landed = landed.into_iter();
			remaining.retain(|_| !landed.next().unwrap_or(false));

			let delivered = total - remaining.len();
			if delivered >= needed {
				return Ok(delivered);
			}
			self.publish(RecoveryState::Distributing {
				delivered,
				needed,
				round,
			});
			if round < max_rounds {
				warn!(
					round,
					delivered,
					needed,
					backoff_ms = self.policy.round_backoff.as_millis() as u64,
					"too few custodians accepted a share"
				);
				tokio::time::sleep(self.policy.round_backoff).await;
			}
		}

		Err(CustodyError::DistributionFailed {
			delivered: total - remaining.len(),
			needed,
			rounds: max_rounds,
		})
	}

	/// Forget a key that never reached enough custodians. The key itself is
	/// dropped unactivated by the caller.
	async fn abandon_first_run(&self, key_id: &KeyId) -> CustodyResult<()> {
		if let Err(e) = self.backend.delete_admin_recovery_metadata().await {
			error!(%key_id, error = %e, "failed to delete metadata of abandoned key");
			return Err(e.into());
		}
		warn!(%key_id, "first run abandoned, recovery metadata deleted");
		self.publish(RecoveryState::Uninitialized);
		Ok(())
	}

	#[instrument(skip(self, metadata), fields(key_id = %metadata.key_id, threshold = metadata.threshold))]
	async fn recover(&self, metadata: &RecoveryMetadata) -> CustodyResult<KeyId> {
		let needed = metadata.threshold as usize;
		let max_rounds = self.policy.max_rounds.max(1);
		let mut collected: BTreeMap<String, KeyShare> = BTreeMap::new();

		for round in 1..=max_rounds {
			if collected.len() >= self.custodians.len() {
				// Every custodian answered and the set still did not verify.
				collected.clear();
			}
			self.publish(RecoveryState::AwaitingShares {
				collected: collected.len(),
				needed,
				round,
			});

			let mut pending = FuturesUnordered::new();
			for endpoint in self
				.custodians
				.iter()
				.filter(|e| !collected.contains_key(&e.id))
			{
				pending.push(async move { (endpoint, self.fetch_share(endpoint, &metadata.key_id).await) });
			}

			while let Some((endpoint, result)) = pending.next().await {
				let share = match result {
					Ok(share) => share,
					Err(e) => {
						warn!(custodian = %endpoint.id, round, error = %e, "custodian did not provide a share");
						continue;
					}
				};
				if !KeyCustody::share_matches(metadata, &share) {
					warn!(custodian = %endpoint.id, index = share.index, "share does not match recovery metadata");
					continue;
				}
				if collected.insert(endpoint.id.clone(), share).is_some() {
					continue;
				}
				self.publish(RecoveryState::AwaitingShares {
					collected: collected.len(),
					needed,
					round,
				});
				if collected.len() < needed {
					continue;
				}

				self.publish(RecoveryState::Reconstructing {
					shares: collected.len(),
				});
				let shares: Vec<KeyShare> = collected.values().cloned().collect();
				match self.custody.reconstruct(metadata, &shares) {
					Ok(key) => {
						self.custody.activate(key);
						info!(round, shares = shares.len(), "root key recovered");
						self.publish(RecoveryState::Ready {
							key_id: metadata.key_id.clone(),
						});
						return Ok(metadata.key_id.clone());
					}
					Err(e @ (CustodyError::VerificationFailure { .. }
					| CustodyError::InsufficientShares { .. })) => {
						warn!(round, error = %e, "reconstruction did not verify, waiting for more shares");
						self.publish(RecoveryState::AwaitingShares {
							collected: collected.len(),
							needed,
							round,
						});
					}
					Err(e) => return Err(e),
				}
			}

			if round < max_rounds {
				warn!(
					round,
					collected = collected.len(),
					needed,
					backoff_ms = self.policy.round_backoff.as_millis() as u64,
					"round ended without quorum"
				);
				tokio::time::sleep(self.policy.round_backoff).await;
			}
		}

		Err(CustodyError::RecoveryFailed {
			rounds: max_rounds,
			reason: format!("collected {} of {needed} shares", collected.len()),
		})
	}

	async fn fetch_share(
		&self,
		endpoint: &CustodianEndpoint,
		key_id: &KeyId,
	) -> Result<KeyShare, CustodianCallError> {
		let client = &*self.client;
		let requester = self.policy.requester.as_str();
		bounded(&self.policy.retry, self.policy.call_timeout, || {
			client.request_share(endpoint, requester, key_id)
		})
		.await
	}

	fn publish(&self, state: RecoveryState) {
		self.state.send_replace(state);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn state_serializes_with_tag() {
		let json = serde_json::to_value(RecoveryState::AwaitingShares {
			collected: 1,
			needed: 2,
			round: 3,
		})
		.unwrap();
		assert_eq!(
			json,
			serde_json::json!({ "state": "awaiting_shares", "collected": 1, "needed": 2, "round": 3 })
		);

		let ready = serde_json::to_value(RecoveryState::Ready {
			key_id: KeyId::new("abc"),
		})
		.unwrap();
		assert_eq!(ready, serde_json::json!({ "state": "ready", "key_id": "abc" }));
	}

	#[test]
	fn distributing_has_its_own_name() {
		let state = RecoveryState::Distributing {
			delivered: 1,
			needed: 2,
			round: 1,
		};
		assert_eq!(state.name(), "distributing");
		assert!(!state.is_ready());
		assert_eq!(
			serde_json::to_value(&state).unwrap()["state"],
			serde_json::json!("distributing")
		);
	}

	#[test]
	fn only_ready_is_ready() {
		assert!(RecoveryState::Ready {
			key_id: KeyId::new("k")
		}
		.is_ready());
		assert!(!RecoveryState::Uninitialized.is_ready());
		assert!(!RecoveryState::Failed {
			reason: "x".into()
		}
		.is_ready());
	}
}
