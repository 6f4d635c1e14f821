// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end coordinator scenarios against in-process custodians.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use warden_backend::{create_backend, Backend, BackendConfig, BackendKind};
use warden_common_http::{RetryConfig, TransportError};
use warden_core::{KeyId, RootKeySlot};
use warden_custody::{
	CustodianCallError, CustodianClient, CustodianEndpoint, CustodyError, KeyCustody, KeyShare,
	RecoveryCoordinator, RecoveryPolicy, RecoveryState, SharePayload, ShareSync,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
	Serve,
	Hang,
	Missing,
	Corrupt,
}

#[derive(Default)]
struct Custodians {
	behaviour: Mutex<HashMap<String, Behaviour>>,
	held: Mutex<HashMap<String, (KeyId, KeyShare)>>,
	shard_requests: AtomicUsize,
	contributions: AtomicUsize,
}

impl Custodians {
	fn set(&self, id: &str, behaviour: Behaviour) {
		self.behaviour.lock().unwrap().insert(id.to_string(), behaviour);
	}

	fn behaviour(&self, id: &str) -> Behaviour {
		self.behaviour
			.lock()
			.unwrap()
			.get(id)
			.copied()
			.unwrap_or(Behaviour::Serve)
	}

	fn forget(&self, id: &str) {
		self.held.lock().unwrap().remove(id);
	}

	fn held(&self, id: &str) -> Option<KeyShare> {
		self.held.lock().unwrap().get(id).map(|(_, s)| s.clone())
	}
}

#[async_trait]
impl CustodianClient for Custodians {
	async fn contribute(
		&self,
		endpoint: &CustodianEndpoint,
		key_id: &KeyId,
		share: &KeyShare,
	) -> Result<(), CustodianCallError> {
		if self.behaviour(&endpoint.id) == Behaviour::Hang {
			std::future::pending::<()>().await;
		}
		self.contributions.fetch_add(1, Ordering::SeqCst);
		self.held
			.lock()
			.unwrap()
			.insert(endpoint.id.clone(), (key_id.clone(), share.clone()));
		Ok(())
	}

	async fn request_share(
		&self,
		endpoint: &CustodianEndpoint,
		_requester: &str,
		key_id: &KeyId,
	) -> Result<KeyShare, CustodianCallError> {
		self.shard_requests.fetch_add(1, Ordering::SeqCst);
		let not_found = || {
			CustodianCallError::Transport(TransportError::NotFound {
				url: endpoint.url.clone(),
			})
		};
		match self.behaviour(&endpoint.id) {
			Behaviour::Hang => {
				std::future::pending::<()>().await;
				unreachable!()
			}
			Behaviour::Missing => Err(not_found()),
			behaviour => {
				let held = self.held.lock().unwrap().get(&endpoint.id).cloned();
				let (held_key, mut share) = held.ok_or_else(not_found)?;
				if held_key != *key_id {
					return Err(not_found());
				}
				if behaviour == Behaviour::Corrupt {
					let mut bytes = *share.payload.as_bytes();
					bytes[7] ^= 0x5a;
					share.payload = SharePayload::new(bytes);
				}
				Ok(share)
			}
		}
	}
}

fn endpoints() -> Vec<CustodianEndpoint> {
	["keeper-1", "keeper-2", "keeper-3"]
		.into_iter()
		.map(|id| CustodianEndpoint::new(id, format!("http://{id}.test")))
		.collect()
}

fn policy(call_timeout: Duration) -> RecoveryPolicy {
	RecoveryPolicy {
		threshold: 2,
		call_timeout,
		retry: RetryConfig {
			max_attempts: 2,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(5),
			backoff_factor: 2.0,
			jitter: false,
		},
		round_backoff: Duration::from_millis(10),
		max_rounds: 3,
		requester: "nexus-test".to_string(),
	}
}

async fn memory_backend() -> Arc<dyn Backend> {
	let backend = create_backend(BackendKind::Memory, BackendConfig::new("unused"), RootKeySlot::new());
	backend.initialize().await.unwrap();
	backend
}

fn coordinator(
	backend: &Arc<dyn Backend>,
	custodians: &Arc<Custodians>,
	call_timeout: Duration,
) -> RecoveryCoordinator {
	RecoveryCoordinator::new(
		Arc::clone(backend),
		KeyCustody::new(RootKeySlot::new()),
		Arc::clone(custodians) as Arc<dyn CustodianClient>,
		endpoints(),
		policy(call_timeout),
	)
}

/// First-run a coordinator and return the key it generated.
async fn bootstrap(backend: &Arc<dyn Backend>, custodians: &Arc<Custodians>) -> (KeyId, [u8; 32]) {
	let first = coordinator(backend, custodians, Duration::from_secs(1));
	let key_id = first.run().await.unwrap();
	let key = first.custody().resident_key().unwrap();
	(key_id, *key.as_bytes())
}

#[tokio::test]
async fn first_run_generates_and_distributes_without_requesting_shares() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	let coordinator = coordinator(&backend, &custodians, Duration::from_secs(1));

	let key_id = coordinator.run().await.unwrap();

	assert_eq!(coordinator.state(), RecoveryState::Ready { key_id: key_id.clone() });
	assert!(coordinator.custody().is_active());
	assert_eq!(custodians.shard_requests.load(Ordering::SeqCst), 0);
	assert_eq!(custodians.contributions.load(Ordering::SeqCst), 3);

	let metadata = backend.load_admin_recovery_metadata().await.unwrap();
	assert_eq!(metadata.key_id, key_id);
	assert_eq!(metadata.total_shares, 3);
	assert_eq!(metadata.threshold, 2);
	for (index, id) in ["keeper-1", "keeper-2", "keeper-3"].iter().enumerate() {
		let share = custodians.held(id).unwrap();
		assert_eq!(share.index as usize, index + 1);
		assert!(KeyCustody::share_matches(&metadata, &share));
	}
}

#[tokio::test]
async fn first_run_is_ready_even_when_a_custodian_is_down() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	custodians.set("keeper-2", Behaviour::Hang);

	let coordinator = coordinator(&backend, &custodians, Duration::from_millis(50));
	coordinator.run().await.unwrap();

	assert!(coordinator.state().is_ready());
	assert_eq!(custodians.contributions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn restart_recovers_when_one_custodian_times_out() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	let (key_id, key) = bootstrap(&backend, &custodians).await;

	custodians.set("keeper-3", Behaviour::Hang);
	let restarted = coordinator(&backend, &custodians, Duration::from_millis(100));
	let recovered = tokio::time::timeout(Duration::from_secs(10), restarted.run())
		.await
		.expect("recovery should not wait on the hung custodian")
		.unwrap();

	assert_eq!(recovered, key_id);
	assert_eq!(restarted.state(), RecoveryState::Ready { key_id });
	assert_eq!(restarted.custody().resident_key().unwrap().as_bytes(), &key);
}

#[tokio::test]
async fn corrupt_share_is_discarded_and_recovery_still_succeeds() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	let (_, key) = bootstrap(&backend, &custodians).await;

	custodians.set("keeper-1", Behaviour::Corrupt);
	let restarted = coordinator(&backend, &custodians, Duration::from_millis(100));
	restarted.run().await.unwrap();

	assert_eq!(restarted.custody().resident_key().unwrap().as_bytes(), &key);
}

#[tokio::test]
async fn unreachable_quorum_fails_after_rounds() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	bootstrap(&backend, &custodians).await;

	custodians.set("keeper-1", Behaviour::Missing);
	custodians.set("keeper-2", Behaviour::Missing);
	let restarted = coordinator(&backend, &custodians, Duration::from_millis(100));
	let err = restarted.run().await.unwrap_err();

	assert!(matches!(err, CustodyError::RecoveryFailed { rounds: 3, .. }), "got {err:?}");
	assert!(matches!(restarted.state(), RecoveryState::Failed { .. }));
	assert!(!restarted.custody().is_active());
}

async fn wait_for_state(coordinator: &RecoveryCoordinator, done: impl FnMut(&RecoveryState) -> bool) {
	let mut rx = coordinator.subscribe();
	rx.wait_for(done).await.unwrap();
}

async fn wait_for_awaiting(coordinator: &RecoveryCoordinator) {
	wait_for_state(coordinator, |s| matches!(s, RecoveryState::AwaitingShares { .. })).await;
}

async fn wait_for_distributing(coordinator: &RecoveryCoordinator) {
	wait_for_state(coordinator, |s| matches!(s, RecoveryState::Distributing { .. })).await;
}

/// A later process start must recover exactly the key `first` holds.
async fn assert_restart_recovers(backend: &Arc<dyn Backend>, custodians: &Arc<Custodians>, first: &RecoveryCoordinator) {
	let key_id = match first.state() {
		RecoveryState::Ready { key_id } => key_id,
		other => panic!("expected ready, got {other:?}"),
	};
	let key = *first.custody().resident_key().unwrap().as_bytes();

	let restarted = coordinator(backend, custodians, Duration::from_secs(1));
	assert_eq!(restarted.run().await.unwrap(), key_id);
	assert_eq!(restarted.custody().resident_key().unwrap().as_bytes(), &key);
}

fn hang_all(custodians: &Custodians) {
	for id in ["keeper-1", "keeper-2", "keeper-3"] {
		custodians.set(id, Behaviour::Hang);
	}
}

fn serve_all(custodians: &Custodians) {
	for id in ["keeper-1", "keeper-2", "keeper-3"] {
		custodians.set(id, Behaviour::Serve);
	}
}

#[tokio::test]
async fn first_run_below_threshold_fails_and_keeps_no_metadata() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	custodians.set("keeper-2", Behaviour::Hang);
	custodians.set("keeper-3", Behaviour::Hang);

	let first = coordinator(&backend, &custodians, Duration::from_millis(20));
	let err = first.run().await.unwrap_err();

	assert!(
		matches!(
			err,
			CustodyError::DistributionFailed {
				delivered: 1,
				needed: 2,
				rounds: 3
			}
		),
		"got {err:?}"
	);
	assert!(matches!(first.state(), RecoveryState::Failed { .. }));
	assert!(!first.custody().is_active());
	assert!(backend.load_admin_recovery_metadata().await.unwrap_err().is_not_found());

	serve_all(&custodians);
	let second = coordinator(&backend, &custodians, Duration::from_secs(1));
	second.run().await.unwrap();
	assert_restart_recovers(&backend, &custodians, &second).await;
}

#[tokio::test]
async fn first_run_with_no_reachable_custodian_never_becomes_ready() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	hang_all(&custodians);

	let first = coordinator(&backend, &custodians, Duration::from_millis(20));
	let err = first.run().await.unwrap_err();

	assert!(matches!(err, CustodyError::DistributionFailed { delivered: 0, .. }), "got {err:?}");
	assert!(!first.state().is_ready());
	assert_eq!(custodians.contributions.load(Ordering::SeqCst), 0);
	assert!(backend.load_admin_recovery_metadata().await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn distribution_retries_custodians_that_missed_a_round() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	custodians.set("keeper-2", Behaviour::Hang);
	custodians.set("keeper-3", Behaviour::Hang);

	let first = Arc::new(RecoveryCoordinator::new(
		Arc::clone(&backend),
		KeyCustody::new(RootKeySlot::new()),
		Arc::clone(&custodians) as Arc<dyn CustodianClient>,
		endpoints(),
		RecoveryPolicy {
			max_rounds: 50,
			..policy(Duration::from_millis(20))
		},
	));
	let running = tokio::spawn({
		let first = Arc::clone(&first);
		async move { first.run().await }
	});

	wait_for_state(&first, |s| matches!(s, RecoveryState::Distributing { delivered: 1, .. })).await;
	custodians.set("keeper-2", Behaviour::Serve);

	running.await.unwrap().unwrap();
	assert!(first.state().is_ready());
	assert!(custodians.held("keeper-1").is_some());
	assert!(custodians.held("keeper-2").is_some());
	assert!(custodians.held("keeper-3").is_none());
	assert_restart_recovers(&backend, &custodians, &first).await;
}

#[tokio::test]
async fn cancel_during_first_run_distribution_discards_the_key() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	hang_all(&custodians);

	let first = Arc::new(coordinator(&backend, &custodians, Duration::from_secs(60)));
	let running = tokio::spawn({
		let first = Arc::clone(&first);
		async move { first.run().await }
	});

	wait_for_distributing(&first).await;
	first.cancel();

	let result = running.await.unwrap();
	assert!(matches!(result, Err(CustodyError::Cancelled)));
	assert_eq!(first.state(), RecoveryState::Uninitialized);
	assert!(!first.custody().is_active());
	assert!(backend.load_admin_recovery_metadata().await.unwrap_err().is_not_found());

	serve_all(&custodians);
	first.run().await.unwrap();
	assert_restart_recovers(&backend, &custodians, &first).await;
}

#[tokio::test]
async fn shutdown_during_first_run_distribution_discards_the_key() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	hang_all(&custodians);

	let first = Arc::new(coordinator(&backend, &custodians, Duration::from_secs(60)));
	let running = tokio::spawn({
		let first = Arc::clone(&first);
		async move { first.run().await }
	});

	wait_for_distributing(&first).await;
	first.shutdown();

	let result = running.await.unwrap();
	assert!(matches!(result, Err(CustodyError::Cancelled)));
	assert_eq!(
		first.state(),
		RecoveryState::Failed {
			reason: "shutdown".to_string()
		}
	);
	assert!(!first.custody().is_active());
	assert!(backend.load_admin_recovery_metadata().await.unwrap_err().is_not_found());

	serve_all(&custodians);
	let next = coordinator(&backend, &custodians, Duration::from_secs(1));
	next.run().await.unwrap();
	assert_restart_recovers(&backend, &custodians, &next).await;
}

#[tokio::test]
async fn cancel_leaves_coordinator_awaiting_shares() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	bootstrap(&backend, &custodians).await;
	hang_all(&custodians);

	let restarted = Arc::new(coordinator(&backend, &custodians, Duration::from_secs(60)));
	let running = tokio::spawn({
		let restarted = Arc::clone(&restarted);
		async move { restarted.run().await }
	});

	wait_for_awaiting(&restarted).await;
	restarted.cancel();

	let result = running.await.unwrap();
	assert!(matches!(result, Err(CustodyError::Cancelled)));
	assert!(matches!(restarted.state(), RecoveryState::AwaitingShares { .. }));
	assert!(!restarted.custody().is_active());
}

#[tokio::test]
async fn shutdown_moves_coordinator_to_failed() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	bootstrap(&backend, &custodians).await;
	hang_all(&custodians);

	let restarted = Arc::new(coordinator(&backend, &custodians, Duration::from_secs(60)));
	let running = tokio::spawn({
		let restarted = Arc::clone(&restarted);
		async move { restarted.run().await }
	});

	wait_for_awaiting(&restarted).await;
	restarted.shutdown();

	let result = running.await.unwrap();
	assert!(matches!(result, Err(CustodyError::Cancelled)));
	assert_eq!(
		restarted.state(),
		RecoveryState::Failed {
			reason: "shutdown".to_string()
		}
	);
}

#[tokio::test]
async fn share_sync_reseeds_a_restarted_keeper() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	let first = coordinator(&backend, &custodians, Duration::from_secs(1));
	first.run().await.unwrap();
	let original = custodians.held("keeper-2").unwrap();

	custodians.forget("keeper-2");
	let sync = ShareSync::new(
		Arc::clone(&backend),
		first.custody().clone(),
		Arc::clone(&custodians) as Arc<dyn CustodianClient>,
		endpoints(),
		policy(Duration::from_secs(1)),
		Duration::from_secs(60),
	);
	assert_eq!(sync.sync_once().await.unwrap(), 3);
	assert_eq!(custodians.held("keeper-2").unwrap(), original);
}

#[tokio::test]
async fn share_sync_requires_a_resident_key() {
	let backend = memory_backend().await;
	let custodians = Arc::new(Custodians::default());
	let sync = ShareSync::new(
		backend,
		KeyCustody::new(RootKeySlot::new()),
		custodians as Arc<dyn CustodianClient>,
		endpoints(),
		policy(Duration::from_secs(1)),
		Duration::from_secs(60),
	);
	assert!(matches!(sync.sync_once().await, Err(CustodyError::NotReady)));
}
