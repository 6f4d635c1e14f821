// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Calls from nexus to keeper nodes.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};
use warden_common_http::{post_json, retry, RetryConfig, RetryableError, TransportError};
use warden_core::{ErrorKind, KeyId};

use crate::shamir::KeyShare;
use crate::wire::{
	ContributeRequest, ContributeResponse, ShardRequest, ShardResponse, CONTRIBUTE_PATH, SHARD_PATH,
};

/// One keeper node as configured on the nexus.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustodianEndpoint {
	/// Stable name, used to count each custodian once per round.
	pub id: String,
	/// Base URL, e.g. `https://keeper-1.internal:8443`.
	pub url: String,
}

impl CustodianEndpoint {
	pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			url: url.into(),
		}
	}

	pub fn route(&self, path: &str) -> String {
		format!("{}{}", self.url.trim_end_matches('/'), path)
	}
}

impl fmt::Display for CustodianEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({})", self.id, self.url)
	}
}

#[derive(Debug, Error)]
pub enum CustodianCallError {
	#[error(transparent)]
	Transport(#[from] TransportError),

	#[error("custodian did not answer within {0:?}")]
	Timeout(Duration),

	#[error("custodian returned a share for key {got}, expected {expected}")]
	KeyMismatch { expected: KeyId, got: KeyId },
}

impl CustodianCallError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			CustodianCallError::Transport(e) => e.kind(),
			CustodianCallError::Timeout(_) => ErrorKind::Connectivity,
			CustodianCallError::KeyMismatch { .. } => ErrorKind::Peer,
		}
	}
}

impl RetryableError for CustodianCallError {
	fn is_retryable(&self) -> bool {
		self.kind().is_retryable()
	}
}

/// Run one custodian call with a per-attempt timeout inside the retry policy.
pub(crate) async fn bounded<T, F, Fut>(
	policy: &RetryConfig,
	call_timeout: Duration,
	mut call: F,
) -> Result<T, CustodianCallError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, CustodianCallError>>,
{
	retry(policy, || {
		let attempt = call();
		async move {
			match tokio::time::timeout(call_timeout, attempt).await {
				Ok(result) => result,
				Err(_) => Err(CustodianCallError::Timeout(call_timeout)),
			}
		}
	})
	.await
}

/// Seam between the coordinator and the network.
#[async_trait]
pub trait CustodianClient: Send + Sync {
	/// Hand `share` to the custodian for safekeeping.
	async fn contribute(
		&self,
		endpoint: &CustodianEndpoint,
		key_id: &KeyId,
		share: &KeyShare,
	) -> Result<(), CustodianCallError>;

	/// Ask the custodian for the share it holds for `key_id`.
	async fn request_share(
		&self,
		endpoint: &CustodianEndpoint,
		requester: &str,
		key_id: &KeyId,
	) -> Result<KeyShare, CustodianCallError>;
}

/// [`CustodianClient`] speaking JSON over the shared mTLS client.
#[derive(Debug, Clone)]
pub struct HttpCustodianClient {
	client: Client,
}

impl HttpCustodianClient {
	pub fn new(client: Client) -> Self {
		Self { client }
	}
}

#[async_trait]
impl CustodianClient for HttpCustodianClient {
	#[instrument(skip(self, share), fields(custodian = %endpoint.id, index = share.index))]
	async fn contribute(
		&self,
		endpoint: &CustodianEndpoint,
		key_id: &KeyId,
		share: &KeyShare,
	) -> Result<(), CustodianCallError> {
		let request = ContributeRequest::new(key_id.clone(), share);
		let _: ContributeResponse =
			post_json(&self.client, &endpoint.route(CONTRIBUTE_PATH), &request).await?;
		debug!("share contributed");
		Ok(())
	}

	#[instrument(skip(self), fields(custodian = %endpoint.id))]
	async fn request_share(
		&self,
		endpoint: &CustodianEndpoint,
		requester: &str,
		key_id: &KeyId,
	) -> Result<KeyShare, CustodianCallError> {
		let request = ShardRequest {
			requester: requester.to_string(),
			key_id: key_id.clone(),
		};
		let response: ShardResponse =
			post_json(&self.client, &endpoint.route(SHARD_PATH), &request).await?;
		if response.key_id != *key_id {
			return Err(CustodianCallError::KeyMismatch {
				expected: key_id.clone(),
				got: response.key_id,
			});
		}
		debug!(index = response.index, "share received");
		Ok(response.into_share())
	}
}
