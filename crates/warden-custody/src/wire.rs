// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Recovery wire contract between nexus and keepers.

use serde::{Deserialize, Serialize};
use warden_core::KeyId;

use crate::shamir::{KeyShare, SharePayload};

pub const CONTRIBUTE_PATH: &str = "/v1/keeper/contribute";
pub const SHARD_PATH: &str = "/v1/keeper/shard";
pub const HEALTH_PATH: &str = "/healthz";

/// Nexus pushing a share to a keeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributeRequest {
	pub key_id: KeyId,
	pub index: u8,
	pub share: SharePayload,
}

impl ContributeRequest {
	pub fn new(key_id: KeyId, share: &KeyShare) -> Self {
		Self {
			key_id,
			index: share.index,
			share: share.payload.clone(),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributeResponse {}

/// Nexus asking a keeper for the share it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRequest {
	pub requester: String,
	pub key_id: KeyId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardResponse {
	pub key_id: KeyId,
	pub index: u8,
	pub share: SharePayload,
}

impl ShardResponse {
	pub fn into_share(self) -> KeyShare {
		KeyShare {
			index: self.index,
			payload: self.share,
		}
	}
}
