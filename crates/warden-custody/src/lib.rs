// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Root key custody and recovery for warden.
//!
//! The root key is never persisted whole. It is split k-of-n over GF(2^8),
//! each share handed to a keeper node, and rebuilt at startup from any k
//! shares that verify against the stored [`RecoveryMetadata`].
//!
//! - [`KeyCustody`]: generate, split, reconstruct, activate
//! - [`RecoveryCoordinator`]: the startup state machine
//! - [`ShareSync`]: re-seeds keepers while the key is resident
//!
//! [`RecoveryMetadata`]: warden_core::RecoveryMetadata

pub mod coordinator;
pub mod custodian;
pub mod custody;
pub mod error;
pub mod gf256;
pub mod shamir;
pub mod sync;
pub mod wire;

pub use coordinator::{RecoveryCoordinator, RecoveryPolicy, RecoveryState};
pub use custodian::{CustodianCallError, CustodianClient, CustodianEndpoint, HttpCustodianClient};
pub use custody::{KeyCustody, SplitOutcome};
pub use error::{CustodyError, CustodyResult};
pub use shamir::{KeyShare, SharePayload, SHARE_SIZE};
pub use sync::ShareSync;
pub use wire::{ContributeRequest, ContributeResponse, ShardRequest, ShardResponse};
