// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types shared by every warden crate.
//!
//! - **Secret wrapper**: [`Secret<T>`] keeps tokens and key material out of logs
//! - **Domain model**: versioned secrets, policies and recovery metadata
//! - **At-rest cipher**: AES-256-GCM under the root key, bound to record identity
//! - **Root key slot**: the single in-memory home of the reconstructed root key
//! - **Error taxonomy**: [`ErrorKind`], the classification every crate error maps onto

pub mod crypto;
pub mod error;
pub mod keyslot;
pub mod secret;
pub mod types;

pub use crypto::{EncryptedData, KeyVerification, RootKey, KEY_SIZE, NONCE_SIZE};
pub use error::{CryptoError, CryptoResult, ErrorKind, ValidationError};
pub use keyslot::RootKeySlot;
pub use secret::{Secret, SecretString, REDACTED};
pub use types::{
	KeyId, Policy, PolicyId, PolicyPermission, RecoveryMetadata, SecretMeta, SecretPath,
	SecretVersion, StoredSecret, DEFAULT_MAX_VERSIONS, RECOVERY_SCHEME_VERSION,
};
