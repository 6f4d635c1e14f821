// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared HTTP transport for warden.
//!
//! This crate provides:
//! - An mTLS HTTP client pinned to the deployment CA
//! - `post` / `post_json` with a failure taxonomy callers can branch on
//! - Retry logic with exponential backoff for transient failures
//! - The TLS serve loop used by the nexus and keeper binaries

mod client;
mod error;
mod post;
mod retry;
mod server;

pub use client::{build_client, builder, user_agent, ClientOptions, TlsIdentity};
pub use error::{TlsError, TransportError};
pub use post::{post, post_json};
pub use retry::{retry, RetryConfig, RetryableError};
pub use server::{load_server_tls, peer_identity, serve, PeerIdentity};
