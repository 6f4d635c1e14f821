// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! warden-nexus: the secrets service.
//!
//! On startup nexus recovers the root key from its keepers (or generates and
//! distributes one on first run), then serves the secrets, policy and admin
//! API. Until the key is resident every data route answers 503.

pub mod admin;
pub mod api;
pub mod config;
pub mod error;
pub mod locks;
pub mod policy;
pub mod routes;
pub mod secrets;
pub mod server;
pub mod state;

pub use config::{load_config, NexusConfig};
pub use error::{NexusError, NexusResult};
pub use routes::create_router;
pub use server::run;
pub use state::AppState;
