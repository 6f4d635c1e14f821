// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pluggable storage for warden.
//!
//! One [`Backend`] contract, two variants:
//! - [`SqliteBackend`]: file-backed, encrypted at rest under the resident root key
//! - [`MemoryBackend`]: process-local maps, for tests and ephemeral deployments
//!
//! Pick one at startup with [`create_backend`].

pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use backend::{create_backend, Backend, BackendKind};
pub use config::{BackendConfig, BackendOption, JournalMode, SqliteSettings};
pub use error::{BackendError, BackendResult};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
