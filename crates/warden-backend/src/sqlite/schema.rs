// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schema applied at initialize. Statements are idempotent.

use sqlx::SqlitePool;

use crate::error::{BackendError, BackendResult};

pub(crate) const SCHEMA: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS secret_metadata (
		path TEXT PRIMARY KEY,
		current_version INTEGER NOT NULL,
		oldest_version INTEGER NOT NULL,
		max_versions INTEGER NOT NULL,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS secret_versions (
		path TEXT NOT NULL REFERENCES secret_metadata(path) ON DELETE CASCADE,
		version INTEGER NOT NULL,
		nonce BLOB NOT NULL,
		ciphertext BLOB NOT NULL,
		created_at TEXT NOT NULL,
		deleted_at TEXT,
		PRIMARY KEY (path, version)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS admin_token (
		id INTEGER PRIMARY KEY CHECK (id = 1),
		nonce BLOB NOT NULL,
		ciphertext BLOB NOT NULL,
		updated_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS recovery_metadata (
		id INTEGER PRIMARY KEY CHECK (id = 1),
		metadata TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS policies (
		id TEXT PRIMARY KEY,
		name TEXT NOT NULL UNIQUE,
		spiffe_id_pattern TEXT NOT NULL,
		path_pattern TEXT NOT NULL,
		permissions TEXT NOT NULL,
		created_at TEXT NOT NULL,
		created_by TEXT NOT NULL
	)
	"#,
];

/// Apply the schema in one transaction.
pub(crate) async fn migrate(pool: &SqlitePool) -> BackendResult<()> {
	let mut tx = pool
		.begin()
		.await
		.map_err(BackendError::storage("begin migration"))?;
	for statement in SCHEMA {
		sqlx::query(statement)
			.execute(&mut *tx)
			.await
			.map_err(BackendError::storage("apply schema"))?;
	}
	tx.commit()
		.await
		.map_err(BackendError::storage("commit migration"))?;
	Ok(())
}
