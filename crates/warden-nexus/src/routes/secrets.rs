// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use warden_core::{SecretMeta, SecretPath, SecretVersion};

use crate::api::{ApiError, ApiJson, Empty};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PutRequest {
	pub path: String,
	pub values: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct PutResponse {
	pub version: u32,
}

#[derive(Debug, Deserialize)]
pub struct GetRequest {
	pub path: String,
	#[serde(default)]
	pub version: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct GetResponse {
	pub path: SecretPath,
	pub version: u32,
	pub values: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct VersionsRequest {
	pub path: String,
	#[serde(default)]
	pub versions: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize)]
pub struct PathRequest {
	pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
	pub paths: Vec<SecretPath>,
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
	pub path: SecretPath,
	#[serde(flatten)]
	pub meta: SecretMeta,
	pub versions: Vec<VersionInfo>,
}

#[derive(Debug, Serialize)]
pub struct VersionInfo {
	pub version: u32,
	pub created_at: chrono::DateTime<chrono::Utc>,
	pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<SecretVersion> for VersionInfo {
	fn from(v: SecretVersion) -> Self {
		Self {
			version: v.version,
			created_at: v.created_at,
			deleted_at: v.deleted_at,
		}
	}
}

#[instrument(skip(state, req), fields(path = %req.path))]
pub async fn put(
	State(state): State<AppState>,
	ApiJson(req): ApiJson<PutRequest>,
) -> Result<Json<PutResponse>, ApiError> {
	let path = SecretPath::parse(&req.path)?;
	let version = state.secrets.put(&path, req.values).await?;
	Ok(Json(PutResponse { version }))
}

#[instrument(skip(state, req), fields(path = %req.path))]
pub async fn get(
	State(state): State<AppState>,
	ApiJson(req): ApiJson<GetRequest>,
) -> Result<Json<GetResponse>, ApiError> {
	let path = SecretPath::parse(&req.path)?;
	let found = state.secrets.get(&path, req.version).await?;
	Ok(Json(GetResponse {
		path,
		version: found.version,
		values: found.data,
	}))
}

#[instrument(skip(state, req), fields(path = %req.path))]
pub async fn delete(
	State(state): State<AppState>,
	ApiJson(req): ApiJson<VersionsRequest>,
) -> Result<Json<Empty>, ApiError> {
	let path = SecretPath::parse(&req.path)?;
	state
		.secrets
		.delete(&path, req.versions.as_deref().unwrap_or_default())
		.await?;
	Ok(Json(Empty {}))
}

#[instrument(skip(state, req), fields(path = %req.path))]
pub async fn undelete(
	State(state): State<AppState>,
	ApiJson(req): ApiJson<VersionsRequest>,
) -> Result<Json<Empty>, ApiError> {
	let path = SecretPath::parse(&req.path)?;
	state
		.secrets
		.undelete(&path, req.versions.as_deref().unwrap_or_default())
		.await?;
	Ok(Json(Empty {}))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<ListResponse>, ApiError> {
	let paths = state.secrets.list().await?;
	Ok(Json(ListResponse { paths }))
}

#[instrument(skip(state, req), fields(path = %req.path))]
pub async fn metadata(
	State(state): State<AppState>,
	ApiJson(req): ApiJson<PathRequest>,
) -> Result<Json<MetadataResponse>, ApiError> {
	let path = SecretPath::parse(&req.path)?;
	let (meta, versions) = state.secrets.metadata(&path).await?;
	Ok(Json(MetadataResponse {
		path,
		meta,
		versions: versions.into_iter().map(VersionInfo::from).collect(),
	}))
}
