// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use warden_core::{Policy, PolicyId};

use crate::api::{bearer, ApiError, ApiJson, Empty};
use crate::policy::PolicyInput;
use crate::state::AppState;

/// Recorded as `created_by` for policies written with the admin token.
const ADMIN_PRINCIPAL: &str = "admin";

#[derive(Debug, Deserialize)]
pub struct IdRequest {
	pub id: String,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
	pub policies: Vec<Policy>,
}

fn parse_id(raw: &str) -> Result<PolicyId, ApiError> {
	raw.parse()
		.map_err(|_| ApiError::invalid(format!("invalid policy id '{raw}'")))
}

#[instrument(skip(state, headers, input), fields(name = %input.name))]
pub async fn put(
	State(state): State<AppState>,
	headers: HeaderMap,
	ApiJson(input): ApiJson<PolicyInput>,
) -> Result<Json<Policy>, ApiError> {
	state.admin.verify(bearer(&headers)).await?;
	let policy = state.policies.create(input, ADMIN_PRINCIPAL).await?;
	Ok(Json(policy))
}

pub async fn get(
	State(state): State<AppState>,
	ApiJson(req): ApiJson<IdRequest>,
) -> Result<Json<Policy>, ApiError> {
	let id = parse_id(&req.id)?;
	Ok(Json(state.policies.get(id).await?))
}

#[instrument(skip(state, headers, req), fields(policy_id = %req.id))]
pub async fn delete(
	State(state): State<AppState>,
	headers: HeaderMap,
	ApiJson(req): ApiJson<IdRequest>,
) -> Result<Json<Empty>, ApiError> {
	state.admin.verify(bearer(&headers)).await?;
	let id = parse_id(&req.id)?;
	state.policies.delete(id).await?;
	Ok(Json(Empty {}))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<ListResponse>, ApiError> {
	let policies = state.policies.list().await?;
	Ok(Json(ListResponse { policies }))
}
