// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use warden_core::SecretString;

use crate::api::{bearer, ApiError, ApiJson, Empty};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RotateRequest {
	pub token: String,
}

/// Replace the admin token. The current token must be presented as bearer.
pub async fn rotate_token(
	State(state): State<AppState>,
	headers: HeaderMap,
	ApiJson(req): ApiJson<RotateRequest>,
) -> Result<Json<Empty>, ApiError> {
	let new_token = SecretString::new(req.token);
	state.admin.rotate(bearer(&headers), &new_token).await?;
	Ok(Json(Empty {}))
}
