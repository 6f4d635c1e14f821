// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use warden_custody::RecoveryState;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
	Json(HealthResponse { status: "ok" })
}

/// Current recovery state, e.g. `{"state":"ready","key_id":"..."}`.
pub async fn status(State(state): State<AppState>) -> Json<RecoveryState> {
	Json(state.recovery_state())
}
