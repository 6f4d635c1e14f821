// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Nexus HTTP routes.
//!
//! Everything except `/healthz` and `/v1/status` is refused with 503 until the
//! root key has been recovered.

pub mod admin;
pub mod policies;
pub mod secrets;
pub mod status;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tracing::debug;

use crate::api::ApiError;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
	let gated = Router::new()
		.route("/v1/secrets/put", post(secrets::put))
		.route("/v1/secrets/get", post(secrets::get))
		.route("/v1/secrets/delete", post(secrets::delete))
		.route("/v1/secrets/undelete", post(secrets::undelete))
		.route("/v1/secrets/list", post(secrets::list))
		.route("/v1/secrets/metadata", post(secrets::metadata))
		.route("/v1/policies/put", post(policies::put))
		.route("/v1/policies/get", post(policies::get))
		.route("/v1/policies/delete", post(policies::delete))
		.route("/v1/policies/list", post(policies::list))
		.route("/v1/admin/token", post(admin::rotate_token))
		.route_layer(middleware::from_fn_with_state(state.clone(), require_ready));

	Router::new()
		.route("/healthz", get(status::health))
		.route("/v1/status", get(status::status))
		.merge(gated)
		.with_state(state)
}

/// Refuse requests until recovery has reached `Ready`.
async fn require_ready(State(state): State<AppState>, request: Request, next: Next) -> Response {
	let current = state.recovery_state();
	if !current.is_ready() {
		debug!(state = current.name(), path = %request.uri().path(), "request refused, not ready");
		return ApiError::unavailable(format!("root key not available ({})", current.name()))
			.into_response();
	}
	next.run(request).await
}
