// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use warden_common_http::PeerIdentity;
use warden_custody::wire::{CONTRIBUTE_PATH, HEALTH_PATH, SHARD_PATH};
use warden_custody::{ContributeRequest, ContributeResponse, KeyShare, ShardRequest, ShardResponse};

use crate::access::{require_authorized_peer, AccessPolicy};
use crate::holder::ShareHolder;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

pub(crate) fn error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
	(
		status,
		Json(ErrorResponse {
			error: code.to_string(),
			message: message.into(),
		}),
	)
		.into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: &'static str,
	pub holding_share: bool,
}

pub fn create_router(holder: Arc<ShareHolder>, access: Arc<AccessPolicy>) -> Router {
	Router::new()
		.route(HEALTH_PATH, get(health))
		.route(CONTRIBUTE_PATH, post(contribute))
		.route(SHARD_PATH, post(shard))
		.route_layer(middleware::from_fn_with_state(access, require_authorized_peer))
		.with_state(holder)
}

async fn health(State(holder): State<Arc<ShareHolder>>) -> Json<HealthResponse> {
	Json(HealthResponse {
		status: "ok",
		holding_share: holder.held_key().is_some(),
	})
}

#[instrument(skip_all)]
async fn contribute(
	State(holder): State<Arc<ShareHolder>>,
	payload: Result<Json<ContributeRequest>, JsonRejection>,
) -> Response {
	let Json(req) = match payload {
		Ok(req) => req,
		Err(rejection) => {
			warn!(error = %rejection, "malformed contribution");
			return error(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text());
		}
	};
	if req.index == 0 {
		return error(
			StatusCode::BAD_REQUEST,
			"invalid_request",
			"share index must be non-zero",
		);
	}
	holder.store(
		req.key_id,
		KeyShare {
			index: req.index,
			payload: req.share,
		},
	);
	Json(ContributeResponse::default()).into_response()
}

#[instrument(skip_all)]
async fn shard(
	State(holder): State<Arc<ShareHolder>>,
	peer: Option<Extension<PeerIdentity>>,
	payload: Result<Json<ShardRequest>, JsonRejection>,
) -> Response {
	let Json(req) = match payload {
		Ok(req) => req,
		Err(rejection) => {
			return error(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text());
		}
	};
	let peer = peer.map_or_else(|| "<anonymous>".to_string(), |Extension(peer)| peer.to_string());
	match holder.get(&req.key_id) {
		Some(share) => {
			info!(%peer, requester = %req.requester, key_id = %req.key_id, index = share.index, "share released");
			Json(ShardResponse {
				key_id: req.key_id,
				index: share.index,
				share: share.payload,
			})
			.into_response()
		}
		None => {
			debug!(%peer, requester = %req.requester, key_id = %req.key_id, "no share held for key");
			error(
				StatusCode::NOT_FOUND,
				"not_found",
				format!("no share held for key {}", req.key_id),
			)
		}
	}
}
