// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP error bodies and request extraction shared by every route.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;
use warden_backend::BackendError;
use warden_core::{ErrorKind, ValidationError};

use crate::error::NexusError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

/// Empty JSON object returned by mutations with nothing to report.
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

#[derive(Debug)]
pub struct ApiError {
	pub status: StatusCode,
	pub error: &'static str,
	pub message: String,
}

impl ApiError {
	pub fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
		Self {
			status,
			error,
			message: message.into(),
		}
	}

	pub fn invalid(message: impl Into<String>) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
	}

	pub fn unavailable(message: impl Into<String>) -> Self {
		Self::new(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", message)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(
			self.status,
			Json(ErrorResponse {
				error: self.error.to_string(),
				message: self.message,
			}),
		)
			.into_response()
	}
}

impl From<NexusError> for ApiError {
	fn from(e: NexusError) -> Self {
		match &e {
			NexusError::Unauthorized => {
				return Self::new(StatusCode::UNAUTHORIZED, "unauthorized", e.to_string())
			}
			NexusError::Backend(BackendError::Conflict(_)) => {
				return Self::new(StatusCode::CONFLICT, "conflict", e.to_string())
			}
			_ => {}
		}
		match e.kind() {
			ErrorKind::NotFound => Self::new(StatusCode::NOT_FOUND, "not_found", e.to_string()),
			ErrorKind::Invalid => Self::invalid(e.to_string()),
			ErrorKind::Unavailable | ErrorKind::Cancelled => Self::unavailable(e.to_string()),
			kind => {
				error!(error = %e, ?kind, "request failed");
				Self::new(
					StatusCode::INTERNAL_SERVER_ERROR,
					"internal_error",
					"internal server error",
				)
			}
		}
	}
}

impl From<ValidationError> for ApiError {
	fn from(e: ValidationError) -> Self {
		Self::invalid(e.to_string())
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		Self::invalid(rejection.body_text())
	}
}

/// `Json` extractor whose rejection uses [`ErrorResponse`].
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
	headers
		.get("Authorization")
		.and_then(|h| h.to_str().ok())
		.and_then(|h| h.strip_prefix("Bearer "))
		.map(str::trim)
		.filter(|t| !t.is_empty())
}
