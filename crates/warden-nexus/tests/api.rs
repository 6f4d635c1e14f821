// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;
use warden_backend::{Backend, MemoryBackend};
use warden_core::{KeyId, SecretString};
use warden_custody::RecoveryState;
use warden_nexus::{create_router, AppState};

const ADMIN_TOKEN: &str = "integration-admin-token";

struct Harness {
	router: Router,
	state: AppState,
	recovery: watch::Sender<RecoveryState>,
}

async fn harness(initial: RecoveryState) -> Harness {
	let backend = Arc::new(MemoryBackend::new());
	backend.initialize().await.unwrap();
	let (recovery, rx) = watch::channel(initial);
	let state = AppState::new(backend, 5, rx);
	Harness {
		router: create_router(state.clone()),
		state,
		recovery,
	}
}

async fn ready() -> Harness {
	harness(RecoveryState::Ready {
		key_id: KeyId::new("test-key"),
	})
	.await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
	let response = router.clone().oneshot(request).await.unwrap();
	let status = response.status();
	let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
		.await
		.unwrap();
	let body = if bytes.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(&bytes).unwrap()
	};
	(status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
	Request::builder()
		.method(Method::POST)
		.uri(uri)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.unwrap()
}

fn post_as_admin(uri: &str, token: &str, body: Value) -> Request<Body> {
	let mut request = post(uri, body);
	request.headers_mut().insert(
		header::AUTHORIZATION,
		format!("Bearer {token}").parse().unwrap(),
	);
	request
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn policy_body() -> Value {
	json!({
		"name": "billing-readers",
		"spiffe_id_pattern": "^spiffe://example.org/billing/.*$",
		"path_pattern": "^apps/billing/.*$",
		"permissions": ["read", "list"],
	})
}

#[tokio::test]
async fn data_routes_refused_until_ready() {
	let h = harness(RecoveryState::AwaitingShares {
		collected: 1,
		needed: 2,
		round: 1,
	})
	.await;

	let (status, body) = send(&h.router, post("/v1/secrets/list", json!({}))).await;
	assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
	assert_eq!(body["error"], "service_unavailable");

	let (status, body) = send(&h.router, get("/healthz")).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["status"], "ok");

	let (status, body) = send(&h.router, get("/v1/status")).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["state"], "awaiting_shares");
	assert_eq!(body["collected"], 1);

	h.recovery.send_replace(RecoveryState::Ready {
		key_id: KeyId::new("late-key"),
	});
	let (status, body) = send(&h.router, post("/v1/secrets/list", json!({}))).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["paths"], json!([]));
}

#[tokio::test]
async fn status_reports_ready_key() {
	let h = ready().await;
	let (status, body) = send(&h.router, get("/v1/status")).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({"state": "ready", "key_id": "test-key"}));
}

#[tokio::test]
async fn secret_round_trip() {
	let h = ready().await;

	let (status, body) = send(
		&h.router,
		post(
			"/v1/secrets/put",
			json!({"path": "apps/billing/db", "values": {"user": "app", "password": "hunter2"}}),
		),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["version"], 1);

	send(
		&h.router,
		post(
			"/v1/secrets/put",
			json!({"path": "/apps/billing/db/", "values": {"password": "rotated"}}),
		),
	)
	.await;

	let (status, body) = send(
		&h.router,
		post("/v1/secrets/get", json!({"path": "apps/billing/db"})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["version"], 2);
	assert_eq!(body["values"], json!({"password": "rotated"}));

	let (_, body) = send(
		&h.router,
		post("/v1/secrets/get", json!({"path": "apps/billing/db", "version": 1})),
	)
	.await;
	assert_eq!(body["values"]["password"], "hunter2");

	let (_, body) = send(&h.router, post("/v1/secrets/list", json!({}))).await;
	assert_eq!(body["paths"], json!(["apps/billing/db"]));

	let (status, body) = send(
		&h.router,
		post("/v1/secrets/metadata", json!({"path": "apps/billing/db"})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["current_version"], 2);
	assert_eq!(body["versions"].as_array().unwrap().len(), 2);
	assert!(body["versions"][0].get("values").is_none());
}

#[tokio::test]
async fn unknown_secret_is_not_found() {
	let h = ready().await;
	let (status, body) = send(
		&h.router,
		post("/v1/secrets/get", json!({"path": "never/stored"})),
	)
	.await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn invalid_path_is_bad_request() {
	let h = ready().await;
	let (status, body) = send(
		&h.router,
		post("/v1/secrets/put", json!({"path": "apps/../etc", "values": {"k": "v"}})),
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
	let h = ready().await;
	let request = Request::builder()
		.method(Method::POST)
		.uri("/v1/secrets/put")
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from("{not json"))
		.unwrap();
	let (status, body) = send(&h.router, request).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn soft_delete_hides_current_version() {
	let h = ready().await;
	send(
		&h.router,
		post("/v1/secrets/put", json!({"path": "apps/once", "values": {"k": "v"}})),
	)
	.await;

	let (status, body) = send(
		&h.router,
		post("/v1/secrets/delete", json!({"path": "apps/once"})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({}));

	let (status, _) = send(&h.router, post("/v1/secrets/get", json!({"path": "apps/once"}))).await;
	assert_eq!(status, StatusCode::NOT_FOUND);

	let (status, _) = send(
		&h.router,
		post("/v1/secrets/undelete", json!({"path": "apps/once", "versions": [1]})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	let (status, body) = send(&h.router, post("/v1/secrets/get", json!({"path": "apps/once"}))).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["version"], 1);
}

#[tokio::test]
async fn policy_writes_need_admin_token() {
	let h = ready().await;
	h.state
		.admin
		.install(&SecretString::new(ADMIN_TOKEN.to_string()))
		.await
		.unwrap();

	let (status, body) = send(&h.router, post("/v1/policies/put", policy_body())).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(body["error"], "unauthorized");

	let (status, _) = send(
		&h.router,
		post_as_admin("/v1/policies/put", "not-the-admin-token", policy_body()),
	)
	.await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let (status, policy) = send(
		&h.router,
		post_as_admin("/v1/policies/put", ADMIN_TOKEN, policy_body()),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(policy["created_by"], "admin");
	let id = policy["id"].as_str().unwrap().to_string();

	let (status, fetched) = send(&h.router, post("/v1/policies/get", json!({"id": id}))).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(fetched, policy);

	let (_, listed) = send(&h.router, post("/v1/policies/list", json!({}))).await;
	assert_eq!(listed["policies"].as_array().unwrap().len(), 1);

	let (status, _) = send(
		&h.router,
		post_as_admin("/v1/policies/delete", ADMIN_TOKEN, json!({"id": id})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);

	let (status, body) = send(&h.router, post("/v1/policies/get", json!({"id": id}))).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn malformed_policy_id_is_bad_request() {
	let h = ready().await;
	let (status, _) = send(&h.router, post("/v1/policies/get", json!({"id": "nope"}))).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_token_rotation() {
	let h = ready().await;
	h.state
		.admin
		.install(&SecretString::new(ADMIN_TOKEN.to_string()))
		.await
		.unwrap();

	let (status, _) = send(
		&h.router,
		post_as_admin(
			"/v1/admin/token",
			ADMIN_TOKEN,
			json!({"token": "rotated-admin-token-value"}),
		),
	)
	.await;
	assert_eq!(status, StatusCode::OK);

	let (status, _) = send(
		&h.router,
		post_as_admin("/v1/policies/put", ADMIN_TOKEN, policy_body()),
	)
	.await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let (status, _) = send(
		&h.router,
		post_as_admin("/v1/policies/put", "rotated-admin-token-value", policy_body()),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
}
