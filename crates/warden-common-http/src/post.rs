// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! JSON POST to a peer with the transport failure taxonomy.

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::TransportError;

const MAX_ERROR_BODY: usize = 512;

/// POST `body` to `url` and return the response payload.
///
/// The response is consumed here on every path, so the connection is handed
/// back to the pool whether the call succeeds or fails.
#[instrument(skip(client, body), fields(url = %url, body_len = body.len()))]
pub async fn post(client: &Client, url: &str, body: Vec<u8>) -> Result<Bytes, TransportError> {
	let response = client
		.post(url)
		.header(CONTENT_TYPE, "application/json")
		.body(body)
		.send()
		.await
		.map_err(|source| TransportError::Connectivity {
			url: url.to_string(),
			source,
		})?;

	let status = response.status();
	if status == StatusCode::NOT_FOUND {
		debug!("peer returned not found");
		return Err(TransportError::NotFound {
			url: url.to_string(),
		});
	}

	if !status.is_success() {
		let mut message = response.text().await.unwrap_or_default();
		if message.len() > MAX_ERROR_BODY {
			let mut cut = MAX_ERROR_BODY;
			while !message.is_char_boundary(cut) {
				cut -= 1;
			}
			message.truncate(cut);
		}
		return Err(TransportError::Peer {
			url: url.to_string(),
			status: status.as_u16(),
			message,
		});
	}

	response
		.bytes()
		.await
		.map_err(|source| TransportError::ReadBody {
			url: url.to_string(),
			source,
		})
}

/// [`post`] with JSON encoding of the request and decoding of the response.
pub async fn post_json<Req, Resp>(
	client: &Client,
	url: &str,
	request: &Req,
) -> Result<Resp, TransportError>
where
	Req: Serialize + ?Sized,
	Resp: DeserializeOwned,
{
	let body = serde_json::to_vec(request).map_err(TransportError::Encode)?;
	let bytes = post(client, url, body).await?;
	serde_json::from_slice(&bytes).map_err(|source| TransportError::Decode {
		url: url.to_string(),
		source,
	})
}
