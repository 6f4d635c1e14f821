// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Which authenticated peers may call which keeper endpoint.
//!
//! A CA-signed certificate only proves a client belongs to the deployment.
//! Releasing a share additionally requires the client's [`PeerIdentity`] to be
//! on the requester list, and storing one requires it on the contributor list.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;
use warden_common_http::PeerIdentity;
use warden_custody::wire::{CONTRIBUTE_PATH, SHARD_PATH};

use crate::routes::error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPolicy {
	/// No client identities exist (plain HTTP); every caller is let through.
	Open,
	Restricted {
		requesters: BTreeSet<String>,
		contributors: BTreeSet<String>,
	},
}

impl AccessPolicy {
	pub fn restricted<R, C>(requesters: R, contributors: C) -> Self
	where
		R: IntoIterator,
		R::Item: Into<String>,
		C: IntoIterator,
		C::Item: Into<String>,
	{
		AccessPolicy::Restricted {
			requesters: requesters.into_iter().map(Into::into).collect(),
			contributors: contributors.into_iter().map(Into::into).collect(),
		}
	}

	/// Whether `peer` may call the endpoint at `path`. Paths other than the
	/// share endpoints are not restricted.
	pub fn permits(&self, path: &str, peer: Option<&PeerIdentity>) -> bool {
		let AccessPolicy::Restricted {
			requesters,
			contributors,
		} = self
		else {
			return true;
		};
		let allowed = match path {
			SHARD_PATH => requesters,
			CONTRIBUTE_PATH => contributors,
			_ => return true,
		};
		peer.is_some_and(|peer| allowed.contains(peer.as_str()))
	}
}

pub(crate) async fn require_authorized_peer(
	State(access): State<Arc<AccessPolicy>>,
	request: Request,
	next: Next,
) -> Response {
	let peer = request.extensions().get::<PeerIdentity>();
	let path = request.uri().path();
	if !access.permits(path, peer) {
		let who = peer.map_or("<anonymous>", PeerIdentity::as_str);
		warn!(peer = who, path, "peer not authorized");
		return error(
			StatusCode::FORBIDDEN,
			"forbidden",
			format!("peer {who} may not call {path}"),
		);
	}
	next.run(request).await
}

#[cfg(test)]
mod tests {
	use super::*;

	fn policy() -> AccessPolicy {
		AccessPolicy::restricted(["spiffe://warden/nexus"], ["spiffe://warden/nexus", "spiffe://warden/keeper-2"])
	}

	#[test]
	fn open_policy_permits_anonymous_callers() {
		assert!(AccessPolicy::Open.permits(SHARD_PATH, None));
		assert!(AccessPolicy::Open.permits(CONTRIBUTE_PATH, None));
	}

	#[test]
	fn shard_requires_a_listed_requester() {
		let policy = policy();
		let nexus = PeerIdentity::new("spiffe://warden/nexus");
		let keeper = PeerIdentity::new("spiffe://warden/keeper-2");
		assert!(policy.permits(SHARD_PATH, Some(&nexus)));
		assert!(!policy.permits(SHARD_PATH, Some(&keeper)));
		assert!(!policy.permits(SHARD_PATH, None));
	}

	#[test]
	fn contribute_uses_its_own_list() {
		let policy = policy();
		let keeper = PeerIdentity::new("spiffe://warden/keeper-2");
		let stranger = PeerIdentity::new("spiffe://warden/keeper-9");
		assert!(policy.permits(CONTRIBUTE_PATH, Some(&keeper)));
		assert!(!policy.permits(CONTRIBUTE_PATH, Some(&stranger)));
	}

	#[test]
	fn health_is_never_restricted() {
		assert!(policy().permits("/healthz", None));
	}
}
