// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections. Each has a resolved form and a partial layer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use warden_backend::{BackendConfig, BackendKind};
use warden_common_http::{RetryConfig, TlsIdentity};
use warden_custody::{CustodianEndpoint, RecoveryPolicy};

use super::error::ConfigError;

// ---------------------------------------------------------------------------
// http

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
	pub host: String,
	pub port: u16,
}

impl Default for HttpConfig {
	fn default() -> Self {
		HttpConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpConfigLayer {
	#[serde(default)]
	pub host: Option<String>,
	#[serde(default)]
	pub port: Option<u16>,
}

impl HttpConfigLayer {
	pub fn merge(&mut self, other: HttpConfigLayer) {
		if other.host.is_some() {
			self.host = other.host;
		}
		if other.port.is_some() {
			self.port = other.port;
		}
	}

	pub fn finalize(self) -> HttpConfig {
		HttpConfig {
			host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
			port: self.port.unwrap_or(8553),
		}
	}
}

// ---------------------------------------------------------------------------
// tls

/// Transport identity for both the listener and outbound custodian calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
	pub identity: Option<TlsIdentity>,
	/// Serve and call over plain HTTP. Local development only.
	pub allow_insecure: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfigLayer {
	#[serde(default)]
	pub cert: Option<PathBuf>,
	#[serde(default)]
	pub key: Option<PathBuf>,
	#[serde(default)]
	pub ca: Option<PathBuf>,
	#[serde(default)]
	pub allow_insecure: Option<bool>,
}

impl TlsConfigLayer {
	pub fn merge(&mut self, other: TlsConfigLayer) {
		if other.cert.is_some() {
			self.cert = other.cert;
		}
		if other.key.is_some() {
			self.key = other.key;
		}
		if other.ca.is_some() {
			self.ca = other.ca;
		}
		if other.allow_insecure.is_some() {
			self.allow_insecure = other.allow_insecure;
		}
	}

	pub fn finalize(self) -> Result<TlsConfig, ConfigError> {
		let allow_insecure = self.allow_insecure.unwrap_or(false);
		let identity = match (self.cert, self.key, self.ca) {
			(Some(cert), Some(key), Some(ca)) => Some(TlsIdentity { cert, key, ca }),
			(None, None, None) => None,
			_ => {
				return Err(ConfigError::Validation(
					"tls.cert, tls.key and tls.ca must be set together".to_string(),
				))
			}
		};
		if identity.is_none() && !allow_insecure {
			return Err(ConfigError::Validation(
				"no TLS identity configured; set tls.cert/key/ca or tls.allow_insecure".to_string(),
			));
		}
		Ok(TlsConfig {
			identity,
			allow_insecure,
		})
	}
}

// ---------------------------------------------------------------------------
// backend

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
	pub kind: BackendKind,
	pub config: BackendConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfigLayer {
	#[serde(default)]
	pub kind: Option<String>,
	#[serde(default)]
	pub location: Option<PathBuf>,
	/// Raw option map, keys as in `BackendOption`.
	#[serde(default)]
	pub options: Option<BTreeMap<String, String>>,
}

impl BackendConfigLayer {
	pub fn merge(&mut self, other: BackendConfigLayer) {
		if other.kind.is_some() {
			self.kind = other.kind;
		}
		if other.location.is_some() {
			self.location = other.location;
		}
		if let Some(options) = other.options {
			self.options.get_or_insert_with(BTreeMap::new).extend(options);
		}
	}

	pub fn finalize(self) -> Result<BackendSettings, ConfigError> {
		let kind = match self.kind {
			Some(raw) => BackendKind::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
				key: "backend.kind".to_string(),
				message: e.to_string(),
			})?,
			None => BackendKind::default(),
		};
		let location = self.location.unwrap_or_else(|| PathBuf::from("./data"));
		let config = BackendConfig::from_raw(location, self.options.unwrap_or_default())
			.map_err(|e| ConfigError::InvalidValue {
				key: "backend.options".to_string(),
				message: e.to_string(),
			})?;
		Ok(BackendSettings { kind, config })
	}
}

// ---------------------------------------------------------------------------
// recovery

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
	pub custodians: Vec<CustodianEndpoint>,
	pub policy: RecoveryPolicy,
	pub resync_interval: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecoveryConfigLayer {
	#[serde(default)]
	pub custodians: Option<Vec<CustodianEndpoint>>,
	#[serde(default)]
	pub threshold: Option<usize>,
	#[serde(default)]
	pub call_timeout_ms: Option<u64>,
	#[serde(default)]
	pub round_backoff_ms: Option<u64>,
	#[serde(default)]
	pub max_rounds: Option<u32>,
	#[serde(default)]
	pub resync_interval_secs: Option<u64>,
	#[serde(default)]
	pub requester: Option<String>,
	#[serde(default)]
	pub retry: Option<RetryConfig>,
}

impl RecoveryConfigLayer {
	pub fn merge(&mut self, other: RecoveryConfigLayer) {
		if other.custodians.is_some() {
			self.custodians = other.custodians;
		}
		if other.threshold.is_some() {
			self.threshold = other.threshold;
		}
		if other.call_timeout_ms.is_some() {
			self.call_timeout_ms = other.call_timeout_ms;
		}
		if other.round_backoff_ms.is_some() {
			self.round_backoff_ms = other.round_backoff_ms;
		}
		if other.max_rounds.is_some() {
			self.max_rounds = other.max_rounds;
		}
		if other.resync_interval_secs.is_some() {
			self.resync_interval_secs = other.resync_interval_secs;
		}
		if other.requester.is_some() {
			self.requester = other.requester;
		}
		if other.retry.is_some() {
			self.retry = other.retry;
		}
	}

	pub fn finalize(self) -> Result<RecoveryConfig, ConfigError> {
		let defaults = RecoveryPolicy::default();
		let custodians = self.custodians.unwrap_or_default();
		let policy = RecoveryPolicy {
			threshold: self.threshold.unwrap_or(defaults.threshold),
			call_timeout: self
				.call_timeout_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.call_timeout),
			retry: self.retry.unwrap_or(defaults.retry),
			round_backoff: self
				.round_backoff_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.round_backoff),
			max_rounds: self.max_rounds.unwrap_or(defaults.max_rounds),
			requester: self.requester.unwrap_or(defaults.requester),
		};

		if custodians.is_empty() {
			return Err(ConfigError::Validation(
				"recovery.custodians must name at least one keeper".to_string(),
			));
		}
		if policy.threshold == 0 || policy.threshold > custodians.len() {
			return Err(ConfigError::Validation(format!(
				"recovery.threshold must be between 1 and {} (the custodian count), got {}",
				custodians.len(),
				policy.threshold
			)));
		}
		let mut ids: Vec<&str> = custodians.iter().map(|c| c.id.as_str()).collect();
		ids.sort_unstable();
		if ids.windows(2).any(|w| w[0] == w[1]) {
			return Err(ConfigError::Validation(
				"recovery.custodians ids must be unique".to_string(),
			));
		}

		Ok(RecoveryConfig {
			custodians,
			policy,
			resync_interval: Duration::from_secs(self.resync_interval_secs.unwrap_or(300).max(1)),
		})
	}
}

/// Parse `id=url,id=url` as used in the environment.
pub fn parse_custodian_list(raw: &str) -> Result<Vec<CustodianEndpoint>, String> {
	raw.split(',')
		.map(str::trim)
		.filter(|entry| !entry.is_empty())
		.map(|entry| match entry.split_once('=') {
			Some((id, url)) if !id.trim().is_empty() && !url.trim().is_empty() => {
				Ok(CustodianEndpoint::new(id.trim(), url.trim()))
			}
			_ => Err(format!("expected id=url, got {entry:?}")),
		})
		.collect()
}

// ---------------------------------------------------------------------------
// logging

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
}

impl FromStr for LogFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"pretty" | "text" => Ok(LogFormat::Pretty),
			"json" => Ok(LogFormat::Json),
			other => Err(format!("unknown log format {other:?}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
	/// Fallback filter when `RUST_LOG` is unset.
	pub level: String,
	pub format: LogFormat,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		LoggingConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfigLayer {
	#[serde(default)]
	pub level: Option<String>,
	#[serde(default)]
	pub format: Option<LogFormat>,
}

impl LoggingConfigLayer {
	pub fn merge(&mut self, other: LoggingConfigLayer) {
		if other.level.is_some() {
			self.level = other.level;
		}
		if other.format.is_some() {
			self.format = other.format;
		}
	}

	pub fn finalize(self) -> LoggingConfig {
		LoggingConfig {
			level: self.level.unwrap_or_else(|| "info".to_string()),
			format: self.format.unwrap_or_default(),
		}
	}
}

// ---------------------------------------------------------------------------
// secrets

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretsConfig {
	pub max_versions: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfigLayer {
	#[serde(default)]
	pub max_versions: Option<u32>,
}

impl SecretsConfigLayer {
	pub fn merge(&mut self, other: SecretsConfigLayer) {
		if other.max_versions.is_some() {
			self.max_versions = other.max_versions;
		}
	}

	pub fn finalize(self) -> SecretsConfig {
		SecretsConfig {
			max_versions: self
				.max_versions
				.unwrap_or(warden_core::DEFAULT_MAX_VERSIONS)
				.max(1),
		}
	}
}
