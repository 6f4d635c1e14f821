// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keeper configuration: defaults < TOML file < `WARDEN_KEEPER_*` environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use warden_common_http::TlsIdentity;
use warden_core::ErrorKind;

use crate::access::AccessPolicy;

pub const ENV_PREFIX: &str = "WARDEN_KEEPER";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/warden/keeper.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },

	#[error("configuration validation failed: {0}")]
	Validation(String),
}

impl ConfigError {
	pub fn kind(&self) -> ErrorKind {
		ErrorKind::Configuration
	}
}

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

/// Fully resolved keeper configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperConfig {
	pub host: String,
	pub port: u16,
	pub identity: Option<TlsIdentity>,
	pub allow_insecure: bool,
	pub access: AccessPolicy,
	pub log_level: String,
	pub log_format: LogFormat,
}

impl KeeperConfig {
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

/// Partial configuration from one source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeeperConfigLayer {
	#[serde(default)]
	pub http: HttpLayer,
	#[serde(default)]
	pub tls: TlsLayer,
	#[serde(default)]
	pub access: AccessLayer,
	#[serde(default)]
	pub logging: LoggingLayer,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpLayer {
	pub host: Option<String>,
	pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsLayer {
	pub cert: Option<PathBuf>,
	pub key: Option<PathBuf>,
	pub ca: Option<PathBuf>,
	pub allow_insecure: Option<bool>,
}

/// Peer identities (URI or DNS SANs) allowed to call the share endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessLayer {
	pub requesters: Option<Vec<String>>,
	pub contributors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingLayer {
	pub level: Option<String>,
	pub format: Option<LogFormat>,
}

fn overlay<T>(base: &mut Option<T>, other: Option<T>) {
	if other.is_some() {
		*base = other;
	}
}

impl KeeperConfigLayer {
	pub fn merge(&mut self, other: KeeperConfigLayer) {
		overlay(&mut self.http.host, other.http.host);
		overlay(&mut self.http.port, other.http.port);
		overlay(&mut self.tls.cert, other.tls.cert);
		overlay(&mut self.tls.key, other.tls.key);
		overlay(&mut self.tls.ca, other.tls.ca);
		overlay(&mut self.tls.allow_insecure, other.tls.allow_insecure);
		overlay(&mut self.access.requesters, other.access.requesters);
		overlay(&mut self.access.contributors, other.access.contributors);
		overlay(&mut self.logging.level, other.logging.level);
		overlay(&mut self.logging.format, other.logging.format);
	}

	pub fn finalize(self) -> Result<KeeperConfig, ConfigError> {
		let allow_insecure = self.tls.allow_insecure.unwrap_or(false);
		let identity = match (self.tls.cert, self.tls.key, self.tls.ca) {
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
		let requesters = self.access.requesters.unwrap_or_default();
		let contributors = self.access.contributors.unwrap_or_default();
		let access = if identity.is_some() {
			if requesters.is_empty() || contributors.is_empty() {
				return Err(ConfigError::Validation(
					"access.requesters and access.contributors must name at least one peer when TLS is enabled"
						.to_string(),
				));
			}
			AccessPolicy::restricted(requesters, contributors)
		} else {
			if !requesters.is_empty() || !contributors.is_empty() {
				return Err(ConfigError::Validation(
					"access lists need a TLS identity to check peers against".to_string(),
				));
			}
			AccessPolicy::Open
		};
		Ok(KeeperConfig {
			host: self.http.host.unwrap_or_else(|| "0.0.0.0".to_string()),
			port: self.http.port.unwrap_or(8443),
			identity,
			allow_insecure,
			access,
			log_level: self.logging.level.unwrap_or_else(|| "info".to_string()),
			log_format: self.logging.format.unwrap_or_default(),
		})
	}
}

/// Parse a TOML file. A missing file contributes nothing.
pub fn file_layer(path: &Path) -> Result<KeeperConfigLayer, ConfigError> {
	if !path.exists() {
		debug!(path = %path.display(), "config file not found, skipping");
		return Ok(KeeperConfigLayer::default());
	}
	let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
		path: path.to_path_buf(),
		source: e,
	})?;
	toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
		path: path.to_path_buf(),
		source: e,
	})
}

/// Build a layer from `WARDEN_KEEPER_<SECTION>_<FIELD>` variables.
pub fn env_layer(vars: &HashMap<String, String>) -> Result<KeeperConfigLayer, ConfigError> {
	let var = |field: &str| {
		vars.get(&format!("{ENV_PREFIX}_{field}"))
			.filter(|v| !v.is_empty())
			.cloned()
	};
	let invalid = |field: &str, value: &str| ConfigError::InvalidValue {
		key: format!("{ENV_PREFIX}_{field}"),
		message: format!("invalid value '{value}'"),
	};

	let port = match var("HTTP_PORT") {
		Some(v) => Some(v.parse().map_err(|_| invalid("HTTP_PORT", &v))?),
		None => None,
	};
	let format = match var("LOGGING_FORMAT") {
		Some(v) => Some(v.parse().map_err(|_| invalid("LOGGING_FORMAT", &v))?),
		None => None,
	};

	let list = |field: &str| {
		var(field).map(|v| {
			v.split(',')
				.map(str::trim)
				.filter(|entry| !entry.is_empty())
				.map(String::from)
				.collect::<Vec<_>>()
		})
	};

	Ok(KeeperConfigLayer {
		http: HttpLayer {
			host: var("HTTP_HOST"),
			port,
		},
		tls: TlsLayer {
			cert: var("TLS_CERT").map(PathBuf::from),
			key: var("TLS_KEY").map(PathBuf::from),
			ca: var("TLS_CA").map(PathBuf::from),
			allow_insecure: var("TLS_ALLOW_INSECURE")
				.map(|v| v.eq_ignore_ascii_case("true") || v == "1"),
		},
		access: AccessLayer {
			requesters: list("ACCESS_REQUESTERS"),
			contributors: list("ACCESS_CONTRIBUTORS"),
		},
		logging: LoggingLayer {
			level: var("LOGGING_LEVEL"),
			format,
		},
	})
}

/// Load configuration. `config_path` replaces the system file.
pub fn load_config(config_path: Option<PathBuf>) -> Result<KeeperConfig, ConfigError> {
	let path = config_path.unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH));
	let vars: HashMap<String, String> = std::env::vars().collect();
	load_from(&path, &vars)
}

pub fn load_from(path: &Path, vars: &HashMap<String, String>) -> Result<KeeperConfig, ConfigError> {
	let mut layer = KeeperConfigLayer::default();
	layer.merge(file_layer(path)?);
	layer.merge(env_layer(vars)?);
	layer.finalize()
}
