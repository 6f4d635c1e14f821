// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for warden-nexus.
//!
//! Precedence, lowest first: built-in defaults, TOML file
//! (`/etc/warden/nexus.toml` or `--config`), environment (`WARDEN_NEXUS_*`).

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

use std::path::PathBuf;

use tracing::{debug, info};
use warden_core::SecretString;

pub use error::ConfigError;
pub use layer::NexusConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

/// Fully resolved nexus configuration.
#[derive(Debug, Clone)]
pub struct NexusConfig {
	pub http: HttpConfig,
	pub tls: TlsConfig,
	pub backend: BackendSettings,
	pub recovery: RecoveryConfig,
	pub secrets: SecretsConfig,
	pub logging: LoggingConfig,
	/// Admin bearer token to install once the root key is resident.
	pub admin_token: Option<SecretString>,
}

impl NexusConfig {
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}
}

/// Load configuration from all sources. `config_path` replaces the system file.
pub fn load_config(config_path: Option<PathBuf>) -> Result<NexusConfig, ConfigError> {
	let toml = match config_path {
		Some(path) => TomlSource::new(path),
		None => TomlSource::system(),
	};
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(toml),
		Box::new(EnvSource::process()),
	])
}

pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<NexusConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = NexusConfigLayer::default();
	for source in &sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let admin_token = EnvSource::process().secret("ADMIN_TOKEN")?;
	finalize(merged, admin_token)
}

/// Resolve a merged layer into the runtime configuration.
pub fn finalize(
	layer: NexusConfigLayer,
	admin_token: Option<SecretString>,
) -> Result<NexusConfig, ConfigError> {
	let http = layer.http.unwrap_or_default().finalize();
	let tls = layer.tls.unwrap_or_default().finalize()?;
	let backend = layer.backend.unwrap_or_default().finalize()?;
	let recovery = layer.recovery.unwrap_or_default().finalize()?;
	let secrets = layer.secrets.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	info!(
		host = %http.host,
		port = http.port,
		tls = tls.identity.is_some(),
		backend = %backend.kind,
		custodians = recovery.custodians.len(),
		threshold = recovery.policy.threshold,
		admin_token_configured = admin_token.is_some(),
		"nexus configuration loaded"
	);

	Ok(NexusConfig {
		http,
		tls,
		backend,
		recovery,
		secrets,
		logging,
		admin_token,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn environment_overrides_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		std::io::Write::write_all(
			&mut file,
			br#"
			[http]
			port = 1000

			[tls]
			allow_insecure = true

			[recovery]
			threshold = 1

			[[recovery.custodians]]
			id = "k1"
			url = "http://k1"
			"#,
		)
		.unwrap();

		let config = load_from_sources(vec![
			Box::new(EnvSource::from_pairs([("WARDEN_NEXUS_HTTP_PORT", "2000")])),
			Box::new(TomlSource::new(file.path())),
			Box::new(DefaultsSource),
		])
		.unwrap();

		assert_eq!(config.http.port, 2000);
		assert!(config.tls.allow_insecure);
		assert_eq!(config.recovery.custodians.len(), 1);
		assert_eq!(config.socket_addr(), "0.0.0.0:2000");
	}

	#[test]
	fn missing_custodians_fail_validation() {
		let layer: NexusConfigLayer = toml::from_str("[tls]\nallow_insecure = true").unwrap();
		assert!(matches!(
			finalize(layer, None),
			Err(ConfigError::Validation(_))
		));
	}
}
