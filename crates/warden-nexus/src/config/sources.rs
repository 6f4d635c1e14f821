// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, TOML file, environment.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};
use warden_backend::BackendOption;
use warden_core::SecretString;

use super::error::ConfigError;
use super::layer::NexusConfigLayer;
use super::sections::{
	parse_custodian_list, BackendConfigLayer, HttpConfigLayer, LogFormat, LoggingConfigLayer,
	RecoveryConfigLayer, SecretsConfigLayer, TlsConfigLayer,
};

pub const ENV_PREFIX: &str = "WARDEN_NEXUS";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<NexusConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<NexusConfigLayer, ConfigError> {
		Ok(NexusConfigLayer::default())
	}
}

pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/warden/nexus.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<NexusConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(NexusConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: NexusConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable source.
///
/// Convention: `WARDEN_NEXUS_<SECTION>_<FIELD>`.
pub struct EnvSource {
	lookup: Lookup,
}

impl EnvSource {
	/// Read the process environment.
	pub fn process() -> Self {
		Self {
			lookup: Box::new(|name| std::env::var(name).ok()),
		}
	}

	/// Read from a fixed set of variables.
	pub fn from_pairs<I, K, V>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		let vars: HashMap<String, String> = pairs
			.into_iter()
			.map(|(k, v)| (k.into(), v.into()))
			.collect();
		Self {
			lookup: Box::new(move |name| vars.get(name).cloned()),
		}
	}

	fn var(&self, field: &str) -> Option<String> {
		(self.lookup)(&format!("{ENV_PREFIX}_{field}")).filter(|s| !s.is_empty())
	}

	fn bool(&self, field: &str) -> Option<bool> {
		self.var(field)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn parsed<T: FromStr>(&self, field: &str) -> Result<Option<T>, ConfigError> {
		match self.var(field) {
			Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
				key: format!("{ENV_PREFIX}_{field}"),
				message: format!("invalid value '{v}'"),
			}),
			None => Ok(None),
		}
	}

	/// A secret given directly or, with a `_FILE` suffix, as a file path.
	pub fn secret(&self, field: &str) -> Result<Option<SecretString>, ConfigError> {
		if let Some(value) = self.var(field) {
			return Ok(Some(SecretString::new(value)));
		}
		let file_field = format!("{field}_FILE");
		match self.var(&file_field) {
			Some(path) => std::fs::read_to_string(&path)
				.map(|content| Some(SecretString::new(content.trim().to_string())))
				.map_err(|e| ConfigError::Secret(format!("{ENV_PREFIX}_{file_field}={path}: {e}"))),
			None => Ok(None),
		}
	}

	fn http(&self) -> Result<HttpConfigLayer, ConfigError> {
		Ok(HttpConfigLayer {
			host: self.var("HTTP_HOST"),
			port: self.parsed("HTTP_PORT")?,
		})
	}

	fn tls(&self) -> TlsConfigLayer {
		TlsConfigLayer {
			cert: self.var("TLS_CERT").map(PathBuf::from),
			key: self.var("TLS_KEY").map(PathBuf::from),
			ca: self.var("TLS_CA").map(PathBuf::from),
			allow_insecure: self.bool("TLS_ALLOW_INSECURE"),
		}
	}

	fn backend(&self) -> BackendConfigLayer {
		let options: BTreeMap<String, String> = BackendOption::ALL
			.into_iter()
			.filter_map(|option| {
				let field = format!("BACKEND_{}", option.as_str().to_ascii_uppercase());
				self.var(&field).map(|v| (option.as_str().to_string(), v))
			})
			.collect();
		BackendConfigLayer {
			kind: self.var("BACKEND_KIND"),
			location: self.var("BACKEND_LOCATION").map(PathBuf::from),
			options: (!options.is_empty()).then_some(options),
		}
	}

	fn recovery(&self) -> Result<RecoveryConfigLayer, ConfigError> {
		let custodians = match self.var("RECOVERY_CUSTODIANS") {
			Some(raw) => Some(parse_custodian_list(&raw).map_err(|message| {
				ConfigError::InvalidValue {
					key: format!("{ENV_PREFIX}_RECOVERY_CUSTODIANS"),
					message,
				}
			})?),
			None => None,
		};
		Ok(RecoveryConfigLayer {
			custodians,
			threshold: self.parsed("RECOVERY_THRESHOLD")?,
			call_timeout_ms: self.parsed("RECOVERY_CALL_TIMEOUT_MS")?,
			round_backoff_ms: self.parsed("RECOVERY_ROUND_BACKOFF_MS")?,
			max_rounds: self.parsed("RECOVERY_MAX_ROUNDS")?,
			resync_interval_secs: self.parsed("RECOVERY_RESYNC_INTERVAL_SECS")?,
			requester: self.var("RECOVERY_REQUESTER"),
			retry: None,
		})
	}

	fn secrets(&self) -> Result<SecretsConfigLayer, ConfigError> {
		Ok(SecretsConfigLayer {
			max_versions: self.parsed("SECRETS_MAX_VERSIONS")?,
		})
	}

	fn logging(&self) -> Result<LoggingConfigLayer, ConfigError> {
		Ok(LoggingConfigLayer {
			level: self.var("LOGGING_LEVEL"),
			format: self.parsed::<LogFormat>("LOGGING_FORMAT")?,
		})
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<NexusConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(NexusConfigLayer {
			http: Some(self.http()?),
			tls: Some(self.tls()),
			backend: Some(self.backend()),
			recovery: Some(self.recovery()?),
			secrets: Some(self.secrets()?),
			logging: Some(self.logging()?),
		})
	}
}
