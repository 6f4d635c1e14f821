// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backend configuration: a location plus a typed options map.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

/// Recognized backend options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendOption {
	DataDir,
	DatabaseFile,
	JournalMode,
	BusyTimeoutMs,
	MaxOpenConns,
	MaxIdleConns,
	ConnMaxLifetimeSeconds,
}

impl BackendOption {
	pub const ALL: [BackendOption; 7] = [
		BackendOption::DataDir,
		BackendOption::DatabaseFile,
		BackendOption::JournalMode,
		BackendOption::BusyTimeoutMs,
		BackendOption::MaxOpenConns,
		BackendOption::MaxIdleConns,
		BackendOption::ConnMaxLifetimeSeconds,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			BackendOption::DataDir => "data_dir",
			BackendOption::DatabaseFile => "database_file",
			BackendOption::JournalMode => "journal_mode",
			BackendOption::BusyTimeoutMs => "busy_timeout_ms",
			BackendOption::MaxOpenConns => "max_open_conns",
			BackendOption::MaxIdleConns => "max_idle_conns",
			BackendOption::ConnMaxLifetimeSeconds => "conn_max_lifetime_seconds",
		}
	}
}

impl fmt::Display for BackendOption {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for BackendOption {
	type Err = BackendError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		BackendOption::ALL
			.into_iter()
			.find(|o| o.as_str() == s)
			.ok_or_else(|| BackendError::Configuration(format!("unknown backend option: {s}")))
	}
}

/// Configuration consumed once at `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendConfig {
	/// Default data directory when `data_dir` is not given.
	pub location: PathBuf,
	pub options: BTreeMap<BackendOption, String>,
}

impl BackendConfig {
	pub fn new(location: impl Into<PathBuf>) -> Self {
		Self {
			location: location.into(),
			options: BTreeMap::new(),
		}
	}

	pub fn with_option(mut self, option: BackendOption, value: impl Into<String>) -> Self {
		self.options.insert(option, value.into());
		self
	}

	/// Build from untyped string keys, e.g. a config file table.
	pub fn from_raw<I, K, V>(location: impl Into<PathBuf>, raw: I) -> BackendResult<Self>
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: Into<String>,
	{
		let mut config = Self::new(location);
		for (key, value) in raw {
			let option = key.as_ref().parse::<BackendOption>()?;
			config.options.insert(option, value.into());
		}
		Ok(config)
	}

	pub fn get(&self, option: BackendOption) -> Option<&str> {
		self.options.get(&option).map(String::as_str)
	}

	fn parse<T: FromStr>(&self, option: BackendOption, default: T) -> BackendResult<T> {
		match self.get(option) {
			None => Ok(default),
			Some(raw) => raw.trim().parse::<T>().map_err(|_| {
				BackendError::Configuration(format!("invalid value for {option}: {raw:?}"))
			}),
		}
	}
}

/// SQLite journal modes accepted in `journal_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
	Delete,
	Truncate,
	Persist,
	Memory,
	Wal,
	Off,
}

impl FromStr for JournalMode {
	type Err = BackendError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			"DELETE" => Ok(JournalMode::Delete),
			"TRUNCATE" => Ok(JournalMode::Truncate),
			"PERSIST" => Ok(JournalMode::Persist),
			"MEMORY" => Ok(JournalMode::Memory),
			"WAL" => Ok(JournalMode::Wal),
			"OFF" => Ok(JournalMode::Off),
			other => Err(BackendError::Configuration(format!(
				"invalid journal_mode: {other}"
			))),
		}
	}
}

/// Resolved settings for the SQLite variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteSettings {
	pub data_dir: PathBuf,
	pub database_file: String,
	pub journal_mode: JournalMode,
	pub busy_timeout: Duration,
	pub max_open_conns: u32,
	pub max_idle_conns: u32,
	/// `None` keeps connections for the lifetime of the pool.
	pub conn_max_lifetime: Option<Duration>,
}

impl SqliteSettings {
	pub const DEFAULT_DATABASE_FILE: &'static str = "warden.db";

	pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
		let data_dir = match config.get(BackendOption::DataDir) {
			Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
			_ => config.location.clone(),
		};
		if data_dir.as_os_str().is_empty() {
			return Err(BackendError::Configuration(
				"no data directory configured".to_string(),
			));
		}

		let database_file = config
			.get(BackendOption::DatabaseFile)
			.unwrap_or(Self::DEFAULT_DATABASE_FILE)
			.trim()
			.to_string();
		if database_file.is_empty() || database_file.contains('/') || database_file == ".." {
			return Err(BackendError::Configuration(format!(
				"invalid database_file: {database_file:?}"
			)));
		}

		let journal_mode = match config.get(BackendOption::JournalMode) {
			Some(mode) => mode.parse()?,
			None => JournalMode::Wal,
		};

		let busy_timeout_ms: u64 = config.parse(BackendOption::BusyTimeoutMs, 5_000)?;
		let max_open_conns: u32 = config.parse(BackendOption::MaxOpenConns, 10)?;
		let max_idle_conns: u32 = config.parse(BackendOption::MaxIdleConns, 2)?;
		let lifetime_secs: u64 = config.parse(BackendOption::ConnMaxLifetimeSeconds, 0)?;

		if max_open_conns == 0 {
			return Err(BackendError::Configuration(
				"max_open_conns must be at least 1".to_string(),
			));
		}

		Ok(Self {
			data_dir,
			database_file,
			journal_mode,
			busy_timeout: Duration::from_millis(busy_timeout_ms),
			max_open_conns,
			max_idle_conns: max_idle_conns.min(max_open_conns),
			conn_max_lifetime: (lifetime_secs > 0).then(|| Duration::from_secs(lifetime_secs)),
		})
	}

	pub fn database_path(&self) -> PathBuf {
		self.data_dir.join(&self.database_file)
	}
}
