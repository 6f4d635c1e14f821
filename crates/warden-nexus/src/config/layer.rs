// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use super::sections::{
	BackendConfigLayer, HttpConfigLayer, LoggingConfigLayer, RecoveryConfigLayer,
	SecretsConfigLayer, TlsConfigLayer,
};

/// One source's view of the configuration. Absent sections change nothing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NexusConfigLayer {
	#[serde(default)]
	pub http: Option<HttpConfigLayer>,
	#[serde(default)]
	pub tls: Option<TlsConfigLayer>,
	#[serde(default)]
	pub backend: Option<BackendConfigLayer>,
	#[serde(default)]
	pub recovery: Option<RecoveryConfigLayer>,
	#[serde(default)]
	pub secrets: Option<SecretsConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

macro_rules! merge_section {
	($self:ident, $other:ident, $($field:ident),*) => {
		$(
			if let Some(section) = $other.$field {
				$self.$field.get_or_insert_with(Default::default).merge(section);
			}
		)*
	};
}

impl NexusConfigLayer {
	pub fn merge(&mut self, other: NexusConfigLayer) {
		merge_section!(self, other, http, tls, backend, recovery, secrets, logging);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn toml_sections_deserialize() {
		let layer: NexusConfigLayer = toml::from_str(
			r#"
			[http]
			port = 9000

			[backend]
			kind = "memory"

			[backend.options]
			journal_mode = "delete"

			[recovery]
			threshold = 2

			[[recovery.custodians]]
			id = "keeper-1"
			url = "https://keeper-1:8443"

			[[recovery.custodians]]
			id = "keeper-2"
			url = "https://keeper-2:8443"

			[recovery.retry]
			max_attempts = 5
			base_delay = 100
			"#,
		)
		.unwrap();

		assert_eq!(layer.http.unwrap().port, Some(9000));
		let recovery = layer.recovery.unwrap();
		assert_eq!(recovery.custodians.unwrap().len(), 2);
		let retry = recovery.retry.unwrap();
		assert_eq!(retry.max_attempts, 5);
		assert_eq!(retry.base_delay, std::time::Duration::from_millis(100));
	}

	#[test]
	fn merge_keeps_untouched_sections() {
		let mut base: NexusConfigLayer = toml::from_str("[http]\nport = 1\n[logging]\nlevel = \"debug\"").unwrap();
		base.merge(toml::from_str("[http]\nhost = \"127.0.0.1\"").unwrap());
		let http = base.http.clone().unwrap();
		assert_eq!(http.port, Some(1));
		assert_eq!(http.host.as_deref(), Some("127.0.0.1"));
		assert_eq!(base.logging.unwrap().level.as_deref(), Some("debug"));
	}
}
