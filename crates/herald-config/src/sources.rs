// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::HeraldConfigLayer;
use crate::secret::{Secret, SecretString};
use crate::sections::{
	hoist_legacy_accounts, AccountConfigLayer, LoggingConfigLayer, MailConfigLayer, PathsConfigLayer, SchedulerConfigLayer,
	TlsMode,
};

const ACCOUNT_PREFIX: &str = "HERALD_ACCOUNT_";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<HeraldConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<HeraldConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(HeraldConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/herald/herald.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<HeraldConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(HeraldConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let parse_error = |e: toml::de::Error| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		};
		let mut table: toml::Table = toml::from_str(&content).map_err(parse_error)?;
		hoist_legacy_accounts(&mut table);
		let layer: HeraldConfigLayer = toml::Value::Table(table).try_into().map_err(parse_error)?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: HERALD_<SECTION>_<FIELD>. Accounts use
/// HERALD_ACCOUNT_<KEY>_ADDRESS and HERALD_ACCOUNT_<KEY>_PASSWORD[_FILE].
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<HeraldConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(HeraldConfigLayer {
			scheduler: Some(load_scheduler_from_env()?),
			mail: Some(load_mail_from_env()?),
			paths: Some(load_paths_from_env()),
			logging: Some(load_logging_from_env()),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_u16(name: &str) -> Result<Option<u16>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u16 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u32 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn parse_day_list(name: &str, value: &str) -> Result<Vec<u8>, ConfigError> {
	value
		.split(',')
		.map(str::trim)
		.filter(|part| !part.is_empty())
		.map(|part| {
			part.parse::<u8>().map_err(|_| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid day '{part}' (expected 0-6)"),
			})
		})
		.collect()
}

/// Load a secret from `VAR`, or from the file named by `VAR_FILE`.
///
/// `VAR_FILE` wins when both are set. A single trailing newline is stripped
/// from file contents.
pub fn load_secret_env(var: &str) -> Result<Option<SecretString>, ConfigError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path_str) = std::env::var(&file_var) {
		if path_str.is_empty() {
			return Err(ConfigError::Secret(format!("{file_var} is set but empty")));
		}

		let path = PathBuf::from(&path_str);
		let content = std::fs::read_to_string(&path).map_err(|e| {
			ConfigError::Secret(format!("failed to read {file_var} ({}): {e}", path.display()))
		})?;

		let secret = content.strip_suffix('\n').unwrap_or(&content).to_string();
		return Ok(Some(Secret::new(secret)));
	}

	Ok(env_var(var).map(Secret::new))
}

/// Account keys mentioned by `HERALD_ACCOUNT_<KEY>_*` variables, lowercased.
fn account_keys<I>(names: I) -> BTreeSet<String>
where
	I: IntoIterator<Item = String>,
{
	names
		.into_iter()
		.filter_map(|name| {
			let rest = name.strip_prefix(ACCOUNT_PREFIX)?;
			let key = rest
				.strip_suffix("_PASSWORD_FILE")
				.or_else(|| rest.strip_suffix("_PASSWORD"))
				.or_else(|| rest.strip_suffix("_ADDRESS"))?;
			(!key.is_empty()).then(|| key.to_lowercase())
		})
		.collect()
}

fn load_scheduler_from_env() -> Result<SchedulerConfigLayer, ConfigError> {
	let workdays = env_var("HERALD_SCHEDULER_WORKDAYS")
		.map(|v| parse_day_list("HERALD_SCHEDULER_WORKDAYS", &v))
		.transpose()?;

	Ok(SchedulerConfigLayer {
		workdays,
		start_hour: env_u32("HERALD_SCHEDULER_START_HOUR")?,
		end_hour: env_u32("HERALD_SCHEDULER_END_HOUR")?,
		timezone: env_var("HERALD_SCHEDULER_TIMEZONE"),
	})
}

fn load_mail_from_env() -> Result<MailConfigLayer, ConfigError> {
	let tls_mode = env_var("HERALD_SMTP_TLS")
		.map(|v| TlsMode::from_str_value(&v))
		.transpose()?;

	let mut accounts = BTreeMap::new();
	for key in account_keys(std::env::vars().map(|(name, _)| name)) {
		let var_key = key.to_uppercase();
		let address = env_var(&format!("{ACCOUNT_PREFIX}{var_key}_ADDRESS"));
		let password = load_secret_env(&format!("{ACCOUNT_PREFIX}{var_key}_PASSWORD"))?;
		accounts.insert(key, AccountConfigLayer { address, password });
	}

	Ok(MailConfigLayer {
		smtp_host: env_var("HERALD_SMTP_HOST"),
		smtp_port: env_u16("HERALD_SMTP_PORT")?,
		tls_mode,
		timeout_secs: env_u64("HERALD_SMTP_TIMEOUT_SECS")?,
		accounts,
	})
}

fn load_paths_from_env() -> PathsConfigLayer {
	PathsConfigLayer {
		jobs_dir: env_var("HERALD_JOBS_DIR").map(PathBuf::from),
		sources_dir: env_var("HERALD_SOURCES_DIR").map(PathBuf::from),
		uploads_dir: env_var("HERALD_UPLOADS_DIR").map(PathBuf::from),
	}
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("HERALD_LOG_LEVEL"),
	}
}
