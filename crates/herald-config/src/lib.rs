// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for Herald.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`HERALD_*`)
//!
//! # Usage
//!
//! ```ignore
//! use herald_config::load_config;
//!
//! let config = load_config()?;
//! println!("Sending between {}:00 and {}:00", config.scheduler.start_hour, config.scheduler.end_hour);
//! ```

pub mod error;
pub mod layer;
pub mod secret;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::HeraldConfigLayer;
pub use secret::{Secret, SecretString};
pub use sections::*;
pub use sources::{load_secret_env, ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved Herald configuration.
#[derive(Debug, Clone, Default)]
pub struct HeraldConfig {
	pub scheduler: SchedulerConfig,
	pub mail: MailConfig,
	pub paths: PathsConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`HERALD_*`)
/// 2. Config file (`/etc/herald/herald.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<HeraldConfig, ConfigError> {
	let sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	];
	load_from_sources(sources)
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<HeraldConfig, ConfigError> {
	let sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	];
	load_from_sources(sources)
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<HeraldConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = HeraldConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: HeraldConfigLayer) -> Result<HeraldConfig, ConfigError> {
	let scheduler = layer.scheduler.unwrap_or_default().finalize()?;
	let mail = layer.mail.unwrap_or_default().finalize()?;
	let paths = layer.paths.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	info!(
		workdays = ?scheduler.workdays,
		start_hour = scheduler.start_hour,
		end_hour = scheduler.end_hour,
		timezone = %scheduler.timezone,
		smtp_host = %mail.smtp_host,
		smtp_port = mail.smtp_port,
		accounts = mail.accounts.len(),
		jobs_dir = %paths.jobs_dir.display(),
		"Herald configuration loaded"
	);

	Ok(HeraldConfig {
		scheduler,
		mail,
		paths,
		logging,
	})
}
