// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound mail configuration: one SMTP relay, several sending accounts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::secret::SecretString;

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// TLS mode for SMTP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
	/// Plain text connection.
	None,
	/// STARTTLS upgrade after connecting.
	#[default]
	StartTls,
	/// Implicit TLS.
	Tls,
}

impl TlsMode {
	pub fn from_str_value(value: &str) -> Result<Self, ConfigError> {
		match value.to_lowercase().as_str() {
			"starttls" | "true" => Ok(TlsMode::StartTls),
			"tls" => Ok(TlsMode::Tls),
			"none" | "false" => Ok(TlsMode::None),
			_ => Err(ConfigError::InvalidValue {
				key: "mail.tls_mode".to_string(),
				message: format!("Invalid value: '{value}'. Expected: starttls, tls, none"),
			}),
		}
	}
}

/// One sending account. The address doubles as the SMTP login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfigLayer {
	#[serde(alias = "adress")]
	pub address: Option<String>,
	#[serde(skip_serializing)]
	pub password: Option<SecretString>,
}

impl AccountConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.address.is_some() {
			self.address = other.address;
		}
		if other.password.is_some() {
			self.password = other.password;
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailConfigLayer {
	pub smtp_host: Option<String>,
	pub smtp_port: Option<u16>,
	pub tls_mode: Option<TlsMode>,
	pub timeout_secs: Option<u64>,
	#[serde(default)]
	pub accounts: BTreeMap<String, AccountConfigLayer>,
}

/// Move account tables written directly under `[mail]` (`[mail.sales]`) into
/// `mail.accounts`. An entry already under `accounts` keeps precedence.
pub fn hoist_legacy_accounts(root: &mut toml::Table) {
	let Some(toml::Value::Table(mail)) = root.get_mut("mail") else {
		return;
	};

	let legacy: Vec<String> = mail
		.iter()
		.filter(|(key, value)| key.as_str() != "accounts" && value.is_table())
		.map(|(key, _)| key.clone())
		.collect();
	if legacy.is_empty() {
		return;
	}

	let moved: Vec<(String, toml::Value)> = legacy
		.into_iter()
		.filter_map(|key| mail.remove(&key).map(|value| (key, value)))
		.collect();
	let accounts = mail
		.entry("accounts")
		.or_insert_with(|| toml::Value::Table(toml::Table::new()));
	if let toml::Value::Table(accounts) = accounts {
		for (key, value) in moved {
			tracing::debug!(account = %key, "Treating [mail.{key}] as an account");
			accounts.entry(key).or_insert(value);
		}
	}
}

impl MailConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.smtp_host.is_some() {
			self.smtp_host = other.smtp_host;
		}
		if other.smtp_port.is_some() {
			self.smtp_port = other.smtp_port;
		}
		if other.tls_mode.is_some() {
			self.tls_mode = other.tls_mode;
		}
		if other.timeout_secs.is_some() {
			self.timeout_secs = other.timeout_secs;
		}
		for (key, account) in other.accounts {
			match self.accounts.get_mut(&key) {
				Some(existing) => existing.merge(account),
				None => {
					self.accounts.insert(key, account);
				}
			}
		}
	}

	pub fn finalize(self) -> Result<MailConfig, ConfigError> {
		let smtp_host = self.smtp_host.filter(|h| !h.is_empty());

		let mut accounts = BTreeMap::new();
		for (key, layer) in self.accounts {
			let address = layer
				.address
				.filter(|a| !a.trim().is_empty())
				.ok_or_else(|| {
					ConfigError::Validation(format!("mail.accounts.{key} has no address"))
				})?;
			let password = layer.password.ok_or_else(|| {
				ConfigError::Validation(format!(
					"mail.accounts.{key} has no password (set it in the config file or HERALD_ACCOUNT_{}_PASSWORD)",
					key.to_uppercase()
				))
			})?;
			accounts.insert(
				key,
				AccountConfig {
					address: address.trim().to_string(),
					password,
				},
			);
		}

		if !accounts.is_empty() && smtp_host.is_none() {
			return Err(ConfigError::Validation(
				"mail.smtp_host is required when accounts are configured".to_string(),
			));
		}

		Ok(MailConfig {
			smtp_host: smtp_host.unwrap_or_default(),
			smtp_port: self.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
			tls_mode: self.tls_mode.unwrap_or_default(),
			timeout_secs: self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
			accounts,
		})
	}
}

#[derive(Debug, Clone)]
pub struct AccountConfig {
	pub address: String,
	pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
	pub smtp_host: String,
	pub smtp_port: u16,
	pub tls_mode: TlsMode,
	pub timeout_secs: u64,
	/// Keyed by account name; iteration order decides the default account.
	pub accounts: BTreeMap<String, AccountConfig>,
}

impl Default for MailConfig {
	fn default() -> Self {
		Self {
			smtp_host: String::new(),
			smtp_port: DEFAULT_SMTP_PORT,
			tls_mode: TlsMode::default(),
			timeout_secs: DEFAULT_TIMEOUT_SECS,
			accounts: BTreeMap::new(),
		}
	}
}

impl MailConfig {
	pub fn has_accounts(&self) -> bool {
		!self.accounts.is_empty()
	}
}
