// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Multi-account SMTP mailer for Herald.
//!
//! One SMTP relay is shared by several sending accounts; each account logs in
//! with its own address and password. [`SmtpMailer`] implements
//! [`herald_jobs::Mailer`], so job runners send through it without knowing
//! about transports.
//!
//! # Features
//!
//! - Async sending using [`lettre`]
//! - STARTTLS, implicit TLS or plain connections
//! - HTML body with a plain-text alternative and the sender in Bcc
//! - Inline images for `<img src="uploads/...">` references
//! - Startup credential check per account

pub mod compose;

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use herald_config::{AccountConfig, MailConfig, TlsMode};
use herald_jobs::{Mailer, OutgoingMessage, SendFailure};
use lettre::{
	message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
	AsyncTransport, Tokio1Executor,
};
use tracing::{debug, info, warn};

pub use compose::{compose, PLAIN_FALLBACK};

/// Errors that can occur during SMTP operations.
#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
	/// Failed to connect to the SMTP server.
	#[error("connection failed: {0}")]
	Connection(String),

	/// The server rejected the account's login.
	#[error("authentication failed: {0}")]
	Auth(String),

	/// Failed to build or send a message.
	#[error("send failed: {0}")]
	Send(String),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("invalid email address: {0}")]
	Address(String),

	/// A from-address was requested that no account owns.
	#[error("selected from address not configured: {0}")]
	AccountNotConfigured(String),

	#[error("no mail account configured")]
	NoAccounts,
}

/// Public view of a sending account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
	pub key: String,
	pub address: String,
}

struct Account {
	info: AccountInfo,
	mailbox: Mailbox,
	transport: AsyncSmtpTransport<Tokio1Executor>,
}

/// Sends job messages through the configured accounts.
///
/// Transports are built eagerly; connections are made lazily per send.
pub struct SmtpMailer {
	accounts: Vec<Account>,
	uploads_dir: PathBuf,
}

impl SmtpMailer {
	/// Build one transport per configured account.
	///
	/// # Errors
	///
	/// Returns [`SmtpError::Address`] if an account address does not parse and
	/// [`SmtpError::Connection`] if a TLS transport cannot be set up for the host.
	#[tracing::instrument(
		name = "smtp_mailer_new",
		skip(config, uploads_dir),
		fields(host = %config.smtp_host, port = config.smtp_port, accounts = config.accounts.len())
	)]
	pub fn new(config: &MailConfig, uploads_dir: impl Into<PathBuf>) -> Result<Self, SmtpError> {
		let mut accounts = Vec::with_capacity(config.accounts.len());
		for (key, account) in &config.accounts {
			let mailbox: Mailbox = account
				.address
				.parse()
				.map_err(|e| SmtpError::Address(format!("{}: {e}", account.address)))?;
			let transport = build_transport(config, account)?;
			accounts.push(Account {
				info: AccountInfo {
					key: key.clone(),
					address: account.address.clone(),
				},
				mailbox,
				transport,
			});
		}

		debug!(tls_mode = ?config.tls_mode, "SMTP mailer initialized");

		Ok(Self {
			accounts,
			uploads_dir: uploads_dir.into(),
		})
	}

	/// Configured accounts, first key wins when several share an address.
	pub fn accounts(&self) -> Vec<AccountInfo> {
		self.unique_accounts().map(|account| account.info.clone()).collect()
	}

	fn unique_accounts(&self) -> impl Iterator<Item = &Account> {
		let mut seen = HashSet::new();
		self
			.accounts
			.iter()
			.filter(move |account| seen.insert(account.info.address.clone()))
	}

	/// Pick the account for `from`: the exact address match, or the first
	/// account when no address is given.
	fn resolve_account(&self, from: Option<&str>) -> Result<&Account, SmtpError> {
		match from.map(str::trim).filter(|address| !address.is_empty()) {
			Some(address) => self
				.accounts
				.iter()
				.find(|account| account.info.address == address)
				.ok_or_else(|| SmtpError::AccountNotConfigured(address.to_string())),
			None => self.accounts.first().ok_or(SmtpError::NoAccounts),
		}
	}

	/// Compose and send one message from the resolved account.
	#[tracing::instrument(
		name = "smtp_send",
		skip(self, message),
		fields(recipient = %message.recipient, account = tracing::field::Empty)
	)]
	pub async fn send_message(
		&self,
		from: Option<&str>,
		message: &OutgoingMessage,
	) -> Result<(), SmtpError> {
		let account = self.resolve_account(from)?;
		tracing::Span::current().record("account", account.info.address.as_str());

		let email = compose::compose(&account.mailbox, message, &self.uploads_dir).await?;

		account
			.transport
			.send(email)
			.await
			.map_err(|e| SmtpError::Send(format!("{e}")))?;

		debug!("message sent");
		Ok(())
	}

	/// Try to log in with every account.
	///
	/// Returns `address -> "ok"` or `address -> "login failed: ..."`. Without
	/// any accounts the single entry `_config -> "no accounts configured"` is
	/// returned. Never fails as a whole.
	#[tracing::instrument(name = "smtp_validate_accounts", skip(self))]
	pub async fn validate_accounts(&self) -> BTreeMap<String, String> {
		if self.accounts.is_empty() {
			return BTreeMap::from([(
				"_config".to_string(),
				"no accounts configured".to_string(),
			)]);
		}

		let mut results = BTreeMap::new();
		for account in self.unique_accounts() {
			let outcome = match check_login(account).await {
				Ok(()) => {
					info!(account = %account.info.address, "SMTP login ok");
					"ok".to_string()
				}
				Err(e) => {
					warn!(account = %account.info.address, error = %e, "SMTP login failed");
					format!("login failed: {e}")
				}
			};
			results.insert(account.info.address.clone(), outcome);
		}
		results
	}
}

fn build_transport(
	config: &MailConfig,
	account: &AccountConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, SmtpError> {
	let builder = match config.tls_mode {
		TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
			.map_err(|e| SmtpError::Connection(format!("{e}")))?,
		TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
			.map_err(|e| SmtpError::Connection(format!("{e}")))?,
		TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host),
	};

	let credentials = Credentials::new(account.address.clone(), account.password.expose().clone());

	Ok(builder
		.port(config.smtp_port)
		.credentials(credentials)
		.timeout(Some(Duration::from_secs(config.timeout_secs)))
		.build())
}

/// Connect and authenticate without sending anything.
async fn check_login(account: &Account) -> Result<(), SmtpError> {
	match account.transport.test_connection().await {
		Ok(true) => Ok(()),
		Ok(false) => Err(SmtpError::Connection(
			"server did not accept the connection".to_string(),
		)),
		Err(e) if e.is_permanent() => Err(SmtpError::Auth(format!("{e}"))),
		Err(e) => Err(SmtpError::Connection(format!("{e}"))),
	}
}

#[async_trait]
impl Mailer for SmtpMailer {
	async fn send(&self, account: Option<&str>, message: &OutgoingMessage) -> Result<(), SendFailure> {
		self
			.send_message(account, message)
			.await
			.map_err(|e| SendFailure::new(e.to_string()))
	}
}
