// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

/// One message addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
	pub recipient: String,
	pub subject: String,
	pub html_body: String,
}

/// Why a single send did not go through. Never fatal to a job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct SendFailure {
	pub reason: String,
}

impl SendFailure {
	pub fn new(reason: impl Into<String>) -> Self {
		Self {
			reason: reason.into(),
		}
	}
}

/// Builds and transmits one message through a sending account.
#[async_trait]
pub trait Mailer: Send + Sync {
	/// `account` selects the sending address; `None` means the default account.
	async fn send(&self, account: Option<&str>, message: &OutgoingMessage) -> Result<(), SendFailure>;
}
