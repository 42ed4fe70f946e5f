// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for Herald.

pub mod logging;
pub mod mail;
pub mod paths;
pub mod scheduler;

pub use logging::{LoggingConfig, LoggingConfigLayer};
pub use mail::{
	hoist_legacy_accounts, AccountConfig, AccountConfigLayer, MailConfig, MailConfigLayer, TlsMode,
};
pub use paths::{PathsConfig, PathsConfigLayer};
pub use scheduler::{SchedulerConfig, SchedulerConfigLayer};
