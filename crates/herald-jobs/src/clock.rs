// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};

/// Source of wall-clock time for scheduling decisions.
///
/// Delays are still awaited with `tokio::time`; the clock only answers "what
/// time is it", so persisted `next_run` values stay meaningful across restarts.
pub trait Clock: Send + Sync + 'static {
	fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}
