// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("Invalid request: {0}")]
	InvalidRequest(String),

	#[error("Persistence failure: {0}")]
	Persistence(#[from] StoreError),

	#[error("Recipient source error: {0}")]
	Source(RecipientError),

	#[error("Job not found: {0}")]
	NotFound(String),
}

impl From<RecipientError> for JobError {
	fn from(e: RecipientError) -> Self {
		match e {
			RecipientError::SourceNotFound(_)
			| RecipientError::InvalidSourceId(_)
			| RecipientError::MissingEmailColumn(_) => JobError::InvalidRequest(e.to_string()),
			other => JobError::Source(other),
		}
	}
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Errors raised by a [`crate::JobStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("I/O error at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to serialize job record: {0}")]
	Serialize(#[from] serde_json::Error),

	#[error("Corrupt job record at {path}: {message}")]
	Corrupt { path: PathBuf, message: String },

	/// Another process already owns the jobs directory.
	#[error("Jobs directory {path} is locked by another herald process")]
	Locked { path: PathBuf },
}

/// Errors raised by a [`crate::RecipientStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum RecipientError {
	#[error("recipient source not found: {0}")]
	SourceNotFound(String),

	#[error("invalid recipient source id: {0}")]
	InvalidSourceId(String),

	#[error("recipient source {0} has no 'email' column")]
	MissingEmailColumn(String),

	#[error("I/O error on recipient source {source_id}: {source}")]
	Io {
		source_id: String,
		#[source]
		source: std::io::Error,
	},

	#[error("malformed recipient source {source_id}: {message}")]
	Malformed { source_id: String, message: String },
}

/// Rejected work window configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
	#[error("at least one work day is required")]
	NoWorkdays,

	#[error("work day {0} is out of range (0 = Monday .. 6 = Sunday)")]
	InvalidWeekday(u8),

	#[error("work hours {start}..{end} are invalid (need start < end <= 24)")]
	InvalidHours { start: u32, end: u32 },
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_source_becomes_invalid_request() {
		let err: JobError = RecipientError::SourceNotFound("list.csv".to_string()).into();
		assert!(matches!(err, JobError::InvalidRequest(_)));
		assert!(err.to_string().contains("list.csv"));
	}

	#[test]
	fn io_failure_stays_a_source_error() {
		let err: JobError = RecipientError::Io {
			source_id: "list.csv".to_string(),
			source: std::io::Error::other("disk gone"),
		}
		.into();
		assert!(matches!(err, JobError::Source(_)));
	}
}
