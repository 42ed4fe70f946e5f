// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque job identifier, assigned once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for JobId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl From<&str> for JobId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Queued,
	Sending,
	Sleeping,
	WaitingWindow,
	Completed,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::Queued => "queued",
			JobStatus::Sending => "sending",
			JobStatus::Sleeping => "sleeping",
			JobStatus::WaitingWindow => "waiting_window",
			JobStatus::Completed => "completed",
		}
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
	pub subject: String,
	pub html_body: String,
}

/// Immutable parameters of a bulk send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
	pub template: MessageTemplate,
	/// Sending account; `None` selects the mailer's default account.
	#[serde(default)]
	pub from_address: Option<String>,
	pub batch_size: u32,
	pub interval_minutes: u32,
	/// Recipient source the addresses were loaded from; used to mark them contacted.
	pub source_id: String,
}

impl JobRequest {
	/// Batch size clamped to at least one recipient.
	pub fn effective_batch_size(&self) -> usize {
		self.batch_size.max(1) as usize
	}

	pub fn interval(&self) -> TimeDelta {
		TimeDelta::minutes(i64::from(self.interval_minutes))
	}
}

/// Full persisted snapshot of a job.
///
/// Invariants: `cursor <= recipients.len()` and `sent + failed == cursor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
	pub id: JobId,
	pub recipients: Vec<String>,
	pub request: JobRequest,
	#[serde(default)]
	pub cursor: usize,
	#[serde(default)]
	pub sent: usize,
	#[serde(default)]
	pub failed: usize,
	pub status: JobStatus,
	#[serde(default, with = "chrono::serde::ts_seconds_option")]
	pub next_run: Option<DateTime<Utc>>,
	#[serde(default)]
	pub cancelled: bool,
}

impl Job {
	pub fn new(id: JobId, recipients: Vec<String>, request: JobRequest, now: DateTime<Utc>) -> Self {
		Self {
			id,
			recipients,
			request,
			cursor: 0,
			sent: 0,
			failed: 0,
			status: JobStatus::Queued,
			next_run: Some(now),
			cancelled: false,
		}
	}

	pub fn total(&self) -> usize {
		self.recipients.len()
	}

	pub fn is_exhausted(&self) -> bool {
		self.cursor >= self.recipients.len()
	}

	/// Check the progress invariants of a snapshot read back from storage.
	pub fn validate(&self) -> std::result::Result<(), String> {
		if self.cursor > self.recipients.len() {
			return Err(format!(
				"cursor {} exceeds recipient count {}",
				self.cursor,
				self.recipients.len()
			));
		}
		if self.sent + self.failed != self.cursor {
			return Err(format!(
				"sent ({}) + failed ({}) does not match cursor {}",
				self.sent, self.failed, self.cursor
			));
		}
		Ok(())
	}

	pub fn summary(&self) -> JobSummary {
		JobSummary {
			id: self.id.clone(),
			total: self.total(),
			sent: self.sent,
			failed: self.failed,
			status: self.status,
			next_run: self.next_run,
			last_error: None,
		}
	}
}

/// Read-only projection of a job's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
	pub id: JobId,
	pub total: usize,
	pub sent: usize,
	pub failed: usize,
	pub status: JobStatus,
	#[serde(with = "chrono::serde::ts_seconds_option")]
	pub next_run: Option<DateTime<Utc>>,
	/// Set when the runner stopped because its progress could not be persisted.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn request() -> JobRequest {
		JobRequest {
			template: MessageTemplate {
				subject: "Hello".to_string(),
				html_body: "<p>Hi</p>".to_string(),
			},
			from_address: None,
			batch_size: 0,
			interval_minutes: 15,
			source_id: "list.csv".to_string(),
		}
	}

	#[test]
	fn batch_size_is_clamped_to_one() {
		assert_eq!(request().effective_batch_size(), 1);
	}

	#[test]
	fn new_job_starts_queued_at_cursor_zero() {
		let now = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
		let job = Job::new(JobId::from("job-1"), vec!["a@example.com".to_string()], request(), now);
		assert_eq!(job.status, JobStatus::Queued);
		assert_eq!(job.cursor, 0);
		assert_eq!(job.next_run, Some(now));
		assert!(!job.cancelled);
		assert!(job.validate().is_ok());
	}

	#[test]
	fn validate_rejects_broken_counters() {
		let now = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
		let mut job = Job::new(JobId::from("job-1"), vec!["a@example.com".to_string()], request(), now);
		job.cursor = 1;
		assert!(job.validate().is_err());
		job.sent = 1;
		assert!(job.validate().is_ok());
		job.cursor = 2;
		job.failed = 1;
		assert!(job.validate().is_err());
	}

	#[test]
	fn record_uses_epoch_seconds_and_snake_case_status() {
		let now = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
		let mut job = Job::new(JobId::from("job-1"), vec!["a@example.com".to_string()], request(), now);
		job.status = JobStatus::WaitingWindow;

		let value = serde_json::to_value(&job).unwrap();
		assert_eq!(value["status"], "waiting_window");
		assert_eq!(value["next_run"], now.timestamp());
		assert_eq!(value["request"]["source_id"], "list.csv");
	}

	#[test]
	fn missing_optional_fields_default_on_read() {
		let raw = r#"{
			"id": "job-9",
			"recipients": ["a@example.com"],
			"request": {
				"template": {"subject": "s", "html_body": "b"},
				"batch_size": 5,
				"interval_minutes": 0,
				"source_id": "list.csv"
			},
			"status": "queued"
		}"#;
		let job: Job = serde_json::from_str(raw).unwrap();
		assert_eq!(job.cursor, 0);
		assert_eq!(job.next_run, None);
		assert!(!job.cancelled);
		assert_eq!(job.request.from_address, None);
	}
}
