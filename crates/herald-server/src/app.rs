// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wiring of configuration into the job manager and its collaborators.

use std::collections::BTreeMap;
use std::error::Error;
use std::io;
use std::path::Path;
use std::sync::Arc;

use herald_config::{HeraldConfig, SchedulerConfig};
use herald_jobs::{
	FileJobStore, JobId, JobManager, JobRequest, JobStore, JobSummary, JobsDirLock, MessageTemplate,
	WindowError, WorkWindow,
};
use herald_recipients::CsvRecipientStore;
use herald_smtp::SmtpMailer;
use tracing::{info, warn};

use crate::control::{self, ControlRequest, ControlResponse};

/// Parameters of one bulk send as given on the command line.
#[derive(Debug, Clone)]
pub struct SendOptions {
	pub source_id: String,
	pub subject: String,
	pub html_body: String,
	pub from_address: Option<String>,
	pub batch_size: u32,
	pub interval_minutes: u32,
}

impl SendOptions {
	pub fn into_request(self) -> JobRequest {
		JobRequest {
			template: MessageTemplate {
				subject: self.subject,
				html_body: self.html_body,
			},
			from_address: self.from_address.filter(|address| !address.trim().is_empty()),
			batch_size: self.batch_size,
			interval_minutes: self.interval_minutes,
			source_id: self.source_id,
		}
	}
}

pub fn work_window(config: &SchedulerConfig) -> Result<WorkWindow, WindowError> {
	WorkWindow::new(
		config.workdays.iter().copied(),
		config.start_hour,
		config.end_hour,
		config.timezone,
	)
}

/// Log the outcome of a login attempt per account. Never fails.
pub async fn check_credentials(mailer: &SmtpMailer) -> BTreeMap<String, String> {
	let results = mailer.validate_accounts().await;
	for (address, outcome) in &results {
		if outcome == "ok" {
			info!(account = %address, "Mail credentials ok");
		} else {
			warn!(account = %address, result = %outcome, "Mail credentials check failed");
		}
	}
	results
}

/// A running Herald instance. Owns the jobs directory for its lifetime.
pub struct App {
	pub config: HeraldConfig,
	pub mailer: Arc<SmtpMailer>,
	pub manager: JobManager,
	_lock: JobsDirLock,
}

impl App {
	/// Fails with [`herald_jobs::StoreError::Locked`] while another process
	/// owns the jobs directory.
	pub fn build(config: HeraldConfig) -> Result<Self, Box<dyn Error>> {
		let window = work_window(&config.scheduler)?;
		let store = FileJobStore::new(&config.paths.jobs_dir);
		let lock = store.lock()?;
		let mailer = Arc::new(SmtpMailer::new(&config.mail, &config.paths.uploads_dir)?);
		let recipients = Arc::new(CsvRecipientStore::new(&config.paths.sources_dir));
		let manager = JobManager::new(Arc::new(store), mailer.clone(), recipients, window);

		Ok(Self {
			config,
			mailer,
			manager,
			_lock: lock,
		})
	}

	pub async fn check_credentials(&self) -> BTreeMap<String, String> {
		check_credentials(&self.mailer).await
	}

	/// Answer `herald send` and `herald cancel` from other processes.
	pub async fn serve_control(&self) -> io::Result<()> {
		control::serve(&self.config.paths.jobs_dir, &self.manager).await
	}

	pub async fn submit(&self, options: SendOptions) -> Result<JobId, Box<dyn Error>> {
		let id = self
			.manager
			.create_job_from_source(options.into_request())
			.await?;
		Ok(id)
	}

	/// Resolve once every known job has completed or its runner has stopped.
	pub async fn wait_for_all(&self) -> Vec<JobSummary> {
		let mut finished = Vec::new();
		for summary in self.manager.list_jobs().await {
			if let Some(summary) = self.manager.wait_for(&summary.id).await {
				finished.push(summary);
			}
		}
		finished
	}
}

/// Hand a job to the process that owns `jobs_dir`, if one is running.
pub async fn submit_to_running(
	jobs_dir: &Path,
	request: JobRequest,
) -> Result<Option<JobId>, Box<dyn Error>> {
	match control::request(jobs_dir, &ControlRequest::Submit { request }).await? {
		None => Ok(None),
		Some(ControlResponse::Submitted { id }) => Ok(Some(id)),
		Some(ControlResponse::Error { message }) => Err(message.into()),
		Some(other) => Err(format!("unexpected control response: {other:?}").into()),
	}
}

/// Cancel a job through its owning process.
///
/// Without a running owner the record is deleted directly, which requires
/// taking the jobs directory lock.
pub async fn cancel(jobs_dir: &Path, id: JobId) -> Result<ControlResponse, Box<dyn Error>> {
	let request = ControlRequest::Cancel { id: id.clone() };
	if let Some(response) = control::request(jobs_dir, &request).await? {
		return Ok(response);
	}

	let store = FileJobStore::new(jobs_dir);
	let _lock = store.lock()?;
	let known = store.get_all().await?.iter().any(|job| job.id == id);
	if !known {
		return Ok(ControlResponse::NotFound { id });
	}
	store.delete(&id).await?;
	info!(job_id = %id, "Job record deleted");
	Ok(ControlResponse::Cancelled { id })
}

/// Read persisted job summaries without starting any runner.
pub async fn persisted_summaries(jobs_dir: &Path) -> Result<Vec<JobSummary>, Box<dyn Error>> {
	let store = FileJobStore::new(jobs_dir);
	let jobs = store.get_all().await?;
	Ok(jobs.iter().map(|job| job.summary()).collect())
}
