// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::clock::{Clock, SystemClock};
use crate::error::{JobError, Result};
use crate::mailer::Mailer;
use crate::recipients::RecipientStore;
use crate::runner::{JobRunner, RunnerDeps};
use crate::store::JobStore;
use crate::types::{Job, JobId, JobRequest, JobStatus, JobSummary};
use crate::window::WorkWindow;

struct JobEntry {
	cancel: CancellationToken,
	write_gate: Arc<Mutex<()>>,
	progress: watch::Receiver<JobSummary>,
	task: Option<JoinHandle<()>>,
}

/// Registry of jobs known to this process.
///
/// The manager never mutates a job itself: it holds each runner's cancel
/// token and a read-only view of its published progress.
pub struct JobManager {
	deps: RunnerDeps,
	jobs: RwLock<HashMap<JobId, JobEntry>>,
	shutdown: CancellationToken,
}

impl JobManager {
	pub fn new(
		store: Arc<dyn JobStore>,
		mailer: Arc<dyn Mailer>,
		recipients: Arc<dyn RecipientStore>,
		window: WorkWindow,
	) -> Self {
		Self {
			deps: RunnerDeps {
				store,
				mailer,
				recipients,
				clock: Arc::new(SystemClock),
				window: Arc::new(window),
			},
			jobs: RwLock::new(HashMap::new()),
			shutdown: CancellationToken::new(),
		}
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.deps.clock = clock;
		self
	}

	/// Persist a new job over `recipients` and start its runner.
	///
	/// Returns as soon as the initial snapshot is stored; no sending happens
	/// on the caller's task.
	#[instrument(skip(self, recipients, request), fields(source_id = %request.source_id, total = recipients.len()))]
	pub async fn create_job(&self, recipients: Vec<String>, request: JobRequest) -> Result<JobId> {
		if recipients.is_empty() {
			return Err(JobError::InvalidRequest(
				"recipient list is empty".to_string(),
			));
		}
		if self.shutdown.is_cancelled() {
			return Err(JobError::InvalidRequest(
				"scheduler is shutting down".to_string(),
			));
		}

		let id = JobId::generate();
		let job = Job::new(id.clone(), recipients, request, self.deps.clock.now());
		self.deps.store.put(&job).await?;
		self.spawn(job).await;

		info!(job_id = %id, "Job created");
		Ok(id)
	}

	/// Load the pending recipients of `request.source_id` and create a job over them.
	#[instrument(skip(self, request), fields(source_id = %request.source_id))]
	pub async fn create_job_from_source(&self, request: JobRequest) -> Result<JobId> {
		let recipients = self
			.deps
			.recipients
			.load_pending(&request.source_id)
			.await?;
		if recipients.is_empty() {
			return Err(JobError::InvalidRequest(format!(
				"no recipients found in source {}",
				request.source_id
			)));
		}
		self.create_job(recipients, request).await
	}

	pub async fn list_jobs(&self) -> Vec<JobSummary> {
		let jobs = self.jobs.read().await;
		let mut summaries: Vec<JobSummary> = jobs
			.values()
			.map(|entry| entry.progress.borrow().clone())
			.collect();
		summaries.sort_by(|a, b| a.id.cmp(&b.id));
		summaries
	}

	pub async fn get_job(&self, id: &JobId) -> Option<JobSummary> {
		let jobs = self.jobs.read().await;
		jobs.get(id).map(|entry| entry.progress.borrow().clone())
	}

	/// Cancel a job and delete its record. Returns whether the job existed.
	#[instrument(skip(self), fields(job_id = %id))]
	pub async fn cancel_job(&self, id: &JobId) -> Result<bool> {
		let Some(entry) = self.jobs.write().await.remove(id) else {
			return Ok(false);
		};

		{
			let _gate = entry.write_gate.lock().await;
			entry.cancel.cancel();
			self.deps.store.delete(id).await?;
		}

		info!("Job cancelled");
		Ok(true)
	}

	/// Rebuild jobs from the store and resume every unfinished one.
	///
	/// Completed records are registered for listing but not run. Returns the
	/// number of runners started.
	#[instrument(skip(self))]
	pub async fn recover(&self) -> Result<usize> {
		let snapshots = self.deps.store.get_all().await?;
		let mut resumed = 0;

		for job in snapshots {
			if self.jobs.read().await.contains_key(&job.id) {
				continue;
			}

			if job.cancelled {
				self.deps.store.delete(&job.id).await?;
				debug!(job_id = %job.id, "Dropped cancelled job record");
				continue;
			}

			if job.status == JobStatus::Completed {
				let (_, progress) = watch::channel(job.summary());
				self.jobs.write().await.insert(
					job.id.clone(),
					JobEntry {
						cancel: CancellationToken::new(),
						write_gate: Arc::new(Mutex::new(())),
						progress,
						task: None,
					},
				);
				continue;
			}

			info!(
				job_id = %job.id,
				cursor = job.cursor,
				total = job.total(),
				status = %job.status,
				"Resuming job"
			);
			self.spawn(job).await;
			resumed += 1;
		}

		info!(resumed, "Job recovery complete");
		Ok(resumed)
	}

	/// Wait until the job completes or its runner stops, then return its summary.
	pub async fn wait_for(&self, id: &JobId) -> Option<JobSummary> {
		let mut progress = self.jobs.read().await.get(id)?.progress.clone();
		let finished = progress
			.wait_for(|summary| summary.status == JobStatus::Completed)
			.await
			.map(|summary| summary.clone());
		Some(finished.unwrap_or_else(|_| progress.borrow().clone()))
	}

	/// Stop every runner at its next check point without deleting records.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.shutdown.cancel();

		let tasks: Vec<JoinHandle<()>> = {
			let mut jobs = self.jobs.write().await;
			jobs.values_mut().filter_map(|entry| entry.task.take()).collect()
		};
		for task in tasks {
			let _ = task.await;
		}

		info!("Job manager shut down");
	}

	async fn spawn(&self, job: Job) {
		let id = job.id.clone();
		let runner = JobRunner::new(job, self.deps.clone(), self.shutdown.clone());
		let cancel = runner.cancel_token();
		let write_gate = runner.write_gate();
		let progress = runner.subscribe();

		let task_id = id.clone();
		let task = tokio::spawn(async move {
			if let Ok(outcome) = runner.run().await {
				debug!(job_id = %task_id, ?outcome, "Job runner finished");
			}
		});

		self.jobs.write().await.insert(
			id,
			JobEntry {
				cancel,
				write_gate,
				progress,
				task: Some(task),
			},
		);
	}
}
