// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-job state machine.
//!
//! Every pass through the loop re-evaluates cancellation, completion, the
//! pending delay and the work window before touching the mailer. Suspensions
//! always fall back into that full re-check, which is what makes cancellation
//! during a sleep and resumption after a restart behave.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::mailer::{Mailer, OutgoingMessage};
use crate::recipients::RecipientStore;
use crate::store::JobStore;
use crate::types::{Job, JobStatus, JobSummary};
use crate::window::WorkWindow;

/// Collaborators shared by every runner of a manager.
#[derive(Clone)]
pub struct RunnerDeps {
	pub store: Arc<dyn JobStore>,
	pub mailer: Arc<dyn Mailer>,
	pub recipients: Arc<dyn RecipientStore>,
	pub clock: Arc<dyn Clock>,
	pub window: Arc<WorkWindow>,
}

/// How a runner stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
	/// Every recipient was attempted; the record is kept with status `completed`.
	Completed,
	/// The job was cancelled; its record has been removed.
	Cancelled,
	/// The scheduler is stopping; the record is left for the next recovery.
	Shutdown,
}

/// Exclusive owner of one [`Job`] from creation (or recovery) to completion.
pub struct JobRunner {
	job: Job,
	deps: RunnerDeps,
	cancel: CancellationToken,
	shutdown: CancellationToken,
	write_gate: Arc<Mutex<()>>,
	progress: watch::Sender<JobSummary>,
}

impl JobRunner {
	pub fn new(job: Job, deps: RunnerDeps, shutdown: CancellationToken) -> Self {
		let cancel = CancellationToken::new();
		if job.cancelled {
			cancel.cancel();
		}
		let (progress, _) = watch::channel(job.summary());

		Self {
			job,
			deps,
			cancel,
			shutdown,
			write_gate: Arc::new(Mutex::new(())),
			progress,
		}
	}

	/// Token that cancels this job. Cancelling it is permanent.
	pub fn cancel_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Lock held around every store write. Holding it while cancelling
	/// guarantees no snapshot is written after the record is deleted.
	pub fn write_gate(&self) -> Arc<Mutex<()>> {
		Arc::clone(&self.write_gate)
	}

	/// Summaries published after every persisted change.
	pub fn subscribe(&self) -> watch::Receiver<JobSummary> {
		self.progress.subscribe()
	}

	#[instrument(skip(self), fields(job_id = %self.job.id))]
	pub async fn run(mut self) -> Result<RunOutcome> {
		match self.drive().await {
			Ok(outcome) => Ok(outcome),
			Err(e) => {
				error!(
					cursor = self.job.cursor,
					sent = self.job.sent,
					failed = self.job.failed,
					error = %e,
					"Job runner stopped: progress could not be persisted"
				);
				self.publish(Some(e.to_string()));
				Err(e)
			}
		}
	}

	async fn drive(&mut self) -> Result<RunOutcome> {
		loop {
			if self.cancel.is_cancelled() {
				self.job.cancelled = true;
				self.deps.store.delete(&self.job.id).await?;
				info!(cursor = self.job.cursor, "Job cancelled");
				return Ok(RunOutcome::Cancelled);
			}

			if self.shutdown.is_cancelled() {
				info!(cursor = self.job.cursor, status = %self.job.status, "Job paused for shutdown");
				return Ok(RunOutcome::Shutdown);
			}

			if self.job.is_exhausted() {
				self.job.status = JobStatus::Completed;
				self.job.next_run = None;
				self.persist().await?;
				info!(
					sent = self.job.sent,
					failed = self.job.failed,
					"Job completed"
				);
				return Ok(RunOutcome::Completed);
			}

			let now = self.deps.clock.now();

			if let Some(next_run) = self.job.next_run.filter(|at| *at > now) {
				// A recovered window wait stays a window wait.
				if self.job.status != JobStatus::WaitingWindow {
					self.job.status = JobStatus::Sleeping;
				}
				self.persist().await?;
				debug!(next_run = %next_run, "Sleeping until next run");
				self.suspend_until(next_run).await;
				continue;
			}

			if !self.deps.window.is_open(now) {
				let resume_at = self.deps.window.next_open(now);
				self.job.status = JobStatus::WaitingWindow;
				self.job.next_run = Some(resume_at);
				self.persist().await?;
				info!(resume_at = %resume_at, "Outside work window, waiting");
				self.suspend_until(resume_at).await;
				continue;
			}

			if !self.send_batch().await? {
				continue;
			}

			if self.job.is_exhausted() {
				continue;
			}

			let next_run = self.deps.clock.now() + self.job.request.interval();
			self.job.status = JobStatus::Sleeping;
			self.job.next_run = Some(next_run);
			self.persist().await?;
			info!(
				cursor = self.job.cursor,
				remaining = self.job.total() - self.job.cursor,
				next_run = %next_run,
				"Batch sent"
			);
			self.suspend_until(next_run).await;
		}
	}

	/// Send `[cursor, cursor + batch)` one recipient at a time.
	///
	/// Returns `false` when the batch was interrupted by cancellation or shutdown.
	async fn send_batch(&mut self) -> Result<bool> {
		let start = self.job.cursor;
		let end = (start + self.job.request.effective_batch_size()).min(self.job.total());

		self.job.status = JobStatus::Sending;
		self.persist().await?;
		info!(from = start, to = end, total = self.job.total(), "Sending batch");

		while self.job.cursor < end {
			if self.cancel.is_cancelled() || self.shutdown.is_cancelled() {
				return Ok(false);
			}

			let recipient = self.job.recipients[self.job.cursor].clone();
			if self.deliver(&recipient).await {
				self.job.sent += 1;
			} else {
				self.job.failed += 1;
			}
			self.job.cursor += 1;
			self.persist().await?;
		}

		Ok(true)
	}

	/// Attempt one recipient. Never fails the job.
	async fn deliver(&self, recipient: &str) -> bool {
		let request = &self.job.request;
		let message = OutgoingMessage {
			recipient: recipient.to_string(),
			subject: request.template.subject.clone(),
			html_body: request.template.html_body.clone(),
		};

		match self
			.deps
			.mailer
			.send(request.from_address.as_deref(), &message)
			.await
		{
			Ok(()) => {
				debug!(recipient, "Message sent");
				if let Err(e) = self
					.deps
					.recipients
					.mark_contacted(&request.source_id, recipient)
					.await
				{
					warn!(
						recipient,
						source_id = %request.source_id,
						error = %e,
						"Failed to mark recipient as contacted"
					);
				}
				true
			}
			Err(failure) => {
				warn!(recipient, reason = %failure, "Send failed");
				false
			}
		}
	}

	async fn persist(&mut self) -> Result<()> {
		{
			let _gate = self.write_gate.lock().await;
			if !self.cancel.is_cancelled() {
				self.deps.store.put(&self.job).await?;
			}
		}
		self.publish(None);
		Ok(())
	}

	fn publish(&self, last_error: Option<String>) {
		let mut summary = self.job.summary();
		summary.last_error = last_error;
		self.progress.send_replace(summary);
	}

	async fn suspend_until(&self, at: DateTime<Utc>) {
		let delay = (at - self.deps.clock.now()).to_std().unwrap_or_default();
		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = self.cancel.cancelled() => {}
			_ = self.shutdown.cancelled() => {}
		}
	}
}
