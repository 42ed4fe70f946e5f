// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared test doubles for the scheduler.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::mailer::{Mailer, OutgoingMessage, SendFailure};
use crate::manager::JobManager;
use crate::recipients::MemoryRecipientStore;
use crate::runner::RunnerDeps;
use crate::store::{JobStore, MemoryJobStore};
use crate::types::{Job, JobId, JobRequest, MessageTemplate};
use crate::window::WorkWindow;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wall clock driven by the (paused) tokio clock, truncated to whole seconds.
#[derive(Debug)]
pub(crate) struct TestClock {
	origin: DateTime<Utc>,
	start: tokio::time::Instant,
}

impl TestClock {
	pub(crate) fn starting_at(origin: DateTime<Utc>) -> Arc<Self> {
		Arc::new(Self {
			origin,
			start: tokio::time::Instant::now(),
		})
	}
}

impl Clock for TestClock {
	fn now(&self) -> DateTime<Utc> {
		let elapsed = self.start.elapsed().as_secs();
		self.origin + TimeDelta::seconds(elapsed as i64)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Delivery {
	pub recipient: String,
	pub account: Option<String>,
	pub at: DateTime<Utc>,
}

/// Records every send attempt; fails for configured addresses.
pub(crate) struct RecordingMailer {
	clock: Arc<dyn Clock>,
	deliveries: Mutex<Vec<Delivery>>,
	failing: Mutex<HashSet<String>>,
}

impl RecordingMailer {
	pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
		Self {
			clock,
			deliveries: Mutex::new(Vec::new()),
			failing: Mutex::new(HashSet::new()),
		}
	}

	pub(crate) fn fail_for(&self, address: &str) {
		lock(&self.failing).insert(address.to_string());
	}

	pub(crate) fn deliveries(&self) -> Vec<Delivery> {
		lock(&self.deliveries).clone()
	}

	pub(crate) fn recipients(&self) -> Vec<String> {
		self.deliveries().into_iter().map(|d| d.recipient).collect()
	}
}

#[async_trait]
impl Mailer for RecordingMailer {
	async fn send(&self, account: Option<&str>, message: &OutgoingMessage) -> Result<(), SendFailure> {
		lock(&self.deliveries).push(Delivery {
			recipient: message.recipient.clone(),
			account: account.map(str::to_string),
			at: self.clock.now(),
		});
		if lock(&self.failing).contains(&message.recipient) {
			return Err(SendFailure::new("mailbox unavailable"));
		}
		Ok(())
	}
}

/// Records a delivery, then holds the send open until released.
pub(crate) struct GatedMailer {
	inner: RecordingMailer,
	entered: Notify,
	release: Semaphore,
}

impl GatedMailer {
	pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
		Self {
			inner: RecordingMailer::new(clock),
			entered: Notify::new(),
			release: Semaphore::new(0),
		}
	}

	/// Resolves once a send is in flight.
	pub(crate) async fn wait_entered(&self) {
		self.entered.notified().await;
	}

	pub(crate) fn release(&self, sends: usize) {
		self.release.add_permits(sends);
	}

	pub(crate) fn recipients(&self) -> Vec<String> {
		self.inner.recipients()
	}
}

#[async_trait]
impl Mailer for GatedMailer {
	async fn send(&self, account: Option<&str>, message: &OutgoingMessage) -> Result<(), SendFailure> {
		self.inner.send(account, message).await?;
		self.entered.notify_one();
		if let Ok(permit) = self.release.acquire().await {
			permit.forget();
		}
		Ok(())
	}
}

/// Memory store that keeps a copy of every snapshot written.
#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
	inner: MemoryJobStore,
	snapshots: Mutex<Vec<Job>>,
}

impl RecordingStore {
	pub(crate) fn inner(&self) -> &MemoryJobStore {
		&self.inner
	}

	pub(crate) fn snapshots(&self) -> Vec<Job> {
		lock(&self.snapshots).clone()
	}
}

#[async_trait]
impl JobStore for RecordingStore {
	async fn put(&self, job: &Job) -> Result<(), StoreError> {
		self.inner.put(job).await?;
		lock(&self.snapshots).push(job.clone());
		Ok(())
	}

	async fn get_all(&self) -> Result<Vec<Job>, StoreError> {
		self.inner.get_all().await
	}

	async fn delete(&self, id: &JobId) -> Result<(), StoreError> {
		self.inner.delete(id).await
	}
}

pub(crate) struct Harness {
	pub clock: Arc<TestClock>,
	pub store: Arc<RecordingStore>,
	pub mailer: Arc<RecordingMailer>,
	pub recipients: Arc<MemoryRecipientStore>,
	pub window: WorkWindow,
}

impl Harness {
	/// Office hours in Berlin, Monday to Friday 09:00-17:00.
	pub(crate) fn new(origin: DateTime<Utc>) -> Self {
		let clock = TestClock::starting_at(origin);
		let mailer = Arc::new(RecordingMailer::new(clock.clone()));
		Self {
			clock,
			store: Arc::new(RecordingStore::default()),
			mailer,
			recipients: Arc::new(MemoryRecipientStore::new()),
			window: office_window(),
		}
	}

	pub(crate) fn deps(&self) -> RunnerDeps {
		RunnerDeps {
			store: self.store.clone(),
			mailer: self.mailer.clone(),
			recipients: self.recipients.clone(),
			clock: self.clock.clone(),
			window: Arc::new(self.window.clone()),
		}
	}

	pub(crate) fn manager(&self) -> JobManager {
		JobManager::new(
			self.store.clone(),
			self.mailer.clone(),
			self.recipients.clone(),
			self.window.clone(),
		)
		.with_clock(self.clock.clone())
	}
}

pub(crate) fn office_window() -> WorkWindow {
	WorkWindow::new([0, 1, 2, 3, 4], 9, 17, chrono_tz::Europe::Berlin)
		.unwrap_or_else(|_| WorkWindow::always_open())
}

pub(crate) fn berlin(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
	chrono_tz::Europe::Berlin
		.with_ymd_and_hms(y, m, d, h, min, 0)
		.single()
		.map(|t| t.with_timezone(&Utc))
		.unwrap_or_default()
}

pub(crate) fn addresses(n: usize) -> Vec<String> {
	(0..n).map(|i| format!("r{i}@example.com")).collect()
}

pub(crate) fn request(batch_size: u32, interval_minutes: u32) -> JobRequest {
	JobRequest {
		template: MessageTemplate {
			subject: "Quarterly update".to_string(),
			html_body: "<p>Hello</p>".to_string(),
		},
		from_address: None,
		batch_size,
		interval_minutes,
		source_id: "list.csv".to_string(),
	}
}
