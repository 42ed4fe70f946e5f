// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable job snapshot storage.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use fs2::FileExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::types::{Job, JobId};

/// Key-value persistence of job snapshots, one record per job id.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
	/// Overwrite the record for `job.id`. Readers never observe a partial write.
	async fn put(&self, job: &Job) -> Result<(), StoreError>;

	/// Every readable record. Corrupt records are skipped.
	async fn get_all(&self) -> Result<Vec<Job>, StoreError>;

	/// Remove the record. Missing ids are not an error.
	async fn delete(&self, id: &JobId) -> Result<(), StoreError>;
}

const LOCK_FILE: &str = ".herald.lock";

/// Exclusive ownership of a jobs directory. Released when dropped.
#[derive(Debug)]
pub struct JobsDirLock {
	_file: std::fs::File,
	path: PathBuf,
}

impl JobsDirLock {
	pub fn path(&self) -> &Path {
		&self.path
	}
}

/// One `<id>.json` file per job inside a directory.
#[derive(Debug, Clone)]
pub struct FileJobStore {
	dir: PathBuf,
}

impl FileJobStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Claim the directory for this process.
	///
	/// Only the lock holder may run jobs from the directory; a second process
	/// gets [`StoreError::Locked`] instead of driving the same records.
	pub fn lock(&self) -> Result<JobsDirLock, StoreError> {
		std::fs::create_dir_all(&self.dir).map_err(Self::io_error(&self.dir))?;

		let path = self.dir.join(LOCK_FILE);
		let file = OpenOptions::new()
			.create(true)
			.read(true)
			.write(true)
			.truncate(false)
			.open(&path)
			.map_err(Self::io_error(&path))?;
		if file.try_lock_exclusive().is_err() {
			return Err(StoreError::Locked {
				path: self.dir.clone(),
			});
		}

		debug!(path = %path.display(), "Jobs directory locked");
		Ok(JobsDirLock { _file: file, path })
	}

	fn record_path(&self, id: &JobId) -> PathBuf {
		self.dir.join(format!("{id}.json"))
	}

	fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
		move |source| StoreError::Io {
			path: path.to_path_buf(),
			source,
		}
	}

	/// Make a completed rename durable.
	#[cfg(unix)]
	async fn sync_dir(&self) -> Result<(), StoreError> {
		let dir = fs::File::open(&self.dir)
			.await
			.map_err(Self::io_error(&self.dir))?;
		dir.sync_all().await.map_err(Self::io_error(&self.dir))
	}

	#[cfg(not(unix))]
	async fn sync_dir(&self) -> Result<(), StoreError> {
		Ok(())
	}

	async fn read_record(path: &Path) -> Result<Job, StoreError> {
		let bytes = fs::read(path).await.map_err(Self::io_error(path))?;
		let job: Job = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
			path: path.to_path_buf(),
			message: e.to_string(),
		})?;
		job.validate().map_err(|message| StoreError::Corrupt {
			path: path.to_path_buf(),
			message,
		})?;
		Ok(job)
	}
}

#[async_trait]
impl JobStore for FileJobStore {
	async fn put(&self, job: &Job) -> Result<(), StoreError> {
		fs::create_dir_all(&self.dir)
			.await
			.map_err(Self::io_error(&self.dir))?;

		let contents = serde_json::to_vec(job)?;
		let path = self.record_path(&job.id);
		let temp_path = self.dir.join(format!(".{}.json.tmp", job.id));

		let mut file = fs::File::create(&temp_path)
			.await
			.map_err(Self::io_error(&temp_path))?;
		file
			.write_all(&contents)
			.await
			.map_err(Self::io_error(&temp_path))?;
		file.sync_all().await.map_err(Self::io_error(&temp_path))?;
		drop(file);

		fs::rename(&temp_path, &path)
			.await
			.map_err(Self::io_error(&path))?;
		self.sync_dir().await?;

		debug!(job_id = %job.id, cursor = job.cursor, status = %job.status, "Job record written");
		Ok(())
	}

	async fn get_all(&self) -> Result<Vec<Job>, StoreError> {
		let mut entries = match fs::read_dir(&self.dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(Self::io_error(&self.dir)(e)),
		};

		let mut jobs = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(Self::io_error(&self.dir))?
		{
			let path = entry.path();
			let is_record = path.extension().is_some_and(|ext| ext == "json")
				&& !entry.file_name().to_string_lossy().starts_with('.');
			if !is_record {
				continue;
			}

			match Self::read_record(&path).await {
				Ok(job) => jobs.push(job),
				Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable job record"),
			}
		}

		jobs.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(jobs)
	}

	async fn delete(&self, id: &JobId) -> Result<(), StoreError> {
		let path = self.record_path(id);
		match fs::remove_file(&path).await {
			Ok(()) => {
				debug!(job_id = %id, "Job record deleted");
				Ok(())
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(Self::io_error(&path)(e)),
		}
	}
}

/// In-memory job store for testing.
///
/// Records are kept serialized so reads go through the same decode path as
/// [`FileJobStore`], and raw (possibly corrupt) records can be planted.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
	records: RwLock<BTreeMap<String, String>>,
	fail_writes: AtomicBool,
}

impl MemoryJobStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Plant a raw record as if it had been written by an earlier process.
	pub async fn insert_raw(&self, id: &str, raw: impl Into<String>) {
		self.records.write().await.insert(id.to_string(), raw.into());
	}

	/// Make every subsequent `put` fail.
	pub fn fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::SeqCst);
	}

	pub async fn get(&self, id: &JobId) -> Option<Job> {
		let records = self.records.read().await;
		records
			.get(id.as_str())
			.and_then(|raw| serde_json::from_str(raw).ok())
	}

	pub async fn len(&self) -> usize {
		self.records.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.records.read().await.is_empty()
	}
}

#[async_trait]
impl JobStore for MemoryJobStore {
	async fn put(&self, job: &Job) -> Result<(), StoreError> {
		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(StoreError::Io {
				path: PathBuf::from(format!("memory://{}", job.id)),
				source: std::io::Error::other("writes disabled"),
			});
		}
		let raw = serde_json::to_string(job)?;
		self.records.write().await.insert(job.id.to_string(), raw);
		Ok(())
	}

	async fn get_all(&self) -> Result<Vec<Job>, StoreError> {
		let records = self.records.read().await;
		let mut jobs = Vec::new();
		for (id, raw) in records.iter() {
			let parsed = serde_json::from_str::<Job>(raw)
				.map_err(|e| e.to_string())
				.and_then(|job| job.validate().map(|()| job));
			match parsed {
				Ok(job) => jobs.push(job),
				Err(e) => warn!(record = %id, error = %e, "Skipping unreadable job record"),
			}
		}
		Ok(jobs)
	}

	async fn delete(&self, id: &JobId) -> Result<(), StoreError> {
		self.records.write().await.remove(id.as_str());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{JobRequest, JobStatus, MessageTemplate};
	use chrono::{TimeZone, Utc};
	use tempfile::TempDir;

	fn job(id: &str) -> Job {
		let request = JobRequest {
			template: MessageTemplate {
				subject: "Subject".to_string(),
				html_body: "<p>Body</p>".to_string(),
			},
			from_address: Some("sales@example.com".to_string()),
			batch_size: 2,
			interval_minutes: 5,
			source_id: "list.csv".to_string(),
		};
		let now = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
		Job::new(
			JobId::from(id),
			vec!["a@example.com".to_string(), "b@example.com".to_string()],
			request,
			now,
		)
	}

	#[tokio::test]
	async fn file_store_overwrites_and_reads_back() {
		let dir = TempDir::new().unwrap();
		let store = FileJobStore::new(dir.path().join("jobs"));

		let mut record = job("job-1");
		store.put(&record).await.unwrap();

		record.cursor = 1;
		record.sent = 1;
		record.status = JobStatus::Sleeping;
		store.put(&record).await.unwrap();

		let all = store.get_all().await.unwrap();
		assert_eq!(all, vec![record]);
	}

	#[tokio::test]
	async fn file_store_leaves_no_temp_files_behind() {
		let dir = TempDir::new().unwrap();
		let store = FileJobStore::new(dir.path());
		store.put(&job("job-1")).await.unwrap();

		let names: Vec<String> = std::fs::read_dir(dir.path())
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().to_string())
			.collect();
		assert_eq!(names, vec!["job-1.json".to_string()]);
	}

	#[tokio::test]
	async fn file_store_missing_directory_is_empty() {
		let dir = TempDir::new().unwrap();
		let store = FileJobStore::new(dir.path().join("never-created"));
		assert!(store.get_all().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn file_store_skips_corrupt_and_foreign_files() {
		let dir = TempDir::new().unwrap();
		let store = FileJobStore::new(dir.path());
		store.put(&job("good")).await.unwrap();

		std::fs::write(dir.path().join("truncated.json"), b"{\"id\": \"trunc").unwrap();
		std::fs::write(dir.path().join(".half.json.tmp"), b"{}").unwrap();
		std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

		let mut broken = job("broken");
		broken.cursor = 2;
		std::fs::write(
			dir.path().join("broken.json"),
			serde_json::to_vec(&broken).unwrap(),
		)
		.unwrap();

		let all = store.get_all().await.unwrap();
		assert_eq!(all.len(), 1);
		assert_eq!(all[0].id, JobId::from("good"));
	}

	#[tokio::test]
	async fn file_store_delete_is_idempotent() {
		let dir = TempDir::new().unwrap();
		let store = FileJobStore::new(dir.path());
		let record = job("job-1");
		store.put(&record).await.unwrap();

		store.delete(&record.id).await.unwrap();
		store.delete(&record.id).await.unwrap();
		assert!(store.get_all().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn file_store_rewrite_survives_directory_sync() {
		let dir = TempDir::new().unwrap();
		let store = FileJobStore::new(dir.path().join("jobs"));
		let mut record = job("job-1");
		for cursor in 0..=2 {
			record.cursor = cursor;
			record.sent = cursor;
			store.put(&record).await.unwrap();
		}

		let reopened = FileJobStore::new(dir.path().join("jobs"));
		assert_eq!(reopened.get_all().await.unwrap(), vec![record]);
	}

	#[test]
	fn second_lock_on_same_directory_is_refused() {
		let dir = TempDir::new().unwrap();
		let store = FileJobStore::new(dir.path().join("jobs"));

		let held = store.lock().unwrap();
		assert!(held.path().ends_with(".herald.lock"));
		assert!(matches!(
			FileJobStore::new(dir.path().join("jobs")).lock(),
			Err(StoreError::Locked { .. })
		));

		drop(held);
		assert!(store.lock().is_ok());
	}

	#[tokio::test]
	async fn lock_file_is_not_a_record() {
		let dir = TempDir::new().unwrap();
		let store = FileJobStore::new(dir.path());
		let _lock = store.lock().unwrap();
		store.put(&job("job-1")).await.unwrap();
		assert_eq!(store.get_all().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn memory_store_skips_planted_garbage() {
		let store = MemoryJobStore::new();
		store.put(&job("good")).await.unwrap();
		store.insert_raw("bad", "not json").await;

		let all = store.get_all().await.unwrap();
		assert_eq!(all.len(), 1);
		assert_eq!(store.len().await, 2);
	}

	#[tokio::test]
	async fn memory_store_can_refuse_writes() {
		let store = MemoryJobStore::new();
		store.fail_writes(true);
		assert!(matches!(
			store.put(&job("job-1")).await,
			Err(StoreError::Io { .. })
		));
		assert!(store.is_empty().await);
	}
}
