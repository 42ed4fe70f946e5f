// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! CSV recipient sources.
//!
//! A source is a CSV file inside the sources directory with a header row. The
//! `email` column holds addresses; the `contacted` column records which rows
//! have already been sent to and is created on first use.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use herald_jobs::{dedup_preserving_order, RecipientError, RecipientStore};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

const EMAIL_COLUMN: &str = "email";
const CONTACTED_COLUMN: &str = "contacted";
const CONTACTED_VALUE: &str = "true";

/// Recipient sources stored as CSV files in one directory.
#[derive(Debug)]
pub struct CsvRecipientStore {
	dir: PathBuf,
	// Serializes read-modify-write cycles so concurrent jobs never lose a mark.
	lock: Mutex<()>,
}

impl CsvRecipientStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self {
			dir: dir.into(),
			lock: Mutex::new(()),
		}
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn source_path(&self, source_id: &str) -> Result<PathBuf, RecipientError> {
		let invalid = source_id.trim().is_empty()
			|| source_id.contains('/')
			|| source_id.contains('\\')
			|| source_id.contains("..");
		if invalid {
			return Err(RecipientError::InvalidSourceId(source_id.to_string()));
		}
		Ok(self.dir.join(source_id))
	}
}

#[async_trait]
impl RecipientStore for CsvRecipientStore {
	#[instrument(skip(self))]
	async fn load_pending(&self, source_id: &str) -> Result<Vec<String>, RecipientError> {
		let path = self.source_path(source_id)?;
		let _guard = self.lock.lock().await;

		let sheet = match Sheet::read(&path, source_id).await? {
			Some(sheet) => sheet,
			None => return Err(RecipientError::SourceNotFound(source_id.to_string())),
		};
		let email_col = sheet
			.email_col
			.ok_or_else(|| RecipientError::MissingEmailColumn(source_id.to_string()))?;

		if sheet.contacted_col_added {
			sheet.write(&path, source_id).await?;
		}

		let pending = dedup_preserving_order(
			sheet
				.rows
				.iter()
				.filter(|row| !is_contacted(&row[sheet.contacted_col]))
				.map(|row| row[email_col].trim().to_string())
				.filter(|email| !email.is_empty()),
		);
		debug!(pending = pending.len(), rows = sheet.rows.len(), "Loaded recipient source");
		Ok(pending)
	}

	#[instrument(skip(self))]
	async fn mark_contacted(&self, source_id: &str, address: &str) -> Result<(), RecipientError> {
		let path = self.source_path(source_id)?;
		let _guard = self.lock.lock().await;

		let Some(mut sheet) = Sheet::read(&path, source_id).await? else {
			debug!("Recipient source missing, nothing to mark");
			return Ok(());
		};
		let Some(email_col) = sheet.email_col else {
			debug!("Recipient source has no email column, nothing to mark");
			return Ok(());
		};

		let contacted_col = sheet.contacted_col;
		let mut marked = 0;
		for row in &mut sheet.rows {
			if row[email_col].trim().eq_ignore_ascii_case(address.trim()) {
				row[contacted_col] = CONTACTED_VALUE.to_string();
				marked += 1;
			}
		}

		if marked > 0 || sheet.contacted_col_added {
			sheet.write(&path, source_id).await?;
		}
		debug!(marked, "Marked recipient as contacted");
		Ok(())
	}
}

fn is_contacted(cell: &str) -> bool {
	cell.trim().eq_ignore_ascii_case(CONTACTED_VALUE)
}

fn find_column(headers: &[String], name: &str) -> Option<usize> {
	headers
		.iter()
		.position(|header| header.trim().eq_ignore_ascii_case(name))
}

/// Parsed source file. Every row is padded to the header width.
#[derive(Debug)]
struct Sheet {
	headers: Vec<String>,
	rows: Vec<Vec<String>>,
	email_col: Option<usize>,
	contacted_col: usize,
	contacted_col_added: bool,
}

impl Sheet {
	/// `Ok(None)` when the file does not exist.
	async fn read(path: &Path, source_id: &str) -> Result<Option<Self>, RecipientError> {
		let bytes = match fs::read(path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(source) => {
				return Err(RecipientError::Io {
					source_id: source_id.to_string(),
					source,
				})
			}
		};
		Self::parse(&bytes, source_id).map(Some)
	}

	fn parse(bytes: &[u8], source_id: &str) -> Result<Self, RecipientError> {
		let malformed = |e: csv::Error| RecipientError::Malformed {
			source_id: source_id.to_string(),
			message: e.to_string(),
		};

		let mut reader = csv::ReaderBuilder::new()
			.has_headers(true)
			.flexible(true)
			.from_reader(bytes);

		let mut headers: Vec<String> = reader
			.headers()
			.map_err(malformed)?
			.iter()
			.map(str::to_string)
			.collect();
		let email_col = find_column(&headers, EMAIL_COLUMN);

		let (contacted_col, contacted_col_added) = match find_column(&headers, CONTACTED_COLUMN) {
			Some(col) => (col, false),
			None => {
				headers.push(CONTACTED_COLUMN.to_string());
				(headers.len() - 1, true)
			}
		};

		let mut rows = Vec::new();
		for record in reader.records() {
			let record = record.map_err(malformed)?;
			let mut row: Vec<String> = record.iter().map(str::to_string).collect();
			if row.len() < headers.len() {
				row.resize(headers.len(), String::new());
			}
			rows.push(row);
		}

		Ok(Self {
			headers,
			rows,
			email_col,
			contacted_col,
			contacted_col_added,
		})
	}

	fn to_bytes(&self, source_id: &str) -> Result<Vec<u8>, RecipientError> {
		let malformed = |message: String| RecipientError::Malformed {
			source_id: source_id.to_string(),
			message,
		};

		let mut writer = csv::WriterBuilder::new()
			.flexible(true)
			.from_writer(Vec::new());
		writer
			.write_record(&self.headers)
			.map_err(|e| malformed(e.to_string()))?;
		for row in &self.rows {
			writer
				.write_record(row)
				.map_err(|e| malformed(e.to_string()))?;
		}
		writer.into_inner().map_err(|e| malformed(e.to_string()))
	}

	/// Replace the file atomically: write a sibling temp file, sync, rename.
	async fn write(&self, path: &Path, source_id: &str) -> Result<(), RecipientError> {
		let io_error = |source| RecipientError::Io {
			source_id: source_id.to_string(),
			source,
		};

		let contents = self.to_bytes(source_id)?;
		let file_name = path
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|| source_id.to_string());
		let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

		let mut file = fs::File::create(&temp_path).await.map_err(io_error)?;
		file.write_all(&contents).await.map_err(io_error)?;
		file.sync_all().await.map_err(io_error)?;
		drop(file);

		fs::rename(&temp_path, path).await.map_err(io_error)
	}
}
