// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Control channel of the process that owns a jobs directory.
//!
//! The owner listens on `<jobs_dir>/.herald.sock`. Each request is one line of
//! JSON and gets exactly one line of JSON back.

use std::io;
use std::path::{Path, PathBuf};

use herald_jobs::{JobId, JobManager, JobRequest};
use serde::{Deserialize, Serialize};

const SOCKET_FILE: &str = ".herald.sock";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
	Submit { request: JobRequest },
	Cancel { id: JobId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlResponse {
	Submitted { id: JobId },
	Cancelled { id: JobId },
	NotFound { id: JobId },
	Error { message: String },
}

pub fn socket_path(jobs_dir: &Path) -> PathBuf {
	jobs_dir.join(SOCKET_FILE)
}

/// Apply one request to the manager.
pub async fn dispatch(manager: &JobManager, request: ControlRequest) -> ControlResponse {
	match request {
		ControlRequest::Submit { request } => match manager.create_job_from_source(request).await {
			Ok(id) => ControlResponse::Submitted { id },
			Err(e) => ControlResponse::Error {
				message: e.to_string(),
			},
		},
		ControlRequest::Cancel { id } => match manager.cancel_job(&id).await {
			Ok(true) => ControlResponse::Cancelled { id },
			Ok(false) => ControlResponse::NotFound { id },
			Err(e) => ControlResponse::Error {
				message: e.to_string(),
			},
		},
	}
}

fn handle_line(line: &str) -> Result<ControlRequest, ControlResponse> {
	serde_json::from_str(line).map_err(|e| ControlResponse::Error {
		message: format!("invalid control request: {e}"),
	})
}

#[cfg(unix)]
mod unix {
	use std::io;
	use std::path::Path;
	use std::time::Duration;

	use herald_jobs::JobManager;
	use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
	use tokio::net::{UnixListener, UnixStream};
	use tokio::time::timeout;
	use tracing::{debug, info, warn};

	use super::{dispatch, handle_line, socket_path, ControlRequest, ControlResponse};

	const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

	/// Accept control connections until the listener fails.
	///
	/// The caller must hold the jobs directory lock, so any socket file left
	/// behind belongs to a process that has exited.
	pub async fn serve(jobs_dir: &Path, manager: &JobManager) -> io::Result<()> {
		let path = socket_path(jobs_dir);
		match std::fs::remove_file(&path) {
			Ok(()) => debug!(path = %path.display(), "Removed stale control socket"),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(e),
		}

		let listener = UnixListener::bind(&path)?;
		info!(path = %path.display(), "Control socket listening");

		loop {
			let (stream, _) = listener.accept().await?;
			match timeout(CONNECTION_TIMEOUT, handle_connection(stream, manager)).await {
				Ok(Ok(())) => {}
				Ok(Err(e)) => warn!(error = %e, "Control connection failed"),
				Err(_) => warn!("Control connection timed out"),
			}
		}
	}

	async fn handle_connection(stream: UnixStream, manager: &JobManager) -> io::Result<()> {
		let (reader, mut writer) = stream.into_split();
		let mut reader = BufReader::new(reader);
		let mut line = String::new();

		loop {
			line.clear();
			if reader.read_line(&mut line).await? == 0 {
				return Ok(());
			}
			let trimmed = line.trim();
			if trimmed.is_empty() {
				continue;
			}

			let response = match handle_line(trimmed) {
				Ok(request) => dispatch(manager, request).await,
				Err(response) => response,
			};
			debug!(?response, "Control request handled");

			let mut out = serde_json::to_string(&response)?;
			out.push('\n');
			writer.write_all(out.as_bytes()).await?;
		}
	}

	pub async fn request(
		jobs_dir: &Path,
		request: &ControlRequest,
	) -> io::Result<Option<ControlResponse>> {
		let mut stream = match UnixStream::connect(socket_path(jobs_dir)).await {
			Ok(stream) => stream,
			Err(e)
				if matches!(
					e.kind(),
					io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
				) =>
			{
				return Ok(None);
			}
			Err(e) => return Err(e),
		};

		let mut out = serde_json::to_string(request)?;
		out.push('\n');
		stream.write_all(out.as_bytes()).await?;
		stream.shutdown().await?;

		let mut reader = BufReader::new(stream);
		let mut line = String::new();
		reader.read_line(&mut line).await?;
		let response = serde_json::from_str(line.trim())?;
		Ok(Some(response))
	}
}

/// Serve control requests for `manager` on the jobs directory socket.
#[cfg(unix)]
pub async fn serve(jobs_dir: &Path, manager: &JobManager) -> io::Result<()> {
	unix::serve(jobs_dir, manager).await
}

#[cfg(not(unix))]
pub async fn serve(_jobs_dir: &Path, _manager: &JobManager) -> io::Result<()> {
	tracing::debug!("Control socket unavailable on this platform");
	std::future::pending().await
}

/// Send one request to the owning process. `None` when nothing is listening.
#[cfg(unix)]
pub async fn request(jobs_dir: &Path, request: &ControlRequest) -> io::Result<Option<ControlResponse>> {
	unix::request(jobs_dir, request).await
}

#[cfg(not(unix))]
pub async fn request(_jobs_dir: &Path, _request: &ControlRequest) -> io::Result<Option<ControlResponse>> {
	Ok(None)
}
