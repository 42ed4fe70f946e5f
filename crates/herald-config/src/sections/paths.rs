// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Data directory configuration section.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_jobs_dir() -> PathBuf {
	PathBuf::from("jobs")
}

fn default_sources_dir() -> PathBuf {
	PathBuf::from("recipient_sources")
}

fn default_uploads_dir() -> PathBuf {
	PathBuf::from("uploads")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PathsConfigLayer {
	pub jobs_dir: Option<PathBuf>,
	pub sources_dir: Option<PathBuf>,
	pub uploads_dir: Option<PathBuf>,
}

impl PathsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.jobs_dir.is_some() {
			self.jobs_dir = other.jobs_dir;
		}
		if other.sources_dir.is_some() {
			self.sources_dir = other.sources_dir;
		}
		if other.uploads_dir.is_some() {
			self.uploads_dir = other.uploads_dir;
		}
	}

	pub fn finalize(self) -> PathsConfig {
		PathsConfig {
			jobs_dir: self.jobs_dir.unwrap_or_else(default_jobs_dir),
			sources_dir: self.sources_dir.unwrap_or_else(default_sources_dir),
			uploads_dir: self.uploads_dir.unwrap_or_else(default_uploads_dir),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
	/// One JSON record per job.
	pub jobs_dir: PathBuf,
	/// CSV recipient sources.
	pub sources_dir: PathBuf,
	/// Images referenced from message bodies as `uploads/<name>`.
	pub uploads_dir: PathBuf,
}

impl Default for PathsConfig {
	fn default() -> Self {
		PathsConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = PathsConfig::default();
		assert_eq!(config.jobs_dir, PathBuf::from("jobs"));
		assert_eq!(config.sources_dir, PathBuf::from("recipient_sources"));
		assert_eq!(config.uploads_dir, PathBuf::from("uploads"));
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = PathsConfigLayer {
			jobs_dir: Some(PathBuf::from("/old/jobs")),
			sources_dir: Some(PathBuf::from("/old/sources")),
			uploads_dir: None,
		};
		base.merge(PathsConfigLayer {
			jobs_dir: Some(PathBuf::from("/var/lib/herald/jobs")),
			..Default::default()
		});
		let config = base.finalize();
		assert_eq!(config.jobs_dir, PathBuf::from("/var/lib/herald/jobs"));
		assert_eq!(config.sources_dir, PathBuf::from("/old/sources"));
		assert_eq!(config.uploads_dir, PathBuf::from("uploads"));
	}

	#[test]
	fn test_deserialize_layer_partial() {
		let layer: PathsConfigLayer = toml::from_str("uploads_dir = \"/srv/uploads\"\n").unwrap();
		assert_eq!(layer.uploads_dir, Some(PathBuf::from("/srv/uploads")));
		assert!(layer.jobs_dir.is_none());
	}
}
