// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::RecipientError;

/// External store supplying recipients and tracking who was already contacted.
#[async_trait]
pub trait RecipientStore: Send + Sync {
	/// Addresses not yet marked contacted, in source order, without duplicates.
	async fn load_pending(&self, source_id: &str) -> Result<Vec<String>, RecipientError>;

	/// Record a successful send. Callers treat failures as best-effort.
	async fn mark_contacted(&self, source_id: &str, address: &str) -> Result<(), RecipientError>;
}

/// Drop repeated addresses, keeping the first occurrence of each.
pub fn dedup_preserving_order<I>(addresses: I) -> Vec<String>
where
	I: IntoIterator<Item = String>,
{
	let mut seen = HashSet::new();
	addresses
		.into_iter()
		.filter(|address| seen.insert(address.clone()))
		.collect()
}

/// In-memory recipient store for testing.
#[derive(Debug, Default)]
pub struct MemoryRecipientStore {
	sources: Mutex<HashMap<String, Vec<(String, bool)>>>,
}

impl MemoryRecipientStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a source; every address starts uncontacted.
	pub fn insert_source<I, S>(&self, source_id: &str, addresses: I)
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let rows = addresses.into_iter().map(|a| (a.into(), false)).collect();
		self.lock().insert(source_id.to_string(), rows);
	}

	pub fn contacted(&self, source_id: &str) -> Vec<String> {
		self
			.lock()
			.get(source_id)
			.map(|rows| {
				rows
					.iter()
					.filter(|(_, contacted)| *contacted)
					.map(|(address, _)| address.clone())
					.collect()
			})
			.unwrap_or_default()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(String, bool)>>> {
		self.sources.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

#[async_trait]
impl RecipientStore for MemoryRecipientStore {
	async fn load_pending(&self, source_id: &str) -> Result<Vec<String>, RecipientError> {
		let sources = self.lock();
		let rows = sources
			.get(source_id)
			.ok_or_else(|| RecipientError::SourceNotFound(source_id.to_string()))?;
		Ok(dedup_preserving_order(
			rows
				.iter()
				.filter(|(_, contacted)| !contacted)
				.map(|(address, _)| address.clone()),
		))
	}

	async fn mark_contacted(&self, source_id: &str, address: &str) -> Result<(), RecipientError> {
		let mut sources = self.lock();
		if let Some(rows) = sources.get_mut(source_id) {
			rows
				.iter_mut()
				.filter(|(a, _)| a.eq_ignore_ascii_case(address))
				.for_each(|row| row.1 = true);
		}
		Ok(())
	}
}
