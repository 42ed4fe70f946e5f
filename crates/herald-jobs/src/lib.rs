// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bulk dispatch scheduler for Herald.
//!
//! A job is an ordered recipient snapshot plus a message template and a
//! batch/interval policy. Each job is driven by its own [`JobRunner`] task that
//! sends one batch at a time inside the configured [`WorkWindow`], persists its
//! progress after every recipient through a [`JobStore`], and resumes from the
//! exact next unsent recipient after a restart.
//!
//! The [`JobManager`] is the entry point: it creates jobs, lists their
//! progress, cancels them and rebuilds runners from the store on startup.

pub mod clock;
pub mod error;
pub mod mailer;
pub mod manager;
pub mod recipients;
pub mod runner;
pub mod store;
pub mod types;
pub mod window;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use error::{JobError, RecipientError, Result, StoreError, WindowError};
pub use mailer::{Mailer, OutgoingMessage, SendFailure};
pub use manager::JobManager;
pub use recipients::{dedup_preserving_order, MemoryRecipientStore, RecipientStore};
pub use runner::{JobRunner, RunOutcome, RunnerDeps};
pub use store::{FileJobStore, JobStore, JobsDirLock, MemoryJobStore};
pub use types::{Job, JobId, JobRequest, JobStatus, JobSummary, MessageTemplate};
pub use window::WorkWindow;
