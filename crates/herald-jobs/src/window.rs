// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Weekly work window during which sends are permitted.

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::WindowError;

/// Weekly schedule: a set of work days and an hour range `[start_hour, end_hour)`
/// evaluated in a fixed timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkWindow {
	workdays: [bool; 7],
	start_hour: u32,
	end_hour: u32,
	timezone: Tz,
}

impl WorkWindow {
	/// Build a window. Work days use 0 = Monday .. 6 = Sunday.
	pub fn new(
		workdays: impl IntoIterator<Item = u8>,
		start_hour: u32,
		end_hour: u32,
		timezone: Tz,
	) -> Result<Self, WindowError> {
		let mut days = [false; 7];
		for day in workdays {
			if day > 6 {
				return Err(WindowError::InvalidWeekday(day));
			}
			days[day as usize] = true;
		}
		if !days.iter().any(|d| *d) {
			return Err(WindowError::NoWorkdays);
		}
		if start_hour >= end_hour || end_hour > 24 {
			return Err(WindowError::InvalidHours {
				start: start_hour,
				end: end_hour,
			});
		}

		Ok(Self {
			workdays: days,
			start_hour,
			end_hour,
			timezone,
		})
	}

	/// Every hour of every day, in UTC.
	pub fn always_open() -> Self {
		Self {
			workdays: [true; 7],
			start_hour: 0,
			end_hour: 24,
			timezone: Tz::UTC,
		}
	}

	pub fn timezone(&self) -> Tz {
		self.timezone
	}

	pub fn is_open(&self, now: DateTime<Utc>) -> bool {
		let local = now.with_timezone(&self.timezone);
		self.is_workday(local.date_naive())
			&& (self.start_hour..self.end_hour).contains(&local.hour())
	}

	/// Earliest time sending may resume.
	///
	/// Returns `now` when the window is open. Otherwise advances whole days
	/// (never within the current day) to the next work day and returns its
	/// `start_hour:00:00` in the window's timezone.
	pub fn next_open(&self, now: DateTime<Utc>) -> DateTime<Utc> {
		if self.is_open(now) {
			return now;
		}

		let today = now.with_timezone(&self.timezone).date_naive();
		(1..=7)
			.filter_map(|n| today.checked_add_days(Days::new(n)))
			.find(|day| self.is_workday(*day))
			.map(|day| self.start_of(day))
			.unwrap_or(now + TimeDelta::days(7))
	}

	fn is_workday(&self, day: NaiveDate) -> bool {
		self.workdays[day.weekday().num_days_from_monday() as usize]
	}

	fn start_of(&self, day: NaiveDate) -> DateTime<Utc> {
		let start = day.and_hms_opt(self.start_hour, 0, 0).unwrap_or_default();
		// A start hour swallowed by a DST gap resolves to the first valid instant after it.
		let local = self
			.timezone
			.from_local_datetime(&start)
			.earliest()
			.or_else(|| {
				self
					.timezone
					.from_local_datetime(&(start + TimeDelta::hours(1)))
					.earliest()
			});
		match local {
			Some(local) => local.with_timezone(&Utc),
			None => Utc.from_utc_datetime(&start),
		}
	}
}
