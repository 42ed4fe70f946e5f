// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Work window configuration section.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_workdays() -> Vec<u8> {
	vec![0, 1, 2, 3, 4]
}

const DEFAULT_START_HOUR: u32 = 9;
const DEFAULT_END_HOUR: u32 = 17;
const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Berlin;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfigLayer {
	/// Work days, 0 = Monday .. 6 = Sunday.
	pub workdays: Option<Vec<u8>>,
	pub start_hour: Option<u32>,
	/// Exclusive.
	pub end_hour: Option<u32>,
	/// IANA timezone name.
	pub timezone: Option<String>,
}

impl SchedulerConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.workdays.is_some() {
			self.workdays = other.workdays;
		}
		if other.start_hour.is_some() {
			self.start_hour = other.start_hour;
		}
		if other.end_hour.is_some() {
			self.end_hour = other.end_hour;
		}
		if other.timezone.is_some() {
			self.timezone = other.timezone;
		}
	}

	pub fn finalize(self) -> Result<SchedulerConfig, ConfigError> {
		let mut workdays = self.workdays.unwrap_or_else(default_workdays);
		workdays.sort_unstable();
		workdays.dedup();

		if workdays.is_empty() {
			return Err(ConfigError::Validation(
				"scheduler.workdays must contain at least one day".to_string(),
			));
		}
		if let Some(day) = workdays.iter().find(|day| **day > 6) {
			return Err(ConfigError::InvalidValue {
				key: "scheduler.workdays".to_string(),
				message: format!("day {day} is out of range (0 = Monday .. 6 = Sunday)"),
			});
		}

		let start_hour = self.start_hour.unwrap_or(DEFAULT_START_HOUR);
		let end_hour = self.end_hour.unwrap_or(DEFAULT_END_HOUR);
		if start_hour >= end_hour || end_hour > 24 {
			return Err(ConfigError::Validation(format!(
				"scheduler hours {start_hour}..{end_hour} are invalid (need start_hour < end_hour <= 24)"
			)));
		}

		let timezone = match self.timezone {
			Some(name) => name.parse::<Tz>().map_err(|_| ConfigError::InvalidValue {
				key: "scheduler.timezone".to_string(),
				message: format!("unknown timezone '{name}'"),
			})?,
			None => DEFAULT_TIMEZONE,
		};

		Ok(SchedulerConfig {
			workdays,
			start_hour,
			end_hour,
			timezone,
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
	pub workdays: Vec<u8>,
	pub start_hour: u32,
	pub end_hour: u32,
	pub timezone: Tz,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			workdays: default_workdays(),
			start_hour: DEFAULT_START_HOUR,
			end_hour: DEFAULT_END_HOUR,
			timezone: DEFAULT_TIMEZONE,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_berlin_office_hours() {
		let config = SchedulerConfigLayer::default().finalize().unwrap();
		assert_eq!(config, SchedulerConfig::default());
		assert_eq!(config.workdays, vec![0, 1, 2, 3, 4]);
		assert_eq!((config.start_hour, config.end_hour), (9, 17));
		assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
	}

	#[test]
	fn parses_toml_section() {
		let layer: SchedulerConfigLayer = toml::from_str(
			r#"
workdays = [5, 0, 0]
start_hour = 8
end_hour = 20
timezone = "America/New_York"
"#,
		)
		.unwrap();
		let config = layer.finalize().unwrap();
		assert_eq!(config.workdays, vec![0, 5]);
		assert_eq!(config.start_hour, 8);
		assert_eq!(config.timezone, chrono_tz::America::New_York);
	}

	#[test]
	fn rejects_empty_workdays() {
		let layer = SchedulerConfigLayer {
			workdays: Some(Vec::new()),
			..Default::default()
		};
		assert!(matches!(layer.finalize(), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn rejects_out_of_range_day() {
		let layer = SchedulerConfigLayer {
			workdays: Some(vec![1, 7]),
			..Default::default()
		};
		assert!(matches!(
			layer.finalize(),
			Err(ConfigError::InvalidValue { .. })
		));
	}

	#[test]
	fn rejects_inverted_hours() {
		let layer = SchedulerConfigLayer {
			start_hour: Some(18),
			end_hour: Some(9),
			..Default::default()
		};
		assert!(layer.finalize().is_err());
	}

	#[test]
	fn rejects_unknown_timezone() {
		let layer = SchedulerConfigLayer {
			timezone: Some("Mars/Olympus".to_string()),
			..Default::default()
		};
		let err = layer.finalize().unwrap_err();
		assert!(err.to_string().contains("Mars/Olympus"));
	}

	#[test]
	fn merge_prefers_other_values() {
		let mut base = SchedulerConfigLayer {
			start_hour: Some(8),
			end_hour: Some(16),
			..Default::default()
		};
		base.merge(SchedulerConfigLayer {
			end_hour: Some(18),
			..Default::default()
		});
		assert_eq!(base.start_hour, Some(8));
		assert_eq!(base.end_hour, Some(18));
	}
}
