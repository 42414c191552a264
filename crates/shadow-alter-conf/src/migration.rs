//! Tunables for a single online schema change

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SettingsError};

/// Settings consumed by the migration core
///
/// Every field has a default, so an empty `[migration]` table is valid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
	/// Appended to the table name to form the shadow table and trigger names
	pub shadow_suffix: String,

	/// Capacity of the row buffer between the backfill reader and writer
	pub row_buffer_size: usize,

	/// Wall-clock duration each insert batch should take
	pub target_batch_millis: u64,

	pub initial_batch_size: usize,
	pub min_batch_size: usize,
	pub max_batch_size: usize,
}

impl Default for MigrationSettings {
	fn default() -> Self {
		Self {
			shadow_suffix: "_shadow_alter".to_string(),
			row_buffer_size: 50,
			target_batch_millis: 500,
			initial_batch_size: 1024,
			min_batch_size: 8,
			max_batch_size: 1_000_000,
		}
	}
}

impl MigrationSettings {
	pub fn target_batch_duration(&self) -> Duration {
		Duration::from_millis(self.target_batch_millis)
	}

	/// Reject settings the copier cannot run with
	///
	/// # Examples
	///
	/// ```
	/// use shadow_alter_conf::MigrationSettings;
	///
	/// assert!(MigrationSettings::default().validate().is_ok());
	///
	/// let settings = MigrationSettings { min_batch_size: 0, ..Default::default() };
	/// assert!(settings.validate().is_err());
	/// ```
	pub fn validate(&self) -> Result<()> {
		let invalid = |field, reason: &str| {
			Err(SettingsError::Invalid {
				field,
				reason: reason.to_string(),
			})
		};

		if self.shadow_suffix.is_empty() {
			return invalid("shadow_suffix", "must not be empty");
		}
		if self.shadow_suffix.contains('`') {
			return invalid("shadow_suffix", "must not contain backticks");
		}
		if self.row_buffer_size == 0 {
			return invalid("row_buffer_size", "must be at least 1");
		}
		if self.target_batch_millis == 0 {
			return invalid("target_batch_millis", "must be at least 1");
		}
		if self.min_batch_size == 0 {
			return invalid("min_batch_size", "must be at least 1");
		}
		if self.min_batch_size > self.max_batch_size {
			return invalid("min_batch_size", "must not exceed max_batch_size");
		}
		if !(self.min_batch_size..=self.max_batch_size).contains(&self.initial_batch_size) {
			return invalid(
				"initial_batch_size",
				"must lie between min_batch_size and max_batch_size",
			);
		}
		Ok(())
	}
}
