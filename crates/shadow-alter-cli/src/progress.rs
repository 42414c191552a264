//! Terminal progress and confirmation

use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use shadow_alter_migrate::{AlterPlan, BackfillObserver, BackfillReport, CutoverGate};

/// Backfill progress as an indicatif bar
///
/// The total is the row count sampled before copying, so the bar may finish
/// past its length when rows are inserted during the run.
pub struct ProgressObserver {
	bar: ProgressBar,
}

impl ProgressObserver {
	pub fn new() -> Self {
		let bar = ProgressBar::new(0);
		bar.set_style(
			ProgressStyle::default_bar()
				.template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
				.unwrap_or_else(|_| ProgressStyle::default_bar())
				.progress_chars("#>-"),
		);
		bar.set_message("Copying rows");
		Self { bar }
	}
}

impl Default for ProgressObserver {
	fn default() -> Self {
		Self::new()
	}
}

impl BackfillObserver for ProgressObserver {
	fn started(&self, total_rows: u64) {
		self.bar.set_length(total_rows);
	}

	fn advanced(&self, rows: u64) {
		self.bar.inc(rows);
	}

	fn finished(&self, report: &BackfillReport) {
		self.bar.finish_with_message(format!(
			"Copied {} rows in {} batches",
			report.rows_copied, report.batches
		));
	}
}

/// Asks before the original table is dropped
pub struct PromptGate {
	assume_yes: bool,
}

impl PromptGate {
	pub fn new(assume_yes: bool) -> Self {
		Self { assume_yes }
	}
}

impl CutoverGate for PromptGate {
	fn confirm(&self, plan: &AlterPlan, report: &BackfillReport) -> bool {
		if self.assume_yes {
			return true;
		}

		println!(
			"{} rows copied into {} in {:.1?}.",
			report.rows_copied.to_string().bold(),
			plan.shadow.table.to_string().cyan(),
			report.elapsed
		);
		let prompt = format!(
			"Drop {} and rename {} into its place?",
			plan.original, plan.shadow.table
		);

		// The prompt blocks on the terminal; keep it off the async workers.
		tokio::task::block_in_place(|| {
			Confirm::new()
				.with_prompt(prompt)
				.default(false)
				.interact()
				.unwrap_or_else(|e| {
					tracing::warn!(error = %e, "Confirmation prompt failed");
					false
				})
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_observer_tracks_rows() {
		let observer = ProgressObserver::new();
		observer.started(10);
		observer.advanced(4);
		observer.advanced(7);

		assert_eq!(observer.bar.length(), Some(10));
		assert_eq!(observer.bar.position(), 11);

		observer.finished(&BackfillReport {
			rows_copied: 11,
			batches: 2,
			..Default::default()
		});
		assert!(observer.bar.is_finished());
	}
}
