//! Error taxonomy of an online schema change
//!
//! Every error aborts the run. Nothing is retried and no DDL side effect is
//! rolled back; the message carries the failing statement or operation so the
//! operator can finish or undo the change by hand.

use shadow_alter_backends::DatabaseError;
use shadow_alter_conf::SettingsError;
use thiserror::Error;

use crate::cutover::CutoverStep;

#[derive(Debug, Error)]
pub enum AlterError {
	/// The input is not a single `ALTER TABLE [schema.]table <clause>` statement
	#[error("Parse error: {0}")]
	Parse(String),

	/// A catalog query failed or the table does not exist
	#[error("Introspection error: {context}")]
	Introspection {
		context: String,
		#[source]
		source: Option<DatabaseError>,
	},

	/// Primary key correspondence between the two table versions is ambiguous
	#[error("Reconciliation error: {0}")]
	Reconciliation(String),

	/// A create/alter/drop/trigger statement failed
	#[error("DDL failed: {statement}")]
	Ddl {
		statement: String,
		#[source]
		source: DatabaseError,
	},

	/// A fetch or insert batch failed; completed batches stay in the shadow table
	#[error("Backfill failed: {context}")]
	Backfill {
		context: String,
		#[source]
		source: Option<DatabaseError>,
	},

	#[error("Cutover failed at step '{step}'{}", dropped_note(.original_dropped))]
	Cutover {
		step: CutoverStep,
		original_dropped: bool,
		#[source]
		source: DatabaseError,
	},

	/// Cutover was declined at the confirmation step
	#[error("Aborted before cutover; shadow table and triggers were left in place")]
	Aborted,

	#[error("Invalid settings: {0}")]
	Config(#[from] SettingsError),
}

impl AlterError {
	pub(crate) fn introspection(context: impl Into<String>, source: DatabaseError) -> Self {
		AlterError::Introspection {
			context: context.into(),
			source: Some(source),
		}
	}

	pub(crate) fn ddl(statement: impl Into<String>, source: DatabaseError) -> Self {
		AlterError::Ddl {
			statement: statement.into(),
			source,
		}
	}

	pub(crate) fn backfill(context: impl Into<String>, source: DatabaseError) -> Self {
		AlterError::Backfill {
			context: context.into(),
			source: Some(source),
		}
	}

	/// Whether the database is left without the original table
	///
	/// Only a cutover failure after the drop qualifies. The shadow table then
	/// holds every row but may lack constraints, triggers or its final name.
	pub fn is_critical(&self) -> bool {
		matches!(
			self,
			AlterError::Cutover {
				original_dropped: true,
				..
			}
		)
	}
}

fn dropped_note(original_dropped: &bool) -> &'static str {
	if *original_dropped {
		" after the original table was dropped"
	} else {
		""
	}
}

pub type Result<T> = std::result::Result<T, AlterError>;
