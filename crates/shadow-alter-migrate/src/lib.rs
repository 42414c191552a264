//! # shadow-alter migrate
//!
//! Online schema changes for live MySQL tables.
//!
//! The target table is copied into a shadow table that already has the new
//! schema. Triggers on the original table mirror every write into the shadow
//! while the existing rows are backfilled in adaptively sized batches. Once the
//! copy is complete and confirmed, the original table is dropped and the
//! shadow table takes its name, with foreign keys, checks and triggers
//! restored.
//!
//! ## Phases
//!
//! | Phase | Module |
//! |-------|--------|
//! | Statement parsing | [`parser`] |
//! | Catalog introspection | [`introspect`] |
//! | Column reconciliation | [`reconcile`] |
//! | Shadow table creation | [`shadow`] |
//! | Change-capture triggers | [`triggers`] |
//! | Backfill | [`backfill`] |
//! | Cutover | [`cutover`] |
//!
//! [`OnlineAlter`] wires them together.
//!
//! ## Example
//!
//! ```rust,no_run
//! use shadow_alter_backends::DatabaseConnection;
//! use shadow_alter_conf::MigrationSettings;
//! use shadow_alter_migrate::{AlwaysProceed, NoopObserver, OnlineAlter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = DatabaseConnection::connect_mysql("mysql://root@localhost:3306/shop").await?;
//! let alter = OnlineAlter::new(conn, MigrationSettings::default())?;
//!
//! let outcome = alter
//! 	.run("ALTER TABLE users ADD COLUMN age int", &NoopObserver, &AlwaysProceed)
//! 	.await?;
//! println!("copied {} rows", outcome.backfill.rows_copied);
//! # Ok(())
//! # }
//! ```
//!
//! A run that fails or is declined before cutover leaves the shadow table and
//! the triggers in place. Running again starts over from a fresh shadow table.

pub mod backfill;
pub mod cutover;
pub mod error;
pub mod introspect;
pub mod parser;
pub mod reconcile;
pub mod runner;
pub mod shadow;
pub mod triggers;

#[cfg(test)]
pub(crate) mod testing;

pub use backfill::{
	BackfillObserver, BackfillReport, BatchSizer, FixedBatchSizer, NoopObserver,
	ProportionalBatchSizer,
};
pub use cutover::{CutoverReport, CutoverStep};
pub use error::{AlterError, Result};
pub use introspect::{Column, MySqlIntrospector, TableRef, TableSchema};
pub use parser::{AlterParser, AlterStatement, RegexAlterParser};
pub use reconcile::{ColumnMapping, Reconciliation};
pub use runner::{AlterOutcome, AlterPlan, AlwaysProceed, CutoverGate, OnlineAlter};
pub use shadow::{ConstraintKind, ConstraintSet, HeldConstraint, ShadowNaming};
