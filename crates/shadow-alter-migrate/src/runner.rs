//! Run orchestration
//!
//! Parse, introspect, create the shadow table, reconcile, install triggers,
//! backfill, confirm, cut over. Each phase runs only after the previous one
//! succeeded; the first error ends the run.

use shadow_alter_backends::DatabaseConnection;
use shadow_alter_conf::MigrationSettings;

use crate::backfill::{
	Backfill, BackfillObserver, BackfillReport, BatchSizer, CopyPlan, ProportionalBatchSizer,
};
use crate::cutover::{CutoverCoordinator, CutoverReport};
use crate::error::{AlterError, Result};
use crate::introspect::{MySqlIntrospector, TableRef, TableSchema};
use crate::parser::{AlterParser, AlterStatement, RegexAlterParser};
use crate::reconcile::{ColumnMapping, Reconciliation, reconcile};
use crate::shadow::{ConstraintSet, ShadowNaming, ShadowTable, ShadowTableManager};
use crate::triggers::{self, TriggerDefinition, TriggerSynthesizer};

/// Decides whether to proceed with cutover once the backfill is done
///
/// This is the last point at which the run can stop without touching the
/// original table.
pub trait CutoverGate: Send + Sync {
	fn confirm(&self, plan: &AlterPlan, report: &BackfillReport) -> bool;
}

/// Proceeds without asking
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysProceed;

impl CutoverGate for AlwaysProceed {
	fn confirm(&self, _plan: &AlterPlan, _report: &BackfillReport) -> bool {
		true
	}
}

/// Everything decided before rows start moving
#[derive(Debug, Clone)]
pub struct AlterPlan {
	pub statement: AlterStatement,
	pub original: TableRef,
	pub shadow: ShadowTable,
	pub old_schema: TableSchema,
	pub new_schema: TableSchema,
	pub mapping: ColumnMapping,
	pub reconciliation: Reconciliation,
	pub triggers: Vec<TriggerDefinition>,
}

#[derive(Debug, Clone)]
pub struct AlterOutcome {
	pub table: TableRef,
	pub backfill: BackfillReport,
	pub cutover: CutoverReport,
}

/// Online schema change over one connection
pub struct OnlineAlter {
	conn: DatabaseConnection,
	settings: MigrationSettings,
	naming: ShadowNaming,
	parser: Box<dyn AlterParser>,
}

impl OnlineAlter {
	pub fn new(conn: DatabaseConnection, settings: MigrationSettings) -> Result<Self> {
		settings.validate()?;
		Ok(Self {
			naming: ShadowNaming::new(settings.shadow_suffix.clone()),
			conn,
			settings,
			parser: Box::new(RegexAlterParser),
		})
	}

	pub fn with_parser(mut self, parser: Box<dyn AlterParser>) -> Self {
		self.parser = parser;
		self
	}

	pub fn settings(&self) -> &MigrationSettings {
		&self.settings
	}

	/// The default batch sizing strategy for these settings
	pub fn batch_sizer(&self) -> ProportionalBatchSizer {
		ProportionalBatchSizer::from_settings(&self.settings)
	}

	/// Parse the statement and build the shadow table, without installing triggers
	///
	/// The shadow table is created (replacing a stale one) because the new
	/// column layout is read back from the catalog.
	pub async fn plan(&self, statement: &str) -> Result<AlterPlan> {
		let statement = self.parser.parse(statement)?;
		let introspector = MySqlIntrospector::new(self.conn.clone());

		let schema = match &statement.schema {
			Some(schema) => schema.clone(),
			None => introspector.current_database().await?,
		};
		let original = TableRef::new(schema, statement.table.clone());
		tracing::info!(table = %original, clause = %statement.clause, "Planning alteration");

		let old_schema = introspector.table_schema(&original).await?;
		let shadow = ShadowTableManager::new(self.conn.clone(), self.naming.clone())
			.prepare(&original, &statement)
			.await?;
		let new_schema = introspector.table_schema(&shadow.table).await?;
		ensure_constraints_restorable(&shadow.constraints, &new_schema)?;

		let mapping = ColumnMapping::build(&old_schema, &statement.renames, &statement.drops);
		let reconciliation = reconcile(&old_schema, &new_schema, &mapping)?;
		let triggers =
			TriggerSynthesizer::new(&original, &shadow.table, &reconciliation, &self.naming)
				.definitions();

		Ok(AlterPlan {
			statement,
			original,
			shadow,
			old_schema,
			new_schema,
			mapping,
			reconciliation,
			triggers,
		})
	}

	/// Run the whole change with the default batch sizer
	pub async fn run(
		&self,
		statement: &str,
		observer: &dyn BackfillObserver,
		gate: &dyn CutoverGate,
	) -> Result<AlterOutcome> {
		let mut sizer = self.batch_sizer();
		self.run_with_sizer(statement, &mut sizer, observer, gate)
			.await
	}

	pub async fn run_with_sizer(
		&self,
		statement: &str,
		sizer: &mut dyn BatchSizer,
		observer: &dyn BackfillObserver,
		gate: &dyn CutoverGate,
	) -> Result<AlterOutcome> {
		let plan = self.plan(statement).await?;

		triggers::install(&self.conn, &plan.triggers).await?;

		let total_rows = MySqlIntrospector::new(self.conn.clone())
			.row_count(&plan.original)
			.await?;
		let copy = CopyPlan::new(
			plan.original.clone(),
			plan.shadow.table.clone(),
			&plan.reconciliation,
		);
		let backfill = Backfill::new(self.conn.clone(), copy, self.settings.row_buffer_size)
			.run(sizer, total_rows, observer)
			.await?;

		if !gate.confirm(&plan, &backfill) {
			tracing::warn!(shadow = %plan.shadow.table, "Cutover declined");
			return Err(AlterError::Aborted);
		}

		let cutover = CutoverCoordinator::new(self.conn.clone(), self.naming.clone())
			.run(&plan.original, &plan.shadow)
			.await?;

		Ok(AlterOutcome {
			table: plan.original,
			backfill,
			cutover,
		})
	}
}

/// Held-back constraints are restored verbatim after the original table is
/// dropped, so every column they name must survive the alteration
fn ensure_constraints_restorable(constraints: &ConstraintSet, new_schema: &TableSchema) -> Result<()> {
	for constraint in constraints.iter() {
		if let Some(missing) = constraint
			.local_columns()
			.into_iter()
			.find(|column| new_schema.column(column).is_none())
		{
			return Err(AlterError::Reconciliation(format!(
				"constraint `{}` refers to column `{}`, which the alteration renames or drops; \
				drop the constraint in the same statement and add it back afterwards",
				constraint.name, missing
			)));
		}
	}
	Ok(())
}

impl std::fmt::Debug for OnlineAlter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OnlineAlter")
			.field("settings", &self.settings)
			.finish_non_exhaustive()
	}
}
