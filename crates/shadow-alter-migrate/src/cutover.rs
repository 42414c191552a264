//! Cutover: swap the shadow table into the original table's place
//!
//! Steps run on the session connection in this order:
//!
//! 1. disable foreign key checks
//! 2. capture the original table's own triggers (ours excluded)
//! 3. drop the original table
//! 4. attach the held-back foreign keys and checks to the shadow table
//! 5. recreate the captured triggers on the shadow table
//! 6. rename the shadow table to the original name
//! 7. enable foreign key checks
//!
//! Constraint and trigger names are unique per schema, so nothing is recreated
//! before the original table is gone. A failure from step 3 on leaves the
//! database without the original table and is reported as critical.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use shadow_alter_backends::DatabaseConnection;

use crate::error::{AlterError, Result};
use crate::introspect::{MySqlIntrospector, TableRef};
use crate::shadow::{ShadowNaming, ShadowTable};

static TRIGGER_TARGET_REGEX: Lazy<Regex> = Lazy::new(|| {
	const IDENT: &str = r"(?:`(?:[^`]|``)+`|[\w$]+)";
	Regex::new(&format!(
		r"(?is)\bon\s+((?:{IDENT}\s*\.\s*)?{IDENT})\s+for\s+each\s+row\b"
	))
	.expect("Invalid trigger header regex pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoverStep {
	DisableForeignKeyChecks,
	CaptureTriggers,
	DropOriginal,
	RestoreConstraints,
	RestoreTriggers,
	RenameShadow,
	EnableForeignKeyChecks,
}

impl fmt::Display for CutoverStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			CutoverStep::DisableForeignKeyChecks => "disable foreign key checks",
			CutoverStep::CaptureTriggers => "capture triggers",
			CutoverStep::DropOriginal => "drop original table",
			CutoverStep::RestoreConstraints => "restore foreign keys",
			CutoverStep::RestoreTriggers => "restore triggers",
			CutoverStep::RenameShadow => "rename shadow table",
			CutoverStep::EnableForeignKeyChecks => "enable foreign key checks",
		};
		f.write_str(name)
	}
}

/// A trigger captured from the original table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedTrigger {
	pub name: String,
	/// Creation statement rewritten to target the shadow table
	pub statement: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutoverReport {
	pub constraints_restored: usize,
	pub triggers_restored: Vec<String>,
}

/// Rewrite the table a `CREATE TRIGGER` statement is attached to
///
/// The table reference is the identifier right before `FOR EACH ROW` in the
/// trigger header (for `SHOW CREATE TRIGGER` output, the last backtick-quoted
/// identifier of the first line). It is replaced with the fully qualified
/// `target`. Returns `None` when no header is found.
///
/// # Examples
///
/// ```
/// use shadow_alter_migrate::cutover::retarget_trigger;
/// use shadow_alter_migrate::introspect::TableRef;
///
/// let statement = "CREATE TRIGGER `audit` AFTER INSERT ON `orders` FOR EACH ROW SET @n = @n + 1";
/// let target = TableRef::new("shop", "orders_shadow_alter");
/// assert_eq!(
/// 	retarget_trigger(statement, &target).unwrap(),
/// 	"CREATE TRIGGER `audit` AFTER INSERT ON `shop`.`orders_shadow_alter` FOR EACH ROW SET @n = @n + 1"
/// );
/// ```
pub fn retarget_trigger(statement: &str, target: &TableRef) -> Option<String> {
	let table = TRIGGER_TARGET_REGEX.captures(statement)?.get(1)?;
	Some(format!(
		"{}{}{}",
		&statement[..table.start()],
		target.quoted(),
		&statement[table.end()..]
	))
}

/// Runs the cutover sequence
#[derive(Debug, Clone)]
pub struct CutoverCoordinator {
	conn: DatabaseConnection,
	naming: ShadowNaming,
}

impl CutoverCoordinator {
	pub fn new(conn: DatabaseConnection, naming: ShadowNaming) -> Self {
		Self { conn, naming }
	}

	pub async fn run(&self, original: &TableRef, shadow: &ShadowTable) -> Result<CutoverReport> {
		tracing::info!(original = %original, shadow = %shadow.table, "Starting cutover");

		self.execute(
			CutoverStep::DisableForeignKeyChecks,
			false,
			"SET foreign_key_checks = 0",
		)
		.await?;

		let triggers = match self.capture_triggers(original, &shadow.table).await {
			Ok(triggers) => triggers,
			Err(e) => {
				self.enable_foreign_key_checks().await;
				return Err(e);
			}
		};

		tracing::info!(table = %original, "Dropping original table");
		let drop = format!("DROP TABLE {}", original.quoted());
		if let Err(e) = self.execute(CutoverStep::DropOriginal, false, &drop).await {
			self.enable_foreign_key_checks().await;
			return Err(e);
		}

		let mut report = CutoverReport::default();
		if let Some(sql) = shadow.constraints.add_statement(&shadow.table) {
			tracing::info!(count = shadow.constraints.len(), "Restoring constraints");
			self.execute(CutoverStep::RestoreConstraints, true, &sql)
				.await?;
			report.constraints_restored = shadow.constraints.len();
		}

		for trigger in triggers {
			tracing::info!(trigger = %trigger.name, "Restoring trigger");
			self.execute(CutoverStep::RestoreTriggers, true, &trigger.statement)
				.await?;
			report.triggers_restored.push(trigger.name);
		}

		tracing::info!(from = %shadow.table, to = %original, "Renaming shadow table");
		let rename = format!(
			"RENAME TABLE {} TO {}",
			shadow.table.quoted(),
			original.quoted()
		);
		self.execute(CutoverStep::RenameShadow, true, &rename)
			.await?;

		self.enable_foreign_key_checks().await;
		tracing::info!(table = %original, "Cutover complete");
		Ok(report)
	}

	/// Creation statements of every trigger on `original` that is not ours
	pub async fn capture_triggers(
		&self,
		original: &TableRef,
		shadow: &TableRef,
	) -> Result<Vec<CapturedTrigger>> {
		let introspector = MySqlIntrospector::new(self.conn.clone());
		let mut captured = Vec::new();

		for name in introspector.table_triggers(original).await? {
			if self.naming.is_own_trigger(&name) {
				continue;
			}
			let statement = introspector
				.show_create_trigger(&original.schema, &name)
				.await?;
			let statement = retarget_trigger(&statement, shadow).ok_or_else(|| {
				AlterError::Introspection {
					context: format!(
						"cannot find the table reference in trigger `{}`; cutover not started",
						name
					),
					source: None,
				}
			})?;
			tracing::debug!(trigger = %name, sql = %statement, "Captured trigger");
			captured.push(CapturedTrigger { name, statement });
		}

		Ok(captured)
	}

	async fn execute(&self, step: CutoverStep, original_dropped: bool, sql: &str) -> Result<()> {
		tracing::debug!(%step, sql, "Cutover statement");
		self.conn
			.execute(sql, vec![])
			.await
			.map_err(|source| AlterError::Cutover {
				step,
				original_dropped,
				source,
			})?;
		Ok(())
	}

	/// Session-scoped and harmless to leave off, so failure is only logged
	async fn enable_foreign_key_checks(&self) {
		if let Err(e) = self.conn.execute("SET foreign_key_checks = 1", vec![]).await {
			tracing::warn!(step = %CutoverStep::EnableForeignKeyChecks, error = %e, "Could not re-enable foreign key checks");
		}
	}
}
