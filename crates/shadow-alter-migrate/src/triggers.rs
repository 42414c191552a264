//! Change-capture triggers
//!
//! Three `AFTER` triggers on the original table mirror every write into the
//! shadow table. Inserts use `INSERT IGNORE` and updates and deletes match by
//! primary key, so a row that the backfill also copies converges to one copy
//! with the latest values whichever side gets there first.

use std::fmt;

use shadow_alter_backends::{DatabaseConnection, quote_identifier};

use crate::error::{AlterError, Result};
use crate::introspect::TableRef;
use crate::reconcile::Reconciliation;
use crate::shadow::{ShadowNaming, column_list};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerEvent {
	Insert,
	Update,
	Delete,
}

impl TriggerEvent {
	pub const ALL: [TriggerEvent; 3] = [TriggerEvent::Insert, TriggerEvent::Update, TriggerEvent::Delete];

	pub fn as_str(&self) -> &'static str {
		match self {
			TriggerEvent::Insert => "insert",
			TriggerEvent::Update => "update",
			TriggerEvent::Delete => "delete",
		}
	}
}

impl fmt::Display for TriggerEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A synthesized trigger, ready to install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDefinition {
	pub name: String,
	pub event: TriggerEvent,
	pub drop_sql: String,
	pub create_sql: String,
}

/// Builds the insert, update and delete triggers for one run
#[derive(Debug, Clone)]
pub struct TriggerSynthesizer<'a> {
	original: &'a TableRef,
	shadow: &'a TableRef,
	reconciliation: &'a Reconciliation,
	naming: &'a ShadowNaming,
}

impl<'a> TriggerSynthesizer<'a> {
	pub fn new(
		original: &'a TableRef,
		shadow: &'a TableRef,
		reconciliation: &'a Reconciliation,
		naming: &'a ShadowNaming,
	) -> Self {
		Self {
			original,
			shadow,
			reconciliation,
			naming,
		}
	}

	pub fn definitions(&self) -> Vec<TriggerDefinition> {
		TriggerEvent::ALL
			.into_iter()
			.map(|event| self.definition(event))
			.collect()
	}

	pub fn definition(&self, event: TriggerEvent) -> TriggerDefinition {
		let name = self.naming.trigger_name(self.original, event);
		let qualified = format!(
			"{}.{}",
			quote_identifier(&self.original.schema),
			quote_identifier(&name)
		);
		let body = match event {
			TriggerEvent::Insert => self.insert_ignore(),
			TriggerEvent::Update => format!(
				"BEGIN\n{};\n{};\n{};\nEND",
				self.delete_moved_row(),
				self.insert_ignore(),
				self.update_by_key()
			),
			TriggerEvent::Delete => self.delete_by_key(),
		};

		TriggerDefinition {
			drop_sql: format!("DROP TRIGGER IF EXISTS {}", qualified),
			create_sql: format!(
				"CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW\n{}",
				qualified,
				event.as_str().to_ascii_uppercase(),
				self.original.quoted(),
				body
			),
			name,
			event,
		}
	}

	fn insert_ignore(&self) -> String {
		let values = self
			.reconciliation
			.kept_old()
			.map(|old| format!("NEW.{}", quote_identifier(old)))
			.collect::<Vec<_>>()
			.join(", ");
		format!(
			"INSERT IGNORE INTO {} ({}) VALUES ({})",
			self.shadow.quoted(),
			column_list(self.reconciliation.kept_new()),
			values
		)
	}

	fn update_by_key(&self) -> String {
		let assignments = self
			.reconciliation
			.projection
			.iter()
			.map(|c| format!("{} = NEW.{}", quote_identifier(&c.new), quote_identifier(&c.old)))
			.collect::<Vec<_>>()
			.join(", ");
		format!(
			"UPDATE {} SET {} WHERE {}",
			self.shadow.quoted(),
			assignments,
			self.key_match("OLD")
		)
	}

	fn delete_by_key(&self) -> String {
		format!(
			"DELETE FROM {} WHERE {}",
			self.shadow.quoted(),
			self.key_match("OLD")
		)
	}

	/// Remove the shadow row under the old key when an update moves the key
	fn delete_moved_row(&self) -> String {
		let unchanged = self
			.reconciliation
			.old_key()
			.map(|old| {
				let column = quote_identifier(old);
				format!("OLD.{} <=> NEW.{}", column, column)
			})
			.collect::<Vec<_>>()
			.join(" AND ");
		format!(
			"DELETE FROM {} WHERE NOT ({}) AND {}",
			self.shadow.quoted(),
			unchanged,
			self.key_match("OLD")
		)
	}

	/// Shadow key columns equal to the original row's key
	fn key_match(&self, row: &str) -> String {
		self.reconciliation
			.key
			.iter()
			.map(|c| {
				format!(
					"{} = {}.{}",
					quote_identifier(&c.new),
					row,
					quote_identifier(&c.old)
				)
			})
			.collect::<Vec<_>>()
			.join(" AND ")
	}
}

/// Drop and create each trigger
pub async fn install(conn: &DatabaseConnection, definitions: &[TriggerDefinition]) -> Result<()> {
	for definition in definitions {
		tracing::info!(trigger = %definition.name, event = %definition.event, "Adding trigger");
		for sql in [&definition.drop_sql, &definition.create_sql] {
			tracing::debug!(sql = %sql, "Trigger DDL");
			conn.execute(sql, vec![])
				.await
				.map_err(|e| AlterError::ddl(sql.as_str(), e))?;
		}
	}
	Ok(())
}
