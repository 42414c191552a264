//! Catalog introspection for MySQL tables
//!
//! Column metadata comes from `information_schema.COLUMNS`, the primary key
//! from `information_schema.STATISTICS` in index order. Result columns are
//! aliased explicitly because MySQL 8 returns catalog column names upper-cased.

use std::collections::HashSet;
use std::fmt;

use shadow_alter_backends::{DatabaseConnection, QueryValue, ValueKind, quote_identifier};

use crate::error::{AlterError, Result};

/// Schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
	pub schema: String,
	pub name: String,
}

impl TableRef {
	pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			schema: schema.into(),
			name: name.into(),
		}
	}

	/// `` `schema`.`name` ``
	pub fn quoted(&self) -> String {
		format!(
			"{}.{}",
			quote_identifier(&self.schema),
			quote_identifier(&self.name)
		)
	}

	/// The same schema with another table name
	pub fn sibling(&self, name: impl Into<String>) -> Self {
		Self::new(self.schema.clone(), name)
	}
}

impl fmt::Display for TableRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.schema, self.name)
	}
}

/// One column of a table snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
	pub name: String,
	pub ordinal_position: u32,
	/// Base type, e.g. `int`
	pub data_type: String,
	/// Full type with modifiers, e.g. `int unsigned`
	pub column_type: String,
	/// Empty unless the column is computed
	pub generation_expression: String,
	pub is_primary_key: bool,
}

impl Column {
	/// Computed columns are never written to
	pub fn is_generated(&self) -> bool {
		!self.generation_expression.trim().is_empty()
	}

	/// Row slot used to move this column's values
	pub fn value_kind(&self) -> Result<ValueKind> {
		ValueKind::from_column(&self.data_type, &self.column_type).map_err(|e| {
			AlterError::Introspection {
				context: format!("column `{}` cannot be copied", self.name),
				source: Some(e),
			}
		})
	}
}

/// Columns and primary key of one table, ordered by ordinal position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
	pub table: TableRef,
	pub columns: Vec<Column>,
	/// Primary key column names in index order
	pub primary_key: Vec<String>,
}

impl TableSchema {
	pub fn column(&self, name: &str) -> Option<&Column> {
		self.columns
			.iter()
			.find(|c| c.name.eq_ignore_ascii_case(name))
	}
}

/// Reads table metadata over a [`DatabaseConnection`]
#[derive(Debug, Clone)]
pub struct MySqlIntrospector {
	conn: DatabaseConnection,
}

impl MySqlIntrospector {
	pub fn new(conn: DatabaseConnection) -> Self {
		Self { conn }
	}

	/// The session's default schema
	pub async fn current_database(&self) -> Result<String> {
		let row = self
			.conn
			.fetch_optional("select database() as db", vec![])
			.await
			.map_err(|e| AlterError::introspection("reading current database", e))?;

		let db: Option<String> = match row {
			Some(row) => row
				.get_opt("db")
				.map_err(|e| AlterError::introspection("reading current database", e))?,
			None => None,
		};
		db.ok_or_else(|| AlterError::Introspection {
			context: "no schema given and the connection has no default database".to_string(),
			source: None,
		})
	}

	/// Whether the catalog exposes `GENERATION_EXPRESSION` (MySQL 5.7+)
	pub async fn supports_generation_expression(&self) -> Result<bool> {
		let sql = "select count(*) as n from information_schema.columns \
			where table_schema = 'information_schema' and table_name = 'COLUMNS' \
			and column_name = 'GENERATION_EXPRESSION'";
		let rows = self
			.conn
			.fetch_all(sql, vec![])
			.await
			.map_err(|e| AlterError::introspection("probing catalog capabilities", e))?;
		let count: i64 = match rows.first() {
			Some(row) => row
				.get("n")
				.map_err(|e| AlterError::introspection("probing catalog capabilities", e))?,
			None => 0,
		};
		Ok(count > 0)
	}

	/// Columns of `table` ordered by ordinal position, primary key flagged
	pub async fn table_schema(&self, table: &TableRef) -> Result<TableSchema> {
		let context = || format!("reading columns of {}", table);

		let generation = if self.supports_generation_expression().await? {
			"generation_expression"
		} else {
			"''"
		};
		let sql = format!(
			"select column_name as name, ordinal_position as position, \
			data_type as data_type, column_type as column_type, \
			{} as generation_expression \
			from information_schema.columns \
			where table_schema = ? and table_name = ? \
			order by ordinal_position",
			generation
		);
		let rows = self
			.conn
			.fetch_all(&sql, table_params(table))
			.await
			.map_err(|e| AlterError::introspection(context(), e))?;

		if rows.is_empty() {
			return Err(AlterError::Introspection {
				context: format!("table {} does not exist", table),
				source: None,
			});
		}

		let primary_key = self.primary_key(table).await?;
		let key_set: HashSet<&str> = primary_key.iter().map(String::as_str).collect();

		let mut columns = Vec::with_capacity(rows.len());
		for row in rows {
			let name: String = row
				.get("name")
				.map_err(|e| AlterError::introspection(context(), e))?;
			let is_primary_key = key_set.contains(name.as_str());
			columns.push(Column {
				ordinal_position: row
					.get("position")
					.map_err(|e| AlterError::introspection(context(), e))?,
				data_type: row
					.get("data_type")
					.map_err(|e| AlterError::introspection(context(), e))?,
				column_type: row
					.get("column_type")
					.map_err(|e| AlterError::introspection(context(), e))?,
				generation_expression: row
					.get_opt("generation_expression")
					.map_err(|e| AlterError::introspection(context(), e))?
					.unwrap_or_default(),
				is_primary_key,
				name,
			});
		}

		Ok(TableSchema {
			table: table.clone(),
			columns,
			primary_key,
		})
	}

	/// Primary key column names in index order
	pub async fn primary_key(&self, table: &TableRef) -> Result<Vec<String>> {
		let sql = "select column_name as name from information_schema.statistics \
			where table_schema = ? and table_name = ? and index_name = 'PRIMARY' \
			order by seq_in_index";
		let rows = self
			.conn
			.fetch_all(sql, table_params(table))
			.await
			.map_err(|e| AlterError::introspection(format!("reading primary key of {}", table), e))?;
		rows.iter()
			.map(|row| {
				row.get("name").map_err(|e| {
					AlterError::introspection(format!("reading primary key of {}", table), e)
				})
			})
			.collect()
	}

	/// `SHOW CREATE TABLE` text
	pub async fn show_create_table(&self, table: &TableRef) -> Result<String> {
		let sql = format!("show create table {}", table.quoted());
		let row = self
			.conn
			.fetch_optional(&sql, vec![])
			.await
			.map_err(|e| AlterError::introspection(sql.clone(), e))?
			.ok_or_else(|| AlterError::Introspection {
				context: format!("table {} does not exist", table),
				source: None,
			})?;
		row.get("Create Table")
			.map_err(|e| AlterError::introspection(sql, e))
	}

	/// Row count sampled for progress reporting
	pub async fn row_count(&self, table: &TableRef) -> Result<u64> {
		let sql = format!("select count(*) as n from {}", table.quoted());
		let row = self
			.conn
			.fetch_optional(&sql, vec![])
			.await
			.map_err(|e| AlterError::introspection(sql.clone(), e))?;
		match row {
			Some(row) => row.get("n").map_err(|e| AlterError::introspection(sql, e)),
			None => Ok(0),
		}
	}

	/// Names of all triggers defined on `table`, in firing order
	pub async fn table_triggers(&self, table: &TableRef) -> Result<Vec<String>> {
		let sql = "select trigger_name as name from information_schema.triggers \
			where event_object_schema = ? and event_object_table = ? \
			order by event_manipulation, action_timing, action_order";
		let rows = self
			.conn
			.fetch_all(sql, table_params(table))
			.await
			.map_err(|e| AlterError::introspection(format!("listing triggers of {}", table), e))?;
		rows.iter()
			.map(|row| {
				row.get("name").map_err(|e| {
					AlterError::introspection(format!("listing triggers of {}", table), e)
				})
			})
			.collect()
	}

	/// Creation statement of a trigger as originally written
	pub async fn show_create_trigger(&self, schema: &str, trigger: &str) -> Result<String> {
		let sql = format!(
			"show create trigger {}.{}",
			quote_identifier(schema),
			quote_identifier(trigger)
		);
		let row = self
			.conn
			.fetch_optional(&sql, vec![])
			.await
			.map_err(|e| AlterError::introspection(sql.clone(), e))?
			.ok_or_else(|| AlterError::Introspection {
				context: format!("trigger {}.{} does not exist", schema, trigger),
				source: None,
			})?;
		row.get("SQL Original Statement")
			.map_err(|e| AlterError::introspection(sql, e))
	}
}

fn table_params(table: &TableRef) -> Vec<QueryValue> {
	vec![
		QueryValue::from(table.schema.as_str()),
		QueryValue::from(table.name.as_str()),
	]
}
