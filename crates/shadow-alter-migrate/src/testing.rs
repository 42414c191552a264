//! Scripted in-memory backend for unit tests
//!
//! Catalog queries are answered from responders matched by SQL substring (the
//! most recently registered match wins). Streaming reads page through a set of
//! source rows keyed by an integer first column, honouring the `LIMIT` and the
//! keyset bound of each query. `INSERT IGNORE ... SELECT` copies the source
//! rows inside its key range into an in-memory shadow table. Every statement
//! is recorded.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use shadow_alter_backends::{
	DatabaseBackend, DatabaseConnection, DatabaseError, QueryResult, QueryValue, Row, TypedRow,
	ValueKind,
};

type Statement = (String, Vec<QueryValue>);

struct Responder {
	pattern: String,
	param: Option<QueryValue>,
	rows: Vec<Row>,
}

#[derive(Default)]
pub struct FakeBackend {
	responders: Mutex<Vec<Responder>>,
	source_rows: Mutex<Vec<TypedRow>>,
	shadow_rows: Mutex<Vec<TypedRow>>,
	deletes_after_read: Mutex<Vec<i64>>,
	failures: Mutex<Vec<String>>,
	executed: Mutex<Vec<Statement>>,
	fetched: Mutex<Vec<Statement>>,
	streamed: Mutex<Vec<Statement>>,
}

impl FakeBackend {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn connection(self: &Arc<Self>) -> DatabaseConnection {
		DatabaseConnection::new(self.clone())
	}

	/// Answer queries containing `pattern` with `rows`
	pub fn on_query(&self, pattern: &str, rows: Vec<Row>) {
		self.responders.lock().push(Responder {
			pattern: pattern.to_string(),
			param: None,
			rows,
		});
	}

	/// Like [`on_query`](Self::on_query), but only when `param` is bound
	pub fn on_query_for(&self, pattern: &str, param: &str, rows: Vec<Row>) {
		self.responders.lock().push(Responder {
			pattern: pattern.to_string(),
			param: Some(QueryValue::from(param)),
			rows,
		});
	}

	/// Rows served by streaming reads, ordered by their integer first column
	pub fn set_source_rows(&self, rows: Vec<TypedRow>) {
		*self.source_rows.lock() = rows;
	}

	/// Rows copied into the shadow table, in copy order
	pub fn shadow_rows(&self) -> Vec<TypedRow> {
		self.shadow_rows.lock().clone()
	}

	/// Delete the source row with `key` right after the next page is read
	///
	/// The delete is mirrored into the shadow table the way the delete
	/// trigger would.
	pub fn delete_after_next_read(&self, key: i64) {
		self.deletes_after_read.lock().push(key);
	}

	/// Fail every statement containing `pattern`
	pub fn fail_on(&self, pattern: &str) {
		self.failures.lock().push(pattern.to_string());
	}

	pub fn executed(&self) -> Vec<Statement> {
		self.executed.lock().clone()
	}

	pub fn executed_sql(&self) -> Vec<String> {
		self.executed.lock().iter().map(|(sql, _)| sql.clone()).collect()
	}

	pub fn fetched(&self) -> Vec<Statement> {
		self.fetched.lock().clone()
	}

	pub fn streamed(&self) -> Vec<Statement> {
		self.streamed.lock().clone()
	}

	fn check_failure(&self, sql: &str) -> Result<(), DatabaseError> {
		if self.failures.lock().iter().any(|p| sql.contains(p.as_str())) {
			return Err(DatabaseError::SqlError(sqlx_error(sql)));
		}
		Ok(())
	}

	fn respond(&self, sql: &str, params: &[QueryValue]) -> Vec<Row> {
		self.responders
			.lock()
			.iter()
			.rev()
			.find(|r| {
				sql.contains(r.pattern.as_str())
					&& r.param.as_ref().is_none_or(|p| params.contains(p))
			})
			.map(|r| r.rows.clone())
			.unwrap_or_default()
	}

	fn page(&self, sql: &str, params: &[QueryValue]) -> Vec<TypedRow> {
		let limit = sql
			.rsplit("LIMIT ")
			.next()
			.and_then(|s| s.trim().parse::<usize>().ok())
			.unwrap_or(usize::MAX);
		let after = match params.first() {
			Some(QueryValue::Int(i)) => Some(*i),
			_ => None,
		};
		self.source_rows
			.lock()
			.iter()
			.filter(|row| match (after, int_key(row)) {
				(Some(bound), Some(key)) => key > bound,
				_ => true,
			})
			.take(limit)
			.cloned()
			.collect()
	}

	fn apply_deletes(&self) {
		let keys: Vec<i64> = self.deletes_after_read.lock().drain(..).collect();
		if keys.is_empty() {
			return;
		}
		let gone = |row: &TypedRow| int_key(row).is_some_and(|k| keys.contains(&k));
		self.source_rows.lock().retain(|row| !gone(row));
		self.shadow_rows.lock().retain(|row| !gone(row));
	}

	/// Copy source rows with a key in `(lower, upper]`, skipping keys already present
	fn copy_range(&self, sql: &str, params: &[QueryValue]) -> u64 {
		let bound = |i: usize| match params.get(i) {
			Some(QueryValue::Int(v)) => Some(*v),
			_ => None,
		};
		let (lower, upper) = if sql.contains(" > ") {
			(bound(0), bound(1))
		} else {
			(None, bound(0))
		};

		let mut shadow = self.shadow_rows.lock();
		let mut copied = 0;
		for row in self.source_rows.lock().iter() {
			let Some(key) = int_key(row) else { continue };
			let in_range = lower.is_none_or(|lo| key > lo) && upper.is_none_or(|hi| key <= hi);
			if in_range && !shadow.iter().any(|s| int_key(s) == Some(key)) {
				shadow.push(row.clone());
				copied += 1;
			}
		}
		copied
	}
}

fn int_key(row: &TypedRow) -> Option<i64> {
	match row.first() {
		Some(QueryValue::Int(key)) => Some(*key),
		_ => None,
	}
}

fn sqlx_error(sql: &str) -> sqlx::Error {
	sqlx::Error::Protocol(format!("injected failure: {}", sql))
}

#[async_trait]
impl DatabaseBackend for FakeBackend {
	async fn execute(&self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult, DatabaseError> {
		self.executed.lock().push((sql.to_string(), params.clone()));
		self.check_failure(sql)?;
		let rows_affected = if sql.starts_with("INSERT IGNORE INTO") && sql.contains(" SELECT ") {
			self.copy_range(sql, &params)
		} else {
			0
		};
		Ok(QueryResult { rows_affected })
	}

	async fn fetch_all(&self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>, DatabaseError> {
		self.check_failure(sql)?;
		let rows = self.respond(sql, &params);
		self.fetched.lock().push((sql.to_string(), params));
		Ok(rows)
	}

	fn fetch_stream<'a>(
		&'a self,
		sql: &'a str,
		params: Vec<QueryValue>,
		kinds: &'a [ValueKind],
	) -> BoxStream<'a, Result<TypedRow, DatabaseError>> {
		if let Err(e) = self.check_failure(sql) {
			return stream::once(async move { Err(e) }).boxed();
		}
		let rows: Vec<TypedRow> = self
			.page(sql, &params)
			.into_iter()
			.map(|row| row.into_iter().take(kinds.len()).collect())
			.collect();
		self.streamed.lock().push((sql.to_string(), params));
		self.apply_deletes();
		stream::iter(rows.into_iter().map(Ok)).boxed()
	}
}

/// Catalog row built from `(column, value)` pairs
pub fn row<const N: usize, V: Into<QueryValue>>(pairs: [(&str, V); N]) -> Row {
	pairs.into_iter().collect()
}

/// A row of the `information_schema.columns` query
pub fn catalog_column(
	name: &str,
	position: u32,
	data_type: &str,
	column_type: &str,
	generation_expression: &str,
) -> Row {
	[
		("name", QueryValue::from(name)),
		("position", QueryValue::UInt(position as u64)),
		("data_type", QueryValue::from(data_type)),
		("column_type", QueryValue::from(column_type)),
		("generation_expression", QueryValue::from(generation_expression)),
	]
	.into_iter()
	.collect()
}
