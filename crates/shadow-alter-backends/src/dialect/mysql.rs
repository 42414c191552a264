//! MySQL dialect implementation

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use sqlx::{
	Column, Connection, Executor, MySql, MySqlConnection, MySqlPool, Row as SqlxRow, ValueRef,
	mysql::{MySqlArguments, MySqlPoolOptions, MySqlRow},
	query::Query,
};
use tokio::sync::Mutex;

use crate::{
	backend::DatabaseBackend,
	error::{DatabaseError, Result},
	types::{QueryResult, QueryValue, Row, TypedRow, ValueKind},
};

/// Quote MySQL identifier (backtick escaping)
///
/// # Example
///
/// ```rust
/// # use shadow_alter_backends::dialect::quote_identifier;
/// assert_eq!(quote_identifier("users"), "`users`");
/// assert_eq!(quote_identifier("we`ird"), "`we``ird`");
/// ```
pub fn quote_identifier(name: &str) -> String {
	format!("`{}`", name.replace('`', "``"))
}

/// MySQL database backend
///
/// Holds one session connection for every statement and a single-connection
/// pool that only serves streaming reads. Parameterless statements go over the
/// text protocol because MySQL rejects trigger DDL as a prepared statement.
pub struct MySqlBackend {
	// Boxed so the guard hands out a plain `&mut MySqlConnection` executor
	session: Mutex<Box<MySqlConnection>>,
	reader: MySqlPool,
}

impl MySqlBackend {
	pub async fn connect(url: &str) -> Result<Self> {
		let session = MySqlConnection::connect(url).await?;
		let reader = MySqlPoolOptions::new()
			.max_connections(1)
			.connect(url)
			.await?;
		Ok(Self {
			session: Mutex::new(Box::new(session)),
			reader,
		})
	}

	fn bind_value<'q>(
		query: Query<'q, MySql, MySqlArguments>,
		value: QueryValue,
	) -> Query<'q, MySql, MySqlArguments> {
		match value {
			QueryValue::Null => query.bind(None::<i32>),
			QueryValue::Int(i) => query.bind(i),
			QueryValue::UInt(u) => query.bind(u),
			QueryValue::Float(f) => query.bind(f),
			QueryValue::Double(d) => query.bind(d),
			// Raw literals only reach a bind when they failed the inline check
			QueryValue::String(s) | QueryValue::Raw(s) | QueryValue::Json(s) => query.bind(s),
			QueryValue::Bytes(b) => query.bind(b),
		}
	}

	fn build_query(sql: &str, params: Vec<QueryValue>) -> Query<'_, MySql, MySqlArguments> {
		params
			.into_iter()
			.fold(sqlx::query(sql), |query, value| Self::bind_value(query, value))
	}

	fn convert_row(mysql_row: &MySqlRow) -> Result<Row> {
		let mut row = Row::new();
		for column in mysql_row.columns() {
			let index = column.ordinal();
			let column_name = column.name().to_string();
			if mysql_row.try_get_raw(index)?.is_null() {
				row.insert(column_name, QueryValue::Null);
			} else if let Ok(value) = mysql_row.try_get::<i64, _>(index) {
				row.insert(column_name, QueryValue::Int(value));
			} else if let Ok(value) = mysql_row.try_get::<u64, _>(index) {
				row.insert(column_name, QueryValue::UInt(value));
			} else if let Ok(value) = mysql_row.try_get::<f64, _>(index) {
				row.insert(column_name, QueryValue::Double(value));
			} else if let Ok(value) = mysql_row.try_get::<String, _>(index) {
				row.insert(column_name, QueryValue::String(value));
			} else if let Ok(value) = mysql_row.try_get_unchecked::<Vec<u8>, _>(index) {
				// MySQL 8.0 information_schema returns binary collation columns that
				// sqlx reports as LONGBLOB. Attempt UTF-8 conversion to recover string data.
				match String::from_utf8(value) {
					Ok(s) => row.insert(column_name, QueryValue::String(s)),
					Err(e) => row.insert(column_name, QueryValue::Bytes(e.into_bytes())),
				};
			} else {
				return Err(DatabaseError::TypeError(format!(
					"Cannot decode column {} of type {}",
					column.name(),
					column.type_info()
				)));
			}
		}
		Ok(row)
	}
}

/// Decode a row positionally against its slot layout
pub fn decode_typed(mysql_row: &MySqlRow, kinds: &[ValueKind]) -> Result<TypedRow> {
	if mysql_row.len() != kinds.len() {
		return Err(DatabaseError::LayoutMismatch {
			expected: kinds.len(),
			actual: mysql_row.len(),
		});
	}

	let mut values = Vec::with_capacity(kinds.len());
	for (index, kind) in kinds.iter().enumerate() {
		if mysql_row.try_get_raw(index)?.is_null() {
			values.push(QueryValue::Null);
			continue;
		}
		let value = match kind {
			ValueKind::Int {
				unsigned: false, ..
			} => QueryValue::Int(mysql_row.try_get::<i64, _>(index)?),
			ValueKind::Int { unsigned: true, .. } => {
				QueryValue::UInt(mysql_row.try_get::<u64, _>(index)?)
			}
			ValueKind::Float => QueryValue::Float(mysql_row.try_get::<f32, _>(index)?),
			ValueKind::Double => QueryValue::Double(mysql_row.try_get::<f64, _>(index)?),
			ValueKind::Raw => QueryValue::Raw(mysql_row.try_get_unchecked::<String, _>(index)?),
			ValueKind::Temporal | ValueKind::Text => {
				QueryValue::String(mysql_row.try_get_unchecked::<String, _>(index)?)
			}
			ValueKind::Binary => QueryValue::Bytes(mysql_row.try_get_unchecked::<Vec<u8>, _>(index)?),
			ValueKind::Json => QueryValue::Json(mysql_row.try_get_unchecked::<String, _>(index)?),
		};
		values.push(value);
	}
	Ok(values)
}

#[async_trait]
impl DatabaseBackend for MySqlBackend {
	async fn execute(&self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult> {
		tracing::debug!(sql, params = params.len(), "execute");
		let mut conn = self.session.lock().await;
		let result = if params.is_empty() {
			Executor::execute(conn.as_mut(), sqlx::raw_sql(sql)).await?
		} else {
			Executor::execute(conn.as_mut(), Self::build_query(sql, params)).await?
		};
		Ok(QueryResult {
			rows_affected: result.rows_affected(),
		})
	}

	async fn fetch_all(&self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>> {
		tracing::debug!(sql, params = params.len(), "fetch_all");
		let mut conn = self.session.lock().await;
		let mysql_rows = if params.is_empty() {
			Executor::fetch_all(conn.as_mut(), sqlx::raw_sql(sql)).await?
		} else {
			Executor::fetch_all(conn.as_mut(), Self::build_query(sql, params)).await?
		};
		mysql_rows.iter().map(Self::convert_row).collect()
	}

	fn fetch_stream<'a>(
		&'a self,
		sql: &'a str,
		params: Vec<QueryValue>,
		kinds: &'a [ValueKind],
	) -> BoxStream<'a, Result<TypedRow>> {
		tracing::debug!(sql, params = params.len(), "fetch_stream");
		let rows = if params.is_empty() {
			sqlx::raw_sql(sql).fetch(&self.reader)
		} else {
			Self::build_query(sql, params).fetch(&self.reader)
		};
		rows.map(move |row| decode_typed(&row?, kinds)).boxed()
	}
}
