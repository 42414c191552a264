//! Database connection management

use std::sync::Arc;

use futures::stream::BoxStream;

use crate::{
	backend::DatabaseBackend,
	dialect::MySqlBackend,
	error::Result,
	types::{QueryResult, QueryValue, Row, TypedRow, ValueKind},
};

/// Database connection wrapper
#[derive(Clone)]
pub struct DatabaseConnection {
	backend: Arc<dyn DatabaseBackend>,
}

impl DatabaseConnection {
	pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
		Self { backend }
	}

	pub async fn connect_mysql(url: &str) -> Result<Self> {
		let backend = MySqlBackend::connect(url).await?;
		Ok(Self {
			backend: Arc::new(backend),
		})
	}

	pub async fn execute(&self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult> {
		self.backend.execute(sql, params).await
	}

	pub async fn fetch_all(&self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>> {
		self.backend.fetch_all(sql, params).await
	}

	pub async fn fetch_optional(&self, sql: &str, params: Vec<QueryValue>) -> Result<Option<Row>> {
		self.backend.fetch_optional(sql, params).await
	}

	pub fn fetch_stream<'a>(
		&'a self,
		sql: &'a str,
		params: Vec<QueryValue>,
		kinds: &'a [ValueKind],
	) -> BoxStream<'a, Result<TypedRow>> {
		self.backend.fetch_stream(sql, params, kinds)
	}
}

impl std::fmt::Debug for DatabaseConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DatabaseConnection").finish_non_exhaustive()
	}
}
