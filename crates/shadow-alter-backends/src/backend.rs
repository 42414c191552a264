//! Backend abstraction consumed by the migration core

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
	error::Result,
	types::{QueryResult, QueryValue, Row, TypedRow, ValueKind},
};

/// Database operations needed to run an online schema change
///
/// Implementations must route [`execute`](Self::execute) and the `fetch_*`
/// methods through one session so that session variables set by one statement
/// are visible to the next. [`fetch_stream`](Self::fetch_stream) may use a
/// separate read-only session; it is the only call that runs concurrently with
/// the others.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
	/// Execute a statement and report affected rows
	async fn execute(&self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult>;

	/// Fetch a complete result set
	async fn fetch_all(&self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>>;

	/// Fetch at most one row
	async fn fetch_optional(&self, sql: &str, params: Vec<QueryValue>) -> Result<Option<Row>> {
		Ok(self.fetch_all(sql, params).await?.into_iter().next())
	}

	/// Stream rows one at a time, decoded positionally against `kinds`
	///
	/// The result set is never materialized; the caller applies backpressure
	/// simply by polling the stream more slowly.
	fn fetch_stream<'a>(
		&'a self,
		sql: &'a str,
		params: Vec<QueryValue>,
		kinds: &'a [ValueKind],
	) -> BoxStream<'a, Result<TypedRow>>;
}
