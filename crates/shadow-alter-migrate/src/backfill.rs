//! Adaptive chunked backfill
//!
//! A reader task streams the primary key of the original table, one keyset
//! page at a time, into a bounded channel. The writer drains the channel and
//! copies each page server side with `INSERT IGNORE ... SELECT` over the key
//! range the page covers, timing every copy and feeding the duration to a
//! [`BatchSizer`] that picks the size of the next page.
//!
//! Row values are read by the copy statement itself, so a row deleted or
//! moved after its key was read is never resurrected in the shadow table, and
//! the statement size does not depend on row width.
//!
//! The reader starts the next fetch as soon as the current page is queued, so
//! a new batch size takes effect on the first fetch issued after the
//! measurement.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use shadow_alter_backends::{DatabaseConnection, QueryValue, TypedRow, ValueKind, quote_identifier};
use shadow_alter_conf::MigrationSettings;
use tokio::sync::mpsc;

use crate::error::{AlterError, Result};
use crate::introspect::TableRef;
use crate::reconcile::{ProjectedColumn, Reconciliation};
use crate::shadow::column_list;

/// Strategy choosing the next batch size from the last insert duration
pub trait BatchSizer: Send {
	fn current(&self) -> usize;

	/// Record how long the last batch took and return the next batch size
	fn observe(&mut self, elapsed: Duration) -> usize;
}

/// Proportional controller with damped growth
///
/// A batch slower than the target shrinks the next one by `target / elapsed`.
/// A faster batch grows it by a tenth of the full proportional increase.
#[derive(Debug, Clone, PartialEq)]
pub struct ProportionalBatchSizer {
	size: usize,
	target: Duration,
	min: usize,
	max: usize,
}

impl ProportionalBatchSizer {
	pub fn new(initial: usize, target: Duration, min: usize, max: usize) -> Self {
		let min = min.max(1);
		let max = max.max(min);
		Self {
			size: initial.clamp(min, max),
			target,
			min,
			max,
		}
	}

	pub fn from_settings(settings: &MigrationSettings) -> Self {
		Self::new(
			settings.initial_batch_size,
			settings.target_batch_duration(),
			settings.min_batch_size,
			settings.max_batch_size,
		)
	}
}

impl BatchSizer for ProportionalBatchSizer {
	fn current(&self) -> usize {
		self.size
	}

	fn observe(&mut self, elapsed: Duration) -> usize {
		let elapsed = elapsed.max(Duration::from_micros(1));
		let ratio = self.target.as_secs_f64() / elapsed.as_secs_f64();
		let size = self.size as f64;

		let next = if elapsed > self.target {
			(size * ratio).floor() as usize
		} else if elapsed < self.target {
			let gap = size * ratio - size;
			self.size.saturating_add((gap / 10.0).floor() as usize)
		} else {
			self.size
		};

		self.size = next.clamp(self.min, self.max);
		self.size
	}
}

/// Constant batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBatchSizer(pub usize);

impl BatchSizer for FixedBatchSizer {
	fn current(&self) -> usize {
		self.0
	}

	fn observe(&mut self, _elapsed: Duration) -> usize {
		self.0
	}
}

/// Receives backfill progress
///
/// The total is sampled once before copying starts and may be stale by the
/// end of the run.
pub trait BackfillObserver: Send + Sync {
	fn started(&self, _total_rows: u64) {}

	fn advanced(&self, _rows: u64) {}

	fn finished(&self, _report: &BackfillReport) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BackfillObserver for NoopObserver {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
	pub rows_copied: u64,
	/// Non-empty batches inserted
	pub batches: usize,
	pub fetches: usize,
	pub elapsed: Duration,
}

/// Statements used to move rows from the original table to the shadow table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
	source: TableRef,
	target: TableRef,
	columns: Vec<ProjectedColumn>,
	key: Vec<ProjectedColumn>,
	key_kinds: Vec<ValueKind>,
}

impl CopyPlan {
	pub fn new(source: TableRef, target: TableRef, reconciliation: &Reconciliation) -> Self {
		let key = reconciliation.key.clone();
		Self {
			source,
			target,
			columns: reconciliation.projection.clone(),
			key_kinds: key.iter().map(|c| c.kind).collect(),
			key,
		}
	}

	/// Slot layout of the rows the reader streams
	pub fn key_kinds(&self) -> &[ValueKind] {
		&self.key_kinds
	}

	/// Keyset page of primary key values; `after` is the last key already read
	pub fn select_statement(&self, after: Option<&[QueryValue]>, limit: usize) -> (String, Vec<QueryValue>) {
		let select = self
			.key
			.iter()
			.map(|c| c.kind.select_expression(&quote_identifier(&c.old)))
			.collect::<Vec<_>>()
			.join(", ");

		let mut params = Vec::new();
		let filter = match after {
			Some(values) => format!(" WHERE {}", self.key_bound(">", values, &mut params)),
			None => String::new(),
		};

		let sql = format!(
			"SELECT {} FROM {}{} ORDER BY {} LIMIT {}",
			select,
			self.source.quoted(),
			filter,
			self.key_columns(),
			limit
		);
		(sql, params)
	}

	/// Copy every row with a key in `(after, upto]` into the shadow table
	///
	/// Without `after` the range is open below. Renamed columns are selected
	/// under their old name and dropped ones are left out.
	pub fn copy_statement(&self, after: Option<&[QueryValue]>, upto: &[QueryValue]) -> (String, Vec<QueryValue>) {
		let mut params = Vec::new();
		let mut filter = Vec::with_capacity(2);
		if let Some(values) = after {
			filter.push(self.key_bound(">", values, &mut params));
		}
		filter.push(self.key_bound("<=", upto, &mut params));

		let sql = format!(
			"INSERT IGNORE INTO {} ({}) SELECT {} FROM {} WHERE {} ORDER BY {}",
			self.target.quoted(),
			column_list(self.columns.iter().map(|c| c.new.as_str())),
			column_list(self.columns.iter().map(|c| c.old.as_str())),
			self.source.quoted(),
			filter.join(" AND "),
			self.key_columns()
		);
		(sql, params)
	}

	fn key_columns(&self) -> String {
		column_list(self.key.iter().map(|c| c.old.as_str()))
	}

	/// Key comparison against `values`, a row constructor for composite keys
	fn key_bound(&self, op: &str, values: &[QueryValue], params: &mut Vec<QueryValue>) -> String {
		let bounds = values
			.iter()
			.zip(&self.key_kinds)
			.map(|(value, kind)| value_sql(value.clone(), *kind, params))
			.collect::<Vec<_>>();
		if bounds.len() == 1 {
			format!("{} {} {}", self.key_columns(), op, bounds[0])
		} else {
			format!("({}) {} ({})", self.key_columns(), op, bounds.join(", "))
		}
	}
}

/// SQL for one value: inlined for NULL and plain numeric literals, else bound
fn value_sql(value: QueryValue, kind: ValueKind, params: &mut Vec<QueryValue>) -> String {
	match value {
		QueryValue::Null => "NULL".to_string(),
		QueryValue::Raw(ref text) if value.is_numeric_literal() => text.clone(),
		value => {
			params.push(value);
			kind.placeholder().to_string()
		}
	}
}

enum Feed {
	Key(TypedRow),
	BatchEnd,
}

/// Copies every row present in the original table into the shadow table
#[derive(Debug, Clone)]
pub struct Backfill {
	conn: DatabaseConnection,
	plan: Arc<CopyPlan>,
	row_buffer_size: usize,
}

impl Backfill {
	pub fn new(conn: DatabaseConnection, plan: CopyPlan, row_buffer_size: usize) -> Self {
		Self {
			conn,
			plan: Arc::new(plan),
			row_buffer_size: row_buffer_size.max(1),
		}
	}

	pub async fn run(
		&self,
		sizer: &mut dyn BatchSizer,
		total_rows: u64,
		observer: &dyn BackfillObserver,
	) -> Result<BackfillReport> {
		let started = Instant::now();
		observer.started(total_rows);
		tracing::info!(
			source = %self.plan.source,
			target = %self.plan.target,
			total_rows,
			"Copying rows"
		);

		let batch_size = Arc::new(AtomicUsize::new(sizer.current().max(1)));
		let (tx, mut rx) = mpsc::channel(self.row_buffer_size);
		let reader = tokio::spawn(read_pages(
			self.conn.clone(),
			Arc::clone(&self.plan),
			Arc::clone(&batch_size),
			tx,
		));

		let mut report = BackfillReport::default();
		// Upper bound of the last copied page
		let mut copied_upto: Option<TypedRow> = None;
		let mut last_key: Option<TypedRow> = None;
		let mut count = 0usize;
		while let Some(feed) = rx.recv().await {
			match feed {
				Feed::Key(key) => {
					last_key = Some(key);
					count += 1;
				}
				Feed::BatchEnd => {
					let Some(upto) = last_key.take() else {
						continue;
					};
					let copy_started = Instant::now();
					if let Err(e) = self.copy(copied_upto.as_deref(), &upto).await {
						reader.abort();
						return Err(e);
					}
					let elapsed = copy_started.elapsed();
					let next = sizer.observe(elapsed).max(1);
					batch_size.store(next, Ordering::Release);

					report.rows_copied += count as u64;
					report.batches += 1;
					observer.advanced(count as u64);
					tracing::debug!(rows = count, ?elapsed, next_batch = next, "Copied batch");
					copied_upto = Some(upto);
					count = 0;
				}
			}
		}

		report.fetches = match reader.await {
			Ok(fetches) => fetches?,
			Err(e) => {
				return Err(AlterError::Backfill {
					context: format!("reader task failed: {}", e),
					source: None,
				});
			}
		};
		report.elapsed = started.elapsed();

		observer.finished(&report);
		tracing::info!(
			rows = report.rows_copied,
			batches = report.batches,
			elapsed = ?report.elapsed,
			"Backfill complete"
		);
		Ok(report)
	}

	async fn copy(&self, after: Option<&[QueryValue]>, upto: &[QueryValue]) -> Result<()> {
		let (sql, params) = self.plan.copy_statement(after, upto);
		self.conn
			.execute(&sql, params)
			.await
			.map_err(|e| AlterError::backfill(format!("inserting into {}", self.plan.target), e))?;
		Ok(())
	}
}

/// Stream keyset pages of keys into `tx`; returns the number of fetches issued
///
/// A page shorter than its limit is the last one. Rows written after it are
/// carried by the triggers.
async fn read_pages(
	conn: DatabaseConnection,
	plan: Arc<CopyPlan>,
	batch_size: Arc<AtomicUsize>,
	tx: mpsc::Sender<Feed>,
) -> Result<usize> {
	let mut after: Option<TypedRow> = None;
	let mut fetches = 0;

	loop {
		let limit = batch_size.load(Ordering::Acquire).max(1);
		let (sql, params) = plan.select_statement(after.as_deref(), limit);
		fetches += 1;

		let mut fetched = 0;
		let mut keys = conn.fetch_stream(&sql, params, plan.key_kinds());
		while let Some(key) = keys.next().await {
			let key = key.map_err(|e| AlterError::backfill(format!("reading from {}", plan.source), e))?;
			after = Some(key.clone());
			fetched += 1;
			if tx.send(Feed::Key(key)).await.is_err() {
				return Ok(fetches);
			}
		}
		drop(keys);

		if tx.send(Feed::BatchEnd).await.is_err() || fetched < limit {
			return Ok(fetches);
		}
	}
}
