//! Common type definitions for the MySQL backend
//!
//! Two row shapes exist:
//!
//! - [`Row`]: name-addressed values, used for catalog queries whose columns are
//!   known up front (`information_schema`, `SHOW CREATE ...`).
//! - [`TypedRow`]: position-addressed values decoded against a [`ValueKind`]
//!   layout that is built once per run from catalog metadata. The backfill
//!   fetch and insert paths both use this shape, so no per-table record type
//!   is ever generated.

use super::error::DatabaseError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Integer storage width as reported by `DATA_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntWidth {
	Tiny,
	Small,
	Medium,
	Int,
	Big,
}

/// Generic row slot for one column
///
/// Every MySQL column type the tool can copy maps onto one of these slots.
/// Integers are widened to 64 bits when decoded; the width is kept so that
/// callers can reason about the original storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
	Int { width: IntWidth, unsigned: bool },
	Float,
	Double,
	/// Exact numeric text inlined into statements without escaping
	Raw,
	/// Dates and times, transported as their canonical text form
	Temporal,
	Text,
	Binary,
	Json,
}

impl ValueKind {
	/// Map a catalog column to its row slot
	///
	/// `data_type` is the bare type (`int`, `varchar`), `column_type` the full
	/// definition carrying modifiers (`int(10) unsigned`).
	///
	/// # Examples
	///
	/// ```
	/// use shadow_alter_backends::types::{IntWidth, ValueKind};
	///
	/// let kind = ValueKind::from_column("int", "int unsigned").unwrap();
	/// assert_eq!(kind, ValueKind::Int { width: IntWidth::Int, unsigned: true });
	/// assert_eq!(ValueKind::from_column("decimal", "decimal(10,2)").unwrap(), ValueKind::Raw);
	/// assert!(ValueKind::from_column("geometry", "geometry").is_err());
	/// ```
	pub fn from_column(data_type: &str, column_type: &str) -> Result<Self, DatabaseError> {
		let unsigned = column_type.to_ascii_lowercase().ends_with("unsigned");
		let int = |width| ValueKind::Int { width, unsigned };

		let kind = match data_type.to_ascii_lowercase().as_str() {
			"tinyint" => int(IntWidth::Tiny),
			"smallint" => int(IntWidth::Small),
			"mediumint" => int(IntWidth::Medium),
			"int" | "integer" => int(IntWidth::Int),
			"bigint" => int(IntWidth::Big),
			"float" => ValueKind::Float,
			"double" | "real" => ValueKind::Double,
			"decimal" | "numeric" => ValueKind::Raw,
			"date" | "datetime" | "timestamp" | "time" | "year" => ValueKind::Temporal,
			"char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "enum"
			| "set" => ValueKind::Text,
			"binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "bit" => {
				ValueKind::Binary
			}
			"json" => ValueKind::Json,
			_ => return Err(DatabaseError::UnsupportedType(column_type.to_string())),
		};
		Ok(kind)
	}

	/// Select-list expression that reads a column into this slot
	///
	/// Exact numerics and temporals are read as text so their value survives
	/// the round trip untouched.
	pub fn select_expression(&self, quoted_column: &str) -> String {
		match self {
			ValueKind::Raw | ValueKind::Temporal => format!("cast({} as char)", quoted_column),
			_ => quoted_column.to_string(),
		}
	}

	/// Placeholder expression used when writing a value of this slot
	pub fn placeholder(&self) -> &'static str {
		match self {
			ValueKind::Json => "cast(? as json)",
			_ => "?",
		}
	}
}

/// Query value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
	Null,
	Int(i64),
	UInt(u64),
	Float(f32),
	Double(f64),
	String(String),
	Bytes(Vec<u8>),
	/// Literal SQL text, written into the statement instead of being bound
	Raw(String),
	Json(String),
}

impl QueryValue {
	pub fn is_null(&self) -> bool {
		matches!(self, QueryValue::Null)
	}

	/// Whether a `Raw` value can be inlined verbatim
	///
	/// Only plain numeric literals qualify; anything else is bound as text.
	pub fn is_numeric_literal(&self) -> bool {
		match self {
			QueryValue::Raw(s) => {
				!s.is_empty()
					&& s
						.bytes()
						.all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
			}
			_ => false,
		}
	}
}

impl From<&str> for QueryValue {
	fn from(s: &str) -> Self {
		QueryValue::String(s.to_string())
	}
}

impl From<String> for QueryValue {
	fn from(s: String) -> Self {
		QueryValue::String(s)
	}
}

impl From<i64> for QueryValue {
	fn from(i: i64) -> Self {
		QueryValue::Int(i)
	}
}

impl From<i32> for QueryValue {
	fn from(i: i32) -> Self {
		QueryValue::Int(i as i64)
	}
}

impl From<u64> for QueryValue {
	fn from(u: u64) -> Self {
		QueryValue::UInt(u)
	}
}

impl From<f64> for QueryValue {
	fn from(f: f64) -> Self {
		QueryValue::Double(f)
	}
}

impl From<Vec<u8>> for QueryValue {
	fn from(b: Vec<u8>) -> Self {
		QueryValue::Bytes(b)
	}
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
	fn from(v: Option<T>) -> Self {
		v.map(Into::into).unwrap_or(QueryValue::Null)
	}
}

/// Query result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
	pub rows_affected: u64,
}

/// Positional row decoded against a [`ValueKind`] layout
pub type TypedRow = Vec<QueryValue>;

/// Row from a catalog query, addressed by column name
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
	pub data: HashMap<String, QueryValue>,
}

impl Row {
	pub fn new() -> Self {
		Self {
			data: HashMap::new(),
		}
	}

	pub fn insert(&mut self, key: String, value: QueryValue) {
		self.data.insert(key, value);
	}

	pub fn get<T: TryFrom<QueryValue>>(&self, key: &str) -> std::result::Result<T, DatabaseError>
	where
		DatabaseError: From<<T as TryFrom<QueryValue>>::Error>,
	{
		self.data
			.get(key)
			.cloned()
			.ok_or_else(|| DatabaseError::ColumnNotFound(key.to_string()))
			.and_then(|v| v.try_into().map_err(Into::into))
	}

	/// Like [`Row::get`] but maps SQL NULL to `None`
	pub fn get_opt<T: TryFrom<QueryValue>>(
		&self,
		key: &str,
	) -> std::result::Result<Option<T>, DatabaseError>
	where
		DatabaseError: From<<T as TryFrom<QueryValue>>::Error>,
	{
		match self.data.get(key) {
			None => Err(DatabaseError::ColumnNotFound(key.to_string())),
			Some(QueryValue::Null) => Ok(None),
			Some(v) => v.clone().try_into().map(Some).map_err(Into::into),
		}
	}
}

impl Default for Row {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: Into<String>, V: Into<QueryValue>> FromIterator<(K, V)> for Row {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self {
			data: iter
				.into_iter()
				.map(|(k, v)| (k.into(), v.into()))
				.collect(),
		}
	}
}

// Type conversions for QueryValue
impl TryFrom<QueryValue> for i64 {
	type Error = DatabaseError;

	fn try_from(value: QueryValue) -> std::result::Result<Self, Self::Error> {
		match value {
			QueryValue::Int(i) => Ok(i),
			QueryValue::UInt(u) => i64::try_from(u)
				.map_err(|_| DatabaseError::TypeError(format!("Value {} out of range for i64", u))),
			_ => Err(DatabaseError::TypeError(format!(
				"Cannot convert {:?} to i64",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for u64 {
	type Error = DatabaseError;

	fn try_from(value: QueryValue) -> std::result::Result<Self, Self::Error> {
		match value {
			QueryValue::UInt(u) => Ok(u),
			QueryValue::Int(i) => u64::try_from(i)
				.map_err(|_| DatabaseError::TypeError(format!("Value {} out of range for u64", i))),
			_ => Err(DatabaseError::TypeError(format!(
				"Cannot convert {:?} to u64",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for u32 {
	type Error = DatabaseError;

	fn try_from(value: QueryValue) -> std::result::Result<Self, Self::Error> {
		let wide = u64::try_from(value)?;
		u32::try_from(wide)
			.map_err(|_| DatabaseError::TypeError(format!("Value {} out of range for u32", wide)))
	}
}

impl TryFrom<QueryValue> for String {
	type Error = DatabaseError;

	fn try_from(value: QueryValue) -> std::result::Result<Self, Self::Error> {
		match value {
			QueryValue::String(s) | QueryValue::Raw(s) | QueryValue::Json(s) => Ok(s),
			QueryValue::Bytes(b) => String::from_utf8(b)
				.map_err(|e| DatabaseError::TypeError(format!("Invalid UTF-8: {}", e))),
			_ => Err(DatabaseError::TypeError(format!(
				"Cannot convert {:?} to String",
				value
			))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("tinyint", "tinyint(1)", ValueKind::Int { width: IntWidth::Tiny, unsigned: false })]
	#[case("smallint", "smallint(5) unsigned", ValueKind::Int { width: IntWidth::Small, unsigned: true })]
	#[case("mediumint", "mediumint", ValueKind::Int { width: IntWidth::Medium, unsigned: false })]
	#[case("bigint", "bigint unsigned", ValueKind::Int { width: IntWidth::Big, unsigned: true })]
	#[case("FLOAT", "float", ValueKind::Float)]
	#[case("double", "double", ValueKind::Double)]
	#[case("decimal", "decimal(12,4)", ValueKind::Raw)]
	#[case("timestamp", "timestamp(6)", ValueKind::Temporal)]
	#[case("varchar", "varchar(50)", ValueKind::Text)]
	#[case("enum", "enum('a','b')", ValueKind::Text)]
	#[case("longblob", "longblob", ValueKind::Binary)]
	#[case("json", "json", ValueKind::Json)]
	fn test_value_kind_from_column(
		#[case] data_type: &str,
		#[case] column_type: &str,
		#[case] expected: ValueKind,
	) {
		assert_eq!(ValueKind::from_column(data_type, column_type).unwrap(), expected);
	}

	#[test]
	fn test_value_kind_unsupported() {
		let err = ValueKind::from_column("point", "point").unwrap_err();
		assert!(matches!(err, DatabaseError::UnsupportedType(t) if t == "point"));
	}

	#[test]
	fn test_select_expression_casts_exact_types() {
		assert_eq!(
			ValueKind::Raw.select_expression("`price`"),
			"cast(`price` as char)"
		);
		assert_eq!(
			ValueKind::Temporal.select_expression("`created`"),
			"cast(`created` as char)"
		);
		assert_eq!(ValueKind::Text.select_expression("`name`"), "`name`");
	}

	#[test]
	fn test_json_placeholder() {
		assert_eq!(ValueKind::Json.placeholder(), "cast(? as json)");
		assert_eq!(ValueKind::Binary.placeholder(), "?");
	}

	#[rstest]
	#[case("12.50", true)]
	#[case("-3", true)]
	#[case("1e10", true)]
	#[case("", false)]
	#[case("1; drop table t", false)]
	fn test_numeric_literal(#[case] text: &str, #[case] expected: bool) {
		assert_eq!(QueryValue::Raw(text.to_string()).is_numeric_literal(), expected);
	}

	#[test]
	fn test_row_get_conversions() {
		let row: Row = [
			("name", QueryValue::Bytes(b"id".to_vec())),
			("position", QueryValue::UInt(3)),
			("expr", QueryValue::Null),
		]
		.into_iter()
		.collect();

		assert_eq!(row.get::<String>("name").unwrap(), "id");
		assert_eq!(row.get::<u32>("position").unwrap(), 3);
		assert_eq!(row.get_opt::<String>("expr").unwrap(), None);
		assert!(matches!(
			row.get::<String>("missing"),
			Err(DatabaseError::ColumnNotFound(_))
		));
	}
}
