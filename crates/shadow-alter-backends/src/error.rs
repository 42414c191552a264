//! Database error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
	#[error("SQL error: {0}")]
	SqlError(#[from] sqlx::Error),

	#[error("Column not found: {0}")]
	ColumnNotFound(String),

	#[error("Type error: {0}")]
	TypeError(String),

	/// A catalog type that has no generic row slot
	#[error("Unsupported column type: {0}")]
	UnsupportedType(String),

	/// Row width disagrees with the slot layout it is decoded against
	#[error("Row layout mismatch: expected {expected} values, got {actual}")]
	LayoutMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
