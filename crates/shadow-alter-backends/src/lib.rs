//! # shadow-alter backends
//!
//! The MySQL connection layer used by the online schema change core.
//!
//! ## Overview
//!
//! - **[`DatabaseBackend`]**: execute / fetch / streaming fetch, the only
//!   surface the core talks to
//! - **[`MySqlBackend`]**: sqlx implementation with a pinned session
//!   connection and a separate streaming reader
//! - **[`DatabaseConnection`]**: cheap, clonable handle around a backend
//! - **[`ValueKind`] / [`QueryValue`]**: schema-driven generic row slots
//!
//! ## Example
//!
//! ```rust,no_run
//! use shadow_alter_backends::DatabaseConnection;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = DatabaseConnection::connect_mysql("mysql://root@localhost:3306/shop").await?;
//! let rows = conn
//! 	.fetch_all("select count(*) as n from `orders`", vec![])
//! 	.await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod types;

pub use backend::DatabaseBackend;
pub use connection::DatabaseConnection;
pub use dialect::{MySqlBackend, quote_identifier};
pub use error::{DatabaseError, Result};
pub use types::{IntWidth, QueryResult, QueryValue, Row, TypedRow, ValueKind};
