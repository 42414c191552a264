//! Database dialects

pub mod mysql;

pub use mysql::{MySqlBackend, decode_typed, quote_identifier};
