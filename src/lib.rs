//! # shadow-alter
//!
//! Online schema changes for live MySQL tables through a trigger-synchronized
//! shadow copy.
//!
//! This crate re-exports the workspace members:
//!
//! - [`backends`]: the database interface and its MySQL implementation
//! - [`conf`]: connection and migration settings
//! - [`migrate`]: the schema change itself
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shadow_alter::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::default().with_database("shop");
//! let conn = DatabaseConnection::connect_mysql(&config.to_url()).await?;
//!
//! let outcome = OnlineAlter::new(conn, MigrationSettings::default())?
//! 	.run("ALTER TABLE users ADD COLUMN age int", &NoopObserver, &AlwaysProceed)
//! 	.await?;
//! assert_eq!(outcome.table.name, "users");
//! # Ok(())
//! # }
//! ```

pub use shadow_alter_backends as backends;
pub use shadow_alter_conf as conf;
pub use shadow_alter_migrate as migrate;

pub mod prelude {
	pub use shadow_alter_backends::{DatabaseConnection, DatabaseError};
	pub use shadow_alter_conf::{ConnectionConfig, MigrationSettings, Settings};
	pub use shadow_alter_migrate::{
		AlterError, AlterOutcome, AlterPlan, AlwaysProceed, BackfillObserver, BackfillReport,
		CutoverGate, NoopObserver, OnlineAlter, TableRef,
	};
}
