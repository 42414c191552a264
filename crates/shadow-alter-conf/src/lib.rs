//! # shadow-alter settings
//!
//! Connection details and migration tunables, loadable from a TOML file of
//! saved connections:
//!
//! ```toml
//! [connections.staging]
//! user = "deploy"
//! password = "secret"
//! host = "db.staging"
//! database = "shop"
//!
//! [migration]
//! target_batch_millis = 250
//! ```

pub mod connection;
pub mod error;
pub mod migration;

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use connection::ConnectionConfig;
pub use error::{Result, SettingsError};
pub use migration::MigrationSettings;

/// Contents of a settings file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	/// Saved connections, in file order
	pub connections: IndexMap<String, ConnectionConfig>,

	pub migration: MigrationSettings,
}

impl Settings {
	pub fn from_toml_str(source: &str) -> Result<Self> {
		let settings: Settings = toml::from_str(source)?;
		settings.migration.validate()?;
		Ok(settings)
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let source = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&source)
	}

	/// Look up a saved connection by name
	pub fn connection(&self, name: &str) -> Result<&ConnectionConfig> {
		self.connections
			.get(name)
			.ok_or_else(|| SettingsError::UnknownConnection(name.to_string()))
	}
}
