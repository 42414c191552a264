//! Command-line flags and their resolution against saved connections

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};
use shadow_alter_conf::{ConnectionConfig, MigrationSettings, Settings};

/// Read when `--connections-file` is not given and the file exists
pub const DEFAULT_CONNECTIONS_FILE: &str = "shadow-alter.toml";

#[derive(Parser, Debug)]
#[command(name = "shadow-alter")]
#[command(about = "Run an ALTER TABLE against a live MySQL table through a shadow copy", long_about = None)]
#[command(version)]
#[command(disable_help_flag = true)]
pub struct Cli {
	/// User name
	#[arg(short = 'u', long, value_name = "USER")]
	pub user: Option<String>,

	/// Password
	#[arg(short = 'p', long, value_name = "PASSWORD")]
	pub password: Option<String>,

	/// Server host
	#[arg(short = 'h', long, value_name = "HOST")]
	pub host: Option<String>,

	/// Server port
	#[arg(short = 'P', long, value_name = "PORT")]
	pub port: Option<u16>,

	/// Default database for unqualified table names
	#[arg(short = 'd', long, value_name = "DATABASE")]
	pub database: Option<String>,

	/// The ALTER TABLE statement; an editor opens when omitted
	#[arg(short = 'q', long, value_name = "SQL")]
	pub query: Option<String>,

	/// Suffix of the shadow table and trigger names
	#[arg(long, value_name = "SUFFIX")]
	pub suffix: Option<String>,

	/// Saved connection to start from
	#[arg(short = 'c', long, value_name = "NAME")]
	pub connection: Option<String>,

	/// File holding saved connections and migration settings
	#[arg(long, value_name = "PATH")]
	pub connections_file: Option<PathBuf>,

	/// Rows buffered between the backfill reader and writer
	#[arg(long, value_name = "ROWS")]
	pub row_buffer: Option<usize>,

	/// Target duration of one insert batch, in milliseconds
	#[arg(long, value_name = "MILLIS")]
	pub target_ms: Option<u64>,

	/// Smallest batch the backfill shrinks to
	#[arg(long, value_name = "ROWS")]
	pub min_batch: Option<usize>,

	/// Cut over without asking for confirmation
	#[arg(short = 'y', long)]
	pub yes: bool,

	/// Create the shadow table and print the plan without installing triggers
	#[arg(long)]
	pub plan: bool,

	/// Verbosity level (can be repeated)
	#[arg(short, long, action = ArgAction::Count)]
	pub verbose: u8,

	/// Print help
	#[arg(long, action = ArgAction::Help)]
	pub help: Option<bool>,
}

impl Cli {
	/// Load the settings file named by `--connections-file`, or the default
	/// file when present
	pub fn settings(&self) -> anyhow::Result<Settings> {
		match &self.connections_file {
			Some(path) => Ok(Settings::load(path)?),
			None if Path::new(DEFAULT_CONNECTIONS_FILE).exists() => {
				Ok(Settings::load(DEFAULT_CONNECTIONS_FILE)?)
			}
			None => Ok(Settings::default()),
		}
	}

	/// Flags over the saved connection over defaults
	pub fn resolve_connection(&self, settings: &Settings) -> anyhow::Result<ConnectionConfig> {
		let mut config = match &self.connection {
			Some(name) => settings.connection(name)?.clone(),
			None => ConnectionConfig::default(),
		};

		if let Some(user) = &self.user {
			config.user = user.clone();
		}
		if let Some(password) = &self.password {
			config.password = Some(password.clone());
		}
		if let Some(host) = &self.host {
			config.host = host.clone();
		}
		if let Some(port) = self.port {
			config.port = port;
		}
		if let Some(database) = &self.database {
			config.database = Some(database.clone());
		}
		Ok(config)
	}

	pub fn resolve_migration(&self, settings: &Settings) -> MigrationSettings {
		let mut migration = settings.migration.clone();

		if let Some(suffix) = &self.suffix {
			migration.shadow_suffix = suffix.clone();
		}
		if let Some(rows) = self.row_buffer {
			migration.row_buffer_size = rows;
		}
		if let Some(millis) = self.target_ms {
			migration.target_batch_millis = millis;
		}
		if let Some(rows) = self.min_batch {
			migration.min_batch_size = rows;
			if migration.initial_batch_size < rows {
				migration.initial_batch_size = rows;
			}
		}
		migration
	}

	pub fn log_filter(&self) -> &'static str {
		match self.verbose {
			0 => "warn",
			1 => "info",
			2 => "debug",
			_ => "trace",
		}
	}
}
