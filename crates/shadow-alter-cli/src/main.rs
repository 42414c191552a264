//! shadow-alter
//!
//! Applies one `ALTER TABLE` statement to a live MySQL table by copying it into
//! a shadow table kept in sync with triggers, then swapping the copy into place.
//!
//! ## Usage
//!
//! ```bash
//! shadow-alter -u root -h localhost -d shop -q "ALTER TABLE users ADD COLUMN age int"
//! shadow-alter -c staging --yes -q "ALTER TABLE shop.orders DROP COLUMN legacy"
//! shadow-alter -c staging --plan -q "ALTER TABLE users CHANGE name full_name varchar(100)"
//! ```

mod args;
mod progress;

use std::process;

use clap::Parser;
use colored::Colorize;
use dialoguer::Editor;
use shadow_alter_backends::DatabaseConnection;
use shadow_alter_migrate::{
	AlterError, AlterOutcome, AlterParser, AlterPlan, CutoverStep, OnlineAlter, RegexAlterParser,
};
use tracing_subscriber::EnvFilter;

use args::Cli;
use progress::{ProgressObserver, PromptGate};

const EDITOR_TEMPLATE: &str = "-- Enter a single ALTER TABLE statement. Lines starting with -- are ignored.\n";

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	init_logging(cli.log_filter());

	if let Err(e) = run(&cli).await {
		eprintln!("{} {:#}", "Error:".red().bold(), e);
		process::exit(1);
	}
}

fn init_logging(default_filter: &str) {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(false)
		.init();
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
	let settings = cli.settings()?;
	let connection = cli.resolve_connection(&settings)?;
	let migration = cli.resolve_migration(&settings);

	let statement = match &cli.query {
		Some(query) => query.clone(),
		None => read_statement()?,
	};

	let conn = DatabaseConnection::connect_mysql(&connection.to_url()).await?;
	let alter = OnlineAlter::new(conn, migration)?;

	if cli.plan {
		let plan = alter.plan(&statement).await?;
		print_plan(&plan);
		return Ok(());
	}

	let observer = ProgressObserver::new();
	let gate = PromptGate::new(cli.yes);
	match alter.run(&statement, &observer, &gate).await {
		Ok(outcome) => {
			print_outcome(&outcome);
			Ok(())
		}
		Err(AlterError::Aborted) => {
			println!("{}", AlterError::Aborted.to_string().yellow());
			Ok(())
		}
		Err(e @ AlterError::Cutover { step, .. }) if e.is_critical() => {
			eprintln!("{}", format!("CRITICAL: {}", e).red().bold());
			if let Some(source) = std::error::Error::source(&e) {
				eprintln!("{}", format!("Caused by: {}", source).red());
			}
			eprintln!(
				"{}",
				recovery_guidance(step, &statement, alter.settings().shadow_suffix.as_str()).red()
			);
			process::exit(2);
		}
		Err(e) => Err(e.into()),
	}
}

/// Collect the statement in the user's editor
fn read_statement() -> anyhow::Result<String> {
	let edited = Editor::new()
		.extension(".sql")
		.edit(EDITOR_TEMPLATE)?
		.ok_or_else(|| anyhow::anyhow!("No statement entered"))?;

	let statement = edited
		.lines()
		.filter(|line| !line.trim_start().starts_with("--"))
		.collect::<Vec<_>>()
		.join("\n");
	if statement.trim().is_empty() {
		anyhow::bail!("No statement entered");
	}
	Ok(statement)
}

fn print_plan(plan: &AlterPlan) {
	println!("{} {}", "Table:".bold(), plan.original);
	println!("{} {}", "Shadow:".bold(), plan.shadow.table);
	println!("{}", "Columns:".bold());
	for column in &plan.reconciliation.projection {
		if column.old == column.new {
			println!("  {}", column.old);
		} else {
			println!("  {} -> {}", column.old, column.new.cyan());
		}
	}
	for column in &plan.old_schema.columns {
		if plan.mapping.get(&column.name).is_none() {
			println!("  {} {}", column.name.red(), "(dropped)".dimmed());
		}
	}
	println!(
		"{} {}",
		"Key:".bold(),
		plan.reconciliation.new_key().collect::<Vec<_>>().join(", ")
	);
	println!("{}", "Held until cutover:".bold());
	for constraint in plan.shadow.constraints.iter() {
		println!("  {}", constraint.definition);
	}
	println!("{}", "Triggers:".bold());
	for trigger in &plan.triggers {
		println!("{};\n", trigger.create_sql);
	}
}

fn print_outcome(outcome: &AlterOutcome) {
	println!(
		"{} {}: {} rows copied in {} batches ({:.1?}); {} constraints and {} triggers restored",
		"Altered".green().bold(),
		outcome.table,
		outcome.backfill.rows_copied,
		outcome.backfill.batches,
		outcome.backfill.elapsed,
		outcome.cutover.constraints_restored,
		outcome.cutover.triggers_restored.len(),
	);
}

/// What the operator must finish by hand after a failure past the drop
fn recovery_guidance(step: CutoverStep, statement: &str, suffix: &str) -> String {
	let table = RegexAlterParser
		.parse(statement)
		.map(|s| s.table)
		.unwrap_or_else(|_| "<table>".to_string());
	let shadow = format!("{}{}", table, suffix);

	let mut remaining = Vec::new();
	if step == CutoverStep::RestoreConstraints {
		remaining.push(format!(
			"re-add the foreign keys and checks of `{}` to `{}` (ALTER TABLE ... ADD CONSTRAINT ...)",
			table, shadow
		));
	}
	if matches!(
		step,
		CutoverStep::RestoreConstraints | CutoverStep::RestoreTriggers
	) {
		remaining.push(format!("recreate the triggers of `{}` on `{}`", table, shadow));
	}
	remaining.push(format!("RENAME TABLE `{}` TO `{}`", shadow, table));
	remaining.push("SET foreign_key_checks = 1 on any session that disabled it".to_string());

	let steps = remaining
		.iter()
		.enumerate()
		.map(|(i, s)| format!("  {}. {}", i + 1, s))
		.collect::<Vec<_>>()
		.join("\n");
	format!(
		"The original table `{}` was dropped. Every row is in `{}`.\nFinish the change by hand:\n{}",
		table, shadow, steps
	)
}
