//! Shadow table creation
//!
//! The shadow table is created from the original's `SHOW CREATE TABLE` text
//! with every foreign key and check constraint removed: their names are unique
//! per schema, so they are held in a [`ConstraintSet`] and attached again at
//! cutover.
//!
//! A previous run may have left its shadow table and triggers behind. The
//! triggers are dropped before the table so that no write to the original
//! table fires a trigger whose target no longer exists.

use once_cell::sync::Lazy;
use regex::Regex;
use shadow_alter_backends::{DatabaseConnection, quote_identifier};

use crate::error::{AlterError, Result};
use crate::introspect::{MySqlIntrospector, TableRef};
use crate::parser::AlterStatement;
use crate::triggers::TriggerEvent;

const IDENT: &str = r"(?:`(?:[^`]|``)+`|[\w$]+)";

static FOREIGN_KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
	let referential_action =
		r"(?:restrict|cascade|set\s+null|set\s+default|no\s+action)";
	Regex::new(&format!(
		r"(?i),\s*(constraint\s+({IDENT})\s+foreign\s+key\s*\([^)]*\)\s*references\s+(?:{IDENT}\s*\.\s*)?{IDENT}\s*\([^)]*\)(?:\s+on\s+(?:delete|update)\s+{referential_action})*)"
	))
	.expect("Invalid FOREIGN KEY regex pattern")
});

static CHECK_START_REGEX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(&format!(r"(?i),\s*(constraint\s+({IDENT})\s+check\s*)\("))
		.expect("Invalid CHECK regex pattern")
});

static NOT_ENFORCED_REGEX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"(?i)^\s*/\*!\d+\s+not\s+enforced\s*\*/")
		.expect("Invalid NOT ENFORCED regex pattern")
});

static QUOTED_IDENT_REGEX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"`((?:[^`]|``)+)`").expect("Invalid quoted identifier regex pattern")
});

static CREATE_TABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(&format!(
		r"(?i)^\s*create\s+table\s+(?:if\s+not\s+exists\s+)?(?:{IDENT}\s*\.\s*)?{IDENT}"
	))
	.expect("Invalid CREATE TABLE regex pattern")
});

/// Names derived from the original table name and the configured suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowNaming {
	suffix: String,
}

impl ShadowNaming {
	pub fn new(suffix: impl Into<String>) -> Self {
		Self {
			suffix: suffix.into(),
		}
	}

	pub fn shadow_table(&self, original: &TableRef) -> TableRef {
		original.sibling(format!("{}{}", original.name, self.suffix))
	}

	/// Name of the change-capture trigger for `event` on `original`
	pub fn trigger_name(&self, original: &TableRef, event: TriggerEvent) -> String {
		format!(
			"{}_after_{}{}",
			original.name,
			event.as_str(),
			self.suffix
		)
	}

	/// Whether a trigger was created by this tool
	pub fn is_own_trigger(&self, name: &str) -> bool {
		name.ends_with(&self.suffix)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
	ForeignKey,
	Check,
}

/// One constraint clause taken from a `CREATE TABLE` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldConstraint {
	pub name: String,
	pub kind: ConstraintKind,
	/// `CONSTRAINT ...` exactly as printed
	pub definition: String,
}

impl HeldConstraint {
	/// Columns of the owning table the constraint refers to
	///
	/// For a foreign key that is its local column list; for a check it is
	/// every quoted identifier in the expression.
	pub fn local_columns(&self) -> Vec<String> {
		let scope = match self.kind {
			ConstraintKind::ForeignKey => self
				.definition
				.split_once('(')
				.and_then(|(_, rest)| rest.split_once(')'))
				.map(|(columns, _)| columns)
				.unwrap_or_default(),
			ConstraintKind::Check => self
				.definition
				.split_once('(')
				.map(|(_, rest)| rest)
				.unwrap_or_default(),
		};
		let mut columns: Vec<String> = QUOTED_IDENT_REGEX
			.captures_iter(scope)
			.map(|c| c[1].replace("``", "`"))
			.collect();
		columns.dedup();
		columns
	}
}

/// Foreign keys and check constraints removed from the shadow table's DDL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintSet {
	constraints: Vec<HeldConstraint>,
}

impl ConstraintSet {
	pub fn iter(&self) -> impl Iterator<Item = &HeldConstraint> {
		self.constraints.iter()
	}

	pub fn foreign_keys(&self) -> impl Iterator<Item = &HeldConstraint> {
		self.of_kind(ConstraintKind::ForeignKey)
	}

	pub fn checks(&self) -> impl Iterator<Item = &HeldConstraint> {
		self.of_kind(ConstraintKind::Check)
	}

	fn of_kind(&self, kind: ConstraintKind) -> impl Iterator<Item = &HeldConstraint> {
		self.constraints.iter().filter(move |c| c.kind == kind)
	}

	pub fn is_empty(&self) -> bool {
		self.constraints.is_empty()
	}

	pub fn len(&self) -> usize {
		self.constraints.len()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.constraints
			.iter()
			.any(|c| c.name.eq_ignore_ascii_case(name))
	}

	/// Forget a constraint; returns whether it was present
	pub fn remove(&mut self, name: &str) -> bool {
		let before = self.constraints.len();
		self.constraints
			.retain(|c| !c.name.eq_ignore_ascii_case(name));
		self.constraints.len() != before
	}

	/// `ALTER TABLE table ADD <constraint>, ...`, or `None` when empty
	pub fn add_statement(&self, table: &TableRef) -> Option<String> {
		if self.constraints.is_empty() {
			return None;
		}
		let additions = self
			.constraints
			.iter()
			.map(|c| format!("ADD {}", c.definition))
			.collect::<Vec<_>>()
			.join(", ");
		Some(format!("ALTER TABLE {} {}", table.quoted(), additions))
	}
}

/// Split a `CREATE TABLE` statement into DDL without foreign keys and checks,
/// and the constraints removed
pub fn split_constraints(ddl: &str) -> (String, ConstraintSet) {
	let mut constraints: Vec<HeldConstraint> = FOREIGN_KEY_REGEX
		.captures_iter(ddl)
		.map(|c| HeldConstraint {
			name: unquote(&c[2]),
			kind: ConstraintKind::ForeignKey,
			definition: c[1].trim().to_string(),
		})
		.collect();
	let without_keys = FOREIGN_KEY_REGEX.replace_all(ddl, "").into_owned();

	let mut stripped = String::with_capacity(without_keys.len());
	let mut rest = without_keys.as_str();
	while let Some(c) = CHECK_START_REGEX.captures(rest) {
		let (Some(item), Some(clause), Some(name)) = (c.get(0), c.get(1), c.get(2)) else {
			break;
		};
		// The match ends on the opening parenthesis of the expression
		let Some(close) = balanced_end(&rest[item.end() - 1..]) else {
			break;
		};
		let mut end = item.end() - 1 + close;
		if let Some(comment) = NOT_ENFORCED_REGEX.find(&rest[end..]) {
			end += comment.end();
		}

		constraints.push(HeldConstraint {
			name: unquote(name.as_str()),
			kind: ConstraintKind::Check,
			definition: rest[clause.start()..end].trim().to_string(),
		});
		stripped.push_str(&rest[..item.start()]);
		rest = &rest[end..];
	}
	stripped.push_str(rest);

	(stripped, ConstraintSet { constraints })
}

/// Byte length of the parenthesized group `text` starts with
fn balanced_end(text: &str) -> Option<usize> {
	let mut depth = 0usize;
	let mut quote: Option<char> = None;
	for (i, ch) in text.char_indices() {
		match (quote, ch) {
			(Some(q), c) if c == q => quote = None,
			(Some(_), _) => {}
			(None, '`' | '\'' | '"') => quote = Some(ch),
			(None, '(') => depth += 1,
			(None, ')') => {
				depth = depth.checked_sub(1)?;
				if depth == 0 {
					return Some(i + 1);
				}
			}
			_ => {}
		}
	}
	None
}

/// Point a `CREATE TABLE` statement at another, fully qualified table
pub fn rename_create_table(ddl: &str, target: &TableRef) -> Option<String> {
	let header = CREATE_TABLE_REGEX.find(ddl)?;
	Some(format!(
		"CREATE TABLE {}{}",
		target.quoted(),
		&ddl[header.end()..]
	))
}

fn unquote(ident: &str) -> String {
	match ident.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
		Some(inner) => inner.replace("``", "`"),
		None => ident.to_string(),
	}
}

/// The freshly created shadow table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTable {
	pub table: TableRef,
	/// Constraints to attach after the original table is dropped
	pub constraints: ConstraintSet,
}

/// Creates the shadow table and applies the alteration to it
#[derive(Debug, Clone)]
pub struct ShadowTableManager {
	conn: DatabaseConnection,
	naming: ShadowNaming,
}

impl ShadowTableManager {
	pub fn new(conn: DatabaseConnection, naming: ShadowNaming) -> Self {
		Self { conn, naming }
	}

	/// Drop any stale triggers and shadow table, create a new one and alter it
	pub async fn prepare(
		&self,
		original: &TableRef,
		statement: &AlterStatement,
	) -> Result<ShadowTable> {
		let shadow = self.naming.shadow_table(original);
		let ddl = MySqlIntrospector::new(self.conn.clone())
			.show_create_table(original)
			.await?;

		let (ddl, mut constraints) = split_constraints(&ddl);
		let clause = statement.shadow_clause(|name| constraints.contains(name));
		for name in &statement.dropped_constraints {
			if !constraints.remove(name) {
				tracing::debug!(constraint = %name, table = %original, "Dropped constraint is not held back");
			}
		}
		let create = rename_create_table(&ddl, &shadow).ok_or_else(|| AlterError::Introspection {
			context: format!("unrecognized CREATE TABLE statement for {}", original),
			source: None,
		})?;

		for event in TriggerEvent::ALL {
			let trigger = self.naming.trigger_name(original, event);
			self.execute(&format!(
				"DROP TRIGGER IF EXISTS {}.{}",
				quote_identifier(&original.schema),
				quote_identifier(&trigger)
			))
			.await?;
		}

		tracing::info!(shadow = %shadow, "Creating shadow table");
		self.execute(&format!("DROP TABLE IF EXISTS {}", shadow.quoted()))
			.await?;
		self.execute(&create).await?;

		if let Some(clause) = clause {
			tracing::info!(shadow = %shadow, "Altering shadow table");
			self.execute(&format!("ALTER TABLE {} {}", shadow.quoted(), clause))
				.await?;
		}

		if !constraints.is_empty() {
			tracing::info!(
				foreign_keys = constraints.foreign_keys().count(),
				checks = constraints.checks().count(),
				"Constraints held back until cutover"
			);
		}

		Ok(ShadowTable {
			table: shadow,
			constraints,
		})
	}

	async fn execute(&self, sql: &str) -> Result<()> {
		tracing::debug!(sql, "Shadow DDL");
		self.conn
			.execute(sql, vec![])
			.await
			.map_err(|e| AlterError::ddl(sql, e))?;
		Ok(())
	}
}

/// Quote a column list: `` `a`, `b` ``
pub(crate) fn column_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
	names
		.into_iter()
		.map(quote_identifier)
		.collect::<Vec<_>>()
		.join(", ")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::parser::{AlterParser, RegexAlterParser};
	use crate::testing::{FakeBackend, row};

	const CHILD_DDL: &str = "CREATE TABLE `order_items` (\n  \
		`id` int NOT NULL AUTO_INCREMENT,\n  \
		`order_id` int NOT NULL,\n  \
		`sku` varchar(32) NOT NULL,\n  \
		PRIMARY KEY (`id`),\n  \
		KEY `fk_order` (`order_id`),\n  \
		KEY `fk_sku` (`sku`),\n  \
		CONSTRAINT `fk_order` FOREIGN KEY (`order_id`) REFERENCES `orders` (`id`) ON DELETE CASCADE ON UPDATE NO ACTION,\n  \
		CONSTRAINT `fk_sku` FOREIGN KEY (`sku`) REFERENCES `catalog`.`products` (`sku`)\n\
		) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";

	fn items() -> TableRef {
		TableRef::new("shop", "order_items")
	}

	const CHECKED_DDL: &str = "CREATE TABLE `lines` (\n  \
		`id` int NOT NULL,\n  \
		`qty` int NOT NULL,\n  \
		`code` varchar(8) NOT NULL,\n  \
		PRIMARY KEY (`id`),\n  \
		CONSTRAINT `lines_chk_1` CHECK ((`qty` > 0)),\n  \
		CONSTRAINT `chk_code` CHECK ((`code` not in (_utf8mb4')',_utf8mb4'x'))) /*!80016 NOT ENFORCED */\n\
		) ENGINE=InnoDB";

	#[test]
	fn test_split_foreign_keys() {
		let (ddl, constraints) = split_constraints(CHILD_DDL);

		assert!(!ddl.contains("CONSTRAINT"));
		assert!(ddl.contains("KEY `fk_sku` (`sku`)\n) ENGINE=InnoDB"));
		let names: Vec<_> = constraints.foreign_keys().map(|fk| fk.name.as_str()).collect();
		assert_eq!(names, vec!["fk_order", "fk_sku"]);
		assert_eq!(constraints.checks().count(), 0);
		assert_eq!(
			constraints.iter().next().unwrap().definition,
			"CONSTRAINT `fk_order` FOREIGN KEY (`order_id`) REFERENCES `orders` (`id`) ON DELETE CASCADE ON UPDATE NO ACTION"
		);
	}

	#[test]
	fn test_split_checks_with_nested_parentheses() {
		let (ddl, constraints) = split_constraints(CHECKED_DDL);

		assert!(!ddl.contains("CHECK"));
		assert!(ddl.contains("PRIMARY KEY (`id`)\n) ENGINE=InnoDB"));
		let checks: Vec<_> = constraints
			.checks()
			.map(|c| (c.name.as_str(), c.definition.as_str()))
			.collect();
		assert_eq!(
			checks,
			vec![
				("lines_chk_1", "CONSTRAINT `lines_chk_1` CHECK ((`qty` > 0))"),
				(
					"chk_code",
					"CONSTRAINT `chk_code` CHECK ((`code` not in (_utf8mb4')',_utf8mb4'x'))) /*!80016 NOT ENFORCED */"
				),
			]
		);
	}

	#[test]
	fn test_local_columns() {
		let (_, keys) = split_constraints(CHILD_DDL);
		let (_, checks) = split_constraints(CHECKED_DDL);

		let fk = keys.iter().next().unwrap();
		assert_eq!(fk.local_columns(), vec!["order_id"]);
		let check = checks.iter().nth(1).unwrap();
		assert_eq!(check.local_columns(), vec!["code"]);
	}

	#[test]
	fn test_add_statement() {
		let (_, mut constraints) = split_constraints(CHILD_DDL);
		assert!(constraints.remove("FK_ORDER"));
		assert!(!constraints.remove("fk_missing"));

		assert_eq!(
			constraints.add_statement(&items()).unwrap(),
			"ALTER TABLE `shop`.`order_items` ADD CONSTRAINT `fk_sku` FOREIGN KEY (`sku`) REFERENCES `catalog`.`products` (`sku`)"
		);
		assert_eq!(ConstraintSet::default().add_statement(&items()), None);
	}

	#[test]
	fn test_add_statement_restores_checks() {
		let (_, mut constraints) = split_constraints(CHECKED_DDL);
		assert!(constraints.remove("chk_code"));

		assert_eq!(
			constraints.add_statement(&TableRef::new("shop", "lines")).unwrap(),
			"ALTER TABLE `shop`.`lines` ADD CONSTRAINT `lines_chk_1` CHECK ((`qty` > 0))"
		);
	}

	#[test]
	fn test_rename_create_table() {
		let (ddl, _) = split_constraints(CHILD_DDL);
		let target = TableRef::new("shop", "order_items_shadow_alter");
		let renamed = rename_create_table(&ddl, &target).unwrap();

		assert!(renamed.starts_with("CREATE TABLE `shop`.`order_items_shadow_alter` (\n  `id` int"));
		assert_eq!(rename_create_table("CREATE VIEW v AS select 1", &target), None);
	}

	#[test]
	fn test_naming() {
		let naming = ShadowNaming::new("_shadow_alter");
		assert_eq!(naming.shadow_table(&items()).name, "order_items_shadow_alter");
		assert_eq!(
			naming.trigger_name(&items(), TriggerEvent::Update),
			"order_items_after_update_shadow_alter"
		);
		assert!(naming.is_own_trigger("order_items_after_delete_shadow_alter"));
		assert!(!naming.is_own_trigger("order_items_audit"));
	}

	#[tokio::test]
	async fn test_prepare_statement_sequence() {
		let fake = FakeBackend::new();
		fake.on_query(
			"show create table",
			vec![row([("Table", "order_items"), ("Create Table", CHILD_DDL)])],
		);
		let manager = ShadowTableManager::new(fake.connection(), ShadowNaming::new("_shadow_alter"));
		let statement = RegexAlterParser
			.parse("ALTER TABLE order_items DROP FOREIGN KEY fk_sku, ADD COLUMN qty int")
			.unwrap();

		let shadow = manager.prepare(&items(), &statement).await.unwrap();

		assert_eq!(shadow.table.name, "order_items_shadow_alter");
		assert_eq!(shadow.constraints.len(), 1);
		assert_eq!(shadow.constraints.iter().next().unwrap().name, "fk_order");

		let executed = fake.executed_sql();
		assert_eq!(
			executed[..4],
			[
				"DROP TRIGGER IF EXISTS `shop`.`order_items_after_insert_shadow_alter`",
				"DROP TRIGGER IF EXISTS `shop`.`order_items_after_update_shadow_alter`",
				"DROP TRIGGER IF EXISTS `shop`.`order_items_after_delete_shadow_alter`",
				"DROP TABLE IF EXISTS `shop`.`order_items_shadow_alter`",
			]
		);
		assert_eq!(executed.len(), 6);
		assert!(executed[4].starts_with("CREATE TABLE `shop`.`order_items_shadow_alter`"));
		assert!(!executed[4].contains("FOREIGN KEY"));
		assert_eq!(
			executed[5],
			"ALTER TABLE `shop`.`order_items_shadow_alter` ADD COLUMN qty int"
		);
	}

	#[tokio::test]
	async fn test_stale_triggers_go_before_the_table_they_write_to() {
		let fake = FakeBackend::new();
		fake.on_query(
			"show create table",
			vec![row([("Table", "order_items"), ("Create Table", CHILD_DDL)])],
		);
		fake.fail_on("DROP TRIGGER IF EXISTS `shop`.`order_items_after_delete_shadow_alter`");
		let manager = ShadowTableManager::new(fake.connection(), ShadowNaming::new("_shadow_alter"));
		let statement = RegexAlterParser
			.parse("ALTER TABLE order_items ADD COLUMN qty int")
			.unwrap();

		let err = manager.prepare(&items(), &statement).await.unwrap_err();

		// A trigger that cannot be removed keeps the stale shadow table alive
		assert!(matches!(err, AlterError::Ddl { .. }));
		assert!(
			fake.executed_sql()
				.iter()
				.all(|sql| !sql.starts_with("DROP TABLE"))
		);
	}

	#[tokio::test]
	async fn test_prepare_holds_checks_and_applies_unheld_constraint_drops() {
		let fake = FakeBackend::new();
		fake.on_query(
			"show create table",
			vec![row([("Table", "lines"), ("Create Table", CHECKED_DDL)])],
		);
		let manager = ShadowTableManager::new(fake.connection(), ShadowNaming::new("_shadow_alter"));
		let statement = RegexAlterParser
			.parse("ALTER TABLE `lines` DROP CONSTRAINT chk_code, DROP CONSTRAINT uq_code, ADD COLUMN note text")
			.unwrap();

		let shadow = manager
			.prepare(&TableRef::new("shop", "lines"), &statement)
			.await
			.unwrap();

		let held: Vec<_> = shadow.constraints.checks().map(|c| c.name.as_str()).collect();
		assert_eq!(held, vec!["lines_chk_1"]);
		let executed = fake.executed_sql();
		assert!(!executed[4].contains("CHECK"));
		assert_eq!(
			executed[5],
			"ALTER TABLE `shop`.`lines_shadow_alter` DROP CONSTRAINT uq_code, ADD COLUMN note text"
		);
	}

	#[tokio::test]
	async fn test_prepare_failure_is_ddl_error() {
		let fake = FakeBackend::new();
		fake.on_query(
			"show create table",
			vec![row([("Table", "order_items"), ("Create Table", CHILD_DDL)])],
		);
		fake.fail_on("ALTER TABLE");
		let manager = ShadowTableManager::new(fake.connection(), ShadowNaming::new("_shadow_alter"));
		let statement = RegexAlterParser
			.parse("ALTER TABLE order_items ADD COLUMN qty int")
			.unwrap();

		let err = manager.prepare(&items(), &statement).await.unwrap_err();
		assert!(
			matches!(err, AlterError::Ddl { ref statement, .. } if statement.starts_with("ALTER TABLE"))
		);
	}
}
