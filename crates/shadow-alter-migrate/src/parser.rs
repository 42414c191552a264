//! ALTER TABLE statement parsing
//!
//! Parsing is pattern based and case-insensitive. It recovers the target table
//! and tracks column renames and drops at the text level; it does not validate
//! the DDL grammar. The rest of the crate only sees [`AlterParser`], so a
//! SQL-aware parser can replace [`RegexAlterParser`] without other changes.
//!
//! Multiple statements in one input, and semicolons inside string or
//! identifier literals, are not supported.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AlterError, Result};

/// A backtick-quoted identifier (with doubled backticks inside) or a bare one
const IDENT: &str = r"(?:`(?:[^`]|``)+`|[\w$]+)";

static ALTER_REGEX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(&format!(
		r"(?is)^alter\s+table\s+(?:({IDENT})\s*\.\s*)?({IDENT})(?:\s+|\b)(\S.*)$"
	))
	.expect("Invalid ALTER TABLE regex pattern")
});

static CHANGE_REGEX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(&format!(r"(?i)\bchange\s+(?:column\s+)?({IDENT})\s+({IDENT})"))
		.expect("Invalid CHANGE COLUMN regex pattern")
});

static RENAME_COLUMN_REGEX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(&format!(
		r"(?i)\brename\s+column\s+({IDENT})\s+to\s+({IDENT})"
	))
	.expect("Invalid RENAME COLUMN regex pattern")
});

static DROP_REGEX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(&format!(r"(?i)\bdrop\s+(column\s+)?({IDENT})"))
		.expect("Invalid DROP COLUMN regex pattern")
});

static DROP_CONSTRAINT_REGEX: Lazy<Regex> = Lazy::new(|| {
	Regex::new(&format!(
		r"(?is)^\s*drop\s+(foreign\s+key|check|constraint)\s+({IDENT})\s*$"
	))
	.expect("Invalid DROP CONSTRAINT regex pattern")
});

/// Words that follow a bare `DROP` without naming a column
const DROP_KEYWORDS: &[&str] = &[
	"INDEX",
	"KEY",
	"PRIMARY",
	"FOREIGN",
	"CONSTRAINT",
	"CHECK",
	"PARTITION",
	"COLUMN",
	"DEFAULT",
];

/// A parsed ALTER TABLE statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterStatement {
	/// Schema qualifier, `None` when the statement relies on the current database
	pub schema: Option<String>,
	pub table: String,
	/// Everything after the table name, without the trailing semicolon
	pub clause: String,
	/// `(old, new)` column renames in clause order
	pub renames: Vec<(String, String)>,
	pub drops: Vec<String>,
	/// Constraints removed by `DROP FOREIGN KEY`, `DROP CHECK` or `DROP CONSTRAINT`
	pub dropped_constraints: Vec<String>,
}

impl AlterStatement {
	/// The clause to apply to the shadow table
	///
	/// The shadow table is created without foreign keys and check constraints,
	/// so drops of those are removed and the dropped constraints are simply not
	/// restored at cutover. `DROP CONSTRAINT` may also name a unique key, so it
	/// is only removed when `is_held` claims the name. Returns `None` when
	/// nothing is left to apply.
	pub fn shadow_clause(&self, is_held: impl Fn(&str) -> bool) -> Option<String> {
		let clause = strip_constraint_drops(&self.clause, is_held);
		if clause.is_empty() { None } else { Some(clause) }
	}
}

/// Turns statement text into an [`AlterStatement`]
pub trait AlterParser: Send + Sync {
	fn parse(&self, statement: &str) -> Result<AlterStatement>;
}

/// Regex-based [`AlterParser`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexAlterParser;

impl AlterParser for RegexAlterParser {
	fn parse(&self, statement: &str) -> Result<AlterStatement> {
		let trimmed = statement.trim();
		let body = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
		if body.is_empty() {
			return Err(AlterError::Parse("empty statement".to_string()));
		}
		if body.contains(';') {
			return Err(AlterError::Parse(
				"only a single ALTER TABLE statement is supported".to_string(),
			));
		}

		let captures = ALTER_REGEX.captures(body).ok_or_else(|| {
			AlterError::Parse(format!(
				"expected ALTER TABLE [schema.]table <alteration>, got: {}",
				body
			))
		})?;

		let schema = captures.get(1).map(|m| unquote(m.as_str()));
		let table = unquote(&captures[2]);
		let clause = captures[3].trim().to_string();

		Ok(AlterStatement {
			schema,
			table,
			renames: column_renames(&clause),
			drops: dropped_columns(&clause),
			dropped_constraints: dropped_constraints(&clause),
			clause,
		})
	}
}

/// Column renames in an alteration clause, in clause order
///
/// Both `CHANGE [COLUMN] old new` and `RENAME COLUMN old TO new` count. A
/// `CHANGE` that keeps the name is a type change only and is skipped.
pub fn column_renames(clause: &str) -> Vec<(String, String)> {
	let mut found: Vec<(usize, String, String)> = CHANGE_REGEX
		.captures_iter(clause)
		.chain(RENAME_COLUMN_REGEX.captures_iter(clause))
		.filter_map(|c| {
			let start = c.get(0)?.start();
			Some((start, unquote(&c[1]), unquote(&c[2])))
		})
		.filter(|(_, old, new)| old != new)
		.collect();
	found.sort_by_key(|(start, _, _)| *start);
	found.into_iter().map(|(_, old, new)| (old, new)).collect()
}

/// Columns removed by `DROP [COLUMN] name`
pub fn dropped_columns(clause: &str) -> Vec<String> {
	DROP_REGEX
		.captures_iter(clause)
		.filter(|c| {
			let name = &c[2];
			let explicit = c.get(1).is_some();
			explicit
				|| name.starts_with('`')
				|| !DROP_KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(name))
		})
		.map(|c| unquote(&c[2]))
		.collect()
}

/// Constraint names removed by `DROP {FOREIGN KEY | CHECK | CONSTRAINT} name`
pub fn dropped_constraints(clause: &str) -> Vec<String> {
	split_top_level(clause)
		.into_iter()
		.filter_map(|item| DROP_CONSTRAINT_REGEX.captures(item))
		.map(|c| unquote(&c[2]))
		.collect()
}

/// Remove constraint drops that the shadow table cannot apply
pub fn strip_constraint_drops(clause: &str, is_held: impl Fn(&str) -> bool) -> String {
	split_top_level(clause)
		.into_iter()
		.filter(|item| match DROP_CONSTRAINT_REGEX.captures(item) {
			Some(c) if c[1].eq_ignore_ascii_case("constraint") => !is_held(&unquote(&c[2])),
			Some(_) => false,
			None => true,
		})
		.map(str::trim)
		.filter(|item| !item.is_empty())
		.collect::<Vec<_>>()
		.join(", ")
}

/// Split on commas outside parentheses, quotes and backticks
fn split_top_level(clause: &str) -> Vec<&str> {
	let mut items = Vec::new();
	let mut depth = 0usize;
	let mut quote: Option<char> = None;
	let mut start = 0;

	for (i, ch) in clause.char_indices() {
		match (quote, ch) {
			(Some(q), c) if c == q => quote = None,
			(Some(_), _) => {}
			(None, '`' | '\'' | '"') => quote = Some(ch),
			(None, '(') => depth += 1,
			(None, ')') => depth = depth.saturating_sub(1),
			(None, ',') if depth == 0 => {
				items.push(&clause[start..i]);
				start = i + 1;
			}
			_ => {}
		}
	}
	items.push(&clause[start..]);
	items
}

fn unquote(ident: &str) -> String {
	match ident.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
		Some(inner) => inner.replace("``", "`"),
		None => ident.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn parse(statement: &str) -> AlterStatement {
		RegexAlterParser.parse(statement).unwrap()
	}

	#[rstest]
	#[case("ALTER TABLE users ADD COLUMN age int", None, "users", "ADD COLUMN age int")]
	#[case("alter table `shop`.`orders` add `note` text;", Some("shop"), "orders", "add `note` text")]
	#[case("  Alter Table shop . orders\n  drop column note ;  ", Some("shop"), "orders", "drop column note")]
	#[case("ALTER TABLE `we``ird` ENGINE=InnoDB", None, "we`ird", "ENGINE=InnoDB")]
	fn test_parse_table_identity(
		#[case] statement: &str,
		#[case] schema: Option<&str>,
		#[case] table: &str,
		#[case] clause: &str,
	) {
		let parsed = parse(statement);
		assert_eq!(parsed.schema.as_deref(), schema);
		assert_eq!(parsed.table, table);
		assert_eq!(parsed.clause, clause);
	}

	#[rstest]
	#[case("")]
	#[case(";")]
	#[case("ALTER TABLE t")]
	#[case("CREATE TABLE t (id int)")]
	#[case("ALTER TABLE t ADD a int; ALTER TABLE t ADD b int")]
	#[case("ALTER TABLE t ADD a int; select 1")]
	fn test_parse_rejects(#[case] statement: &str) {
		assert!(matches!(
			RegexAlterParser.parse(statement),
			Err(AlterError::Parse(_))
		));
	}

	#[test]
	fn test_renames_in_clause_order() {
		let clause = "CHANGE COLUMN `name` `full_name` varchar(100), \
			RENAME COLUMN created TO created_at, \
			change qty quantity int, \
			CHANGE COLUMN price price decimal(12,2)";
		assert_eq!(
			column_renames(clause),
			vec![
				("name".to_string(), "full_name".to_string()),
				("created".to_string(), "created_at".to_string()),
				("qty".to_string(), "quantity".to_string()),
			]
		);
	}

	#[rstest]
	#[case("DROP COLUMN note", vec!["note"])]
	#[case("drop note, drop `legacy`", vec!["note", "legacy"])]
	#[case("DROP INDEX idx_name, DROP PRIMARY KEY, ADD PRIMARY KEY (id)", vec![])]
	#[case("DROP FOREIGN KEY fk_user, DROP CHECK chk_qty", vec![])]
	#[case("ALTER COLUMN qty DROP DEFAULT", vec![])]
	#[case("DROP `key`", vec!["key"])]
	#[case("DROP COLUMN `index`", vec!["index"])]
	fn test_dropped_columns(#[case] clause: &str, #[case] expected: Vec<&str>) {
		assert_eq!(dropped_columns(clause), expected);
	}

	#[test]
	fn test_drop_after_change_is_reported() {
		let parsed = parse("ALTER TABLE t CHANGE COLUMN x y int, DROP COLUMN x");
		assert_eq!(parsed.renames, vec![("x".to_string(), "y".to_string())]);
		assert_eq!(parsed.drops, vec!["x".to_string()]);
	}

	#[test]
	fn test_foreign_key_drops_are_stripped_from_shadow_clause() {
		let parsed =
			parse("ALTER TABLE orders DROP FOREIGN KEY `fk_user`, ADD COLUMN note varchar(20) DEFAULT 'a,b'");
		assert_eq!(parsed.dropped_constraints, vec!["fk_user".to_string()]);
		assert_eq!(
			parsed.shadow_clause(|_| false).as_deref(),
			Some("ADD COLUMN note varchar(20) DEFAULT 'a,b'")
		);
	}

	#[test]
	fn test_shadow_clause_empty_when_only_foreign_keys_dropped() {
		let parsed = parse("ALTER TABLE orders DROP FOREIGN KEY fk_a, DROP FOREIGN KEY fk_b");
		assert_eq!(parsed.dropped_constraints, vec!["fk_a", "fk_b"]);
		assert_eq!(parsed.shadow_clause(|_| false), None);
	}

	#[test]
	fn test_check_drops_are_stripped_and_named_constraints_only_when_held() {
		let parsed = parse(
			"ALTER TABLE orders DROP CHECK chk_qty, DROP CONSTRAINT `chk_price`, \
			DROP CONSTRAINT uq_code, ADD COLUMN note text",
		);
		assert_eq!(parsed.dropped_constraints, vec!["chk_qty", "chk_price", "uq_code"]);
		assert_eq!(
			parsed.shadow_clause(|name| name == "chk_price").as_deref(),
			Some("DROP CONSTRAINT uq_code, ADD COLUMN note text")
		);
	}

	#[rstest]
	#[case("ALTER TABLE `t`ADD c int", "t", "ADD c int")]
	#[case("ALTER TABLE `shop`.`t`DROP COLUMN c", "t", "DROP COLUMN c")]
	#[case("alter table `t`\nadd c int", "t", "add c int")]
	fn test_no_space_needed_after_quoted_table(
		#[case] statement: &str,
		#[case] table: &str,
		#[case] clause: &str,
	) {
		let parsed = parse(statement);
		assert_eq!(parsed.table, table);
		assert_eq!(parsed.clause, clause);
	}

	#[test]
	fn test_bare_table_still_needs_separator() {
		assert!(matches!(
			RegexAlterParser.parse("ALTER TABLE usersADD c int"),
			Ok(AlterStatement { ref table, .. }) if table == "usersADD"
		));
		assert!(RegexAlterParser.parse("ALTER TABLE users").is_err());
	}

	#[test]
	fn test_split_respects_parentheses() {
		assert_eq!(
			split_top_level("ADD c decimal(10,2), ADD INDEX i (a, b)"),
			vec!["ADD c decimal(10,2)", " ADD INDEX i (a, b)"]
		);
	}
}
