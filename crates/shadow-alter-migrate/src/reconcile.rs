//! Column reconciliation between the original and the shadow table

use indexmap::IndexMap;
use shadow_alter_backends::ValueKind;

use crate::error::{AlterError, Result};
use crate::introspect::TableSchema;

/// Old column name to new column name
///
/// Built from the old table's columns, overlaid with the renames found in the
/// alteration, minus the dropped columns. A drop always wins over a rename of
/// the same column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
	names: IndexMap<String, String>,
}

impl ColumnMapping {
	pub fn build(old: &TableSchema, renames: &[(String, String)], drops: &[String]) -> Self {
		let mut names: IndexMap<String, String> = old
			.columns
			.iter()
			.map(|c| (c.name.clone(), c.name.clone()))
			.collect();

		for (from, to) in renames {
			if let Some(column) = old.column(from) {
				names.insert(column.name.clone(), to.clone());
			}
		}
		for dropped in drops {
			names.retain(|old_name, _| !old_name.eq_ignore_ascii_case(dropped));
		}

		Self { names }
	}

	/// New name for an old column, `None` when the column is dropped
	pub fn get(&self, old_name: &str) -> Option<&str> {
		self.names.get(old_name).map(String::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.names.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}
}

/// A column carried from the original table into the shadow table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedColumn {
	pub old: String,
	pub new: String,
	/// Slot of the original column; values are read and written through it
	pub kind: ValueKind,
}

/// Everything the triggers and the copier need to move rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
	/// Carried columns in the original table's ordinal order
	pub projection: Vec<ProjectedColumn>,
	/// Key used to match rows across tables and to paginate the backfill
	pub key: Vec<ProjectedColumn>,
}

impl Reconciliation {
	pub fn kept_old(&self) -> impl Iterator<Item = &str> {
		self.projection.iter().map(|c| c.old.as_str())
	}

	pub fn kept_new(&self) -> impl Iterator<Item = &str> {
		self.projection.iter().map(|c| c.new.as_str())
	}

	pub fn old_key(&self) -> impl Iterator<Item = &str> {
		self.key.iter().map(|c| c.old.as_str())
	}

	pub fn new_key(&self) -> impl Iterator<Item = &str> {
		self.key.iter().map(|c| c.new.as_str())
	}
}

/// Compute the projection and the primary key used on both sides
///
/// Generated columns of the new table are never written, so they never
/// appear in the projection. When the primary key changes shape, the larger
/// key is used if it contains the smaller one; any other change is rejected
/// as ambiguous.
pub fn reconcile(
	old: &TableSchema,
	new: &TableSchema,
	mapping: &ColumnMapping,
) -> Result<Reconciliation> {
	let mut projection = Vec::new();
	for column in &old.columns {
		let Some(new_name) = mapping.get(&column.name) else {
			continue;
		};
		let Some(target) = new.column(new_name) else {
			continue;
		};
		if target.is_generated() {
			continue;
		}
		projection.push(ProjectedColumn {
			old: column.name.clone(),
			new: target.name.clone(),
			kind: column.value_kind()?,
		});
	}

	if projection.is_empty() {
		return Err(AlterError::Reconciliation(format!(
			"no column of {} survives into {}",
			old.table, new.table
		)));
	}

	let old_key: Vec<&ProjectedColumn> = old
		.primary_key
		.iter()
		.filter_map(|name| projection.iter().find(|c| c.old.eq_ignore_ascii_case(name)))
		.collect();
	if old_key.is_empty() {
		return Err(AlterError::Reconciliation(format!(
			"{} has no primary key carried into {}; rows cannot be paginated or matched",
			old.table, new.table
		)));
	}

	let new_key: Vec<&ProjectedColumn> = new
		.primary_key
		.iter()
		.filter_map(|name| projection.iter().find(|c| c.new.eq_ignore_ascii_case(name)))
		.collect();

	let key = if old_key.len() == new_key.len() {
		old_key
	} else {
		let shared = old_key
			.iter()
			.filter(|o| new_key.iter().any(|n| n.new == o.new))
			.count();
		if shared == old_key.len() {
			new_key
		} else if shared == new_key.len() {
			old_key
		} else {
			return Err(AlterError::Reconciliation(format!(
				"primary key of {} changes both columns and size ({} -> {}); \
				rows cannot be matched across tables",
				old.table,
				old_key.len(),
				new_key.len()
			)));
		}
	};

	let key = key.into_iter().cloned().collect();
	Ok(Reconciliation { projection, key })
}
