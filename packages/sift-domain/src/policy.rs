use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column masking and row scoping for one (tenant, role) pair. Denied
/// columns are excluded at query build; row filters are injected into every
/// execution and cannot be overridden by the query intent.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ColumnPolicy {
	#[serde(default)]
	pub masked_columns: Vec<String>,
	#[serde(default)]
	pub row_filters: Vec<RowFilter>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RowFilter {
	pub column: String,
	pub equals: Value,
}

impl ColumnPolicy {
	pub fn denies(&self, column: &str) -> bool {
		self.masked_columns.iter().any(|masked| masked == column)
	}

	/// First requested column the policy masks, if any.
	pub fn first_denied<'a, I>(&self, requested: I) -> Option<&'a str>
	where
		I: IntoIterator<Item = &'a str>,
	{
		requested.into_iter().find(|column| self.denies(column))
	}
}

/// Table and column names accepted by the catalog. Anything else is
/// rejected before query build.
pub fn is_valid_identifier(name: &str) -> bool {
	static IDENT: OnceLock<Regex> = OnceLock::new();

	let re = IDENT.get_or_init(|| {
		Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").expect("Identifier pattern is valid.")
	});

	re.is_match(name)
}
