use serde::{Deserialize, Serialize};

/// Visibility scope assigned at ingestion and enforced as a pre-filter at
/// query time. Restricted content never surfaces to callers whose scope set
/// excludes it, regardless of rank.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
	Public,
	Internal,
	Restricted,
}
impl Visibility {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Public => "public",
			Self::Internal => "internal",
			Self::Restricted => "restricted",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"public" => Some(Self::Public),
			"internal" => Some(Self::Internal),
			"restricted" => Some(Self::Restricted),
			_ => None,
		}
	}
}
