use serde::{Deserialize, Serialize};

/// Document lifecycle. A document is immutable once `Indexed` except for
/// re-embedding after a model-version change.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
	Received,
	Chunked,
	Embedded,
	Indexed,
	Failed,
}
impl DocumentState {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Received => "received",
			Self::Chunked => "chunked",
			Self::Embedded => "embedded",
			Self::Indexed => "indexed",
			Self::Failed => "failed",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"received" => Some(Self::Received),
			"chunked" => Some(Self::Chunked),
			"embedded" => Some(Self::Embedded),
			"indexed" => Some(Self::Indexed),
			"failed" => Some(Self::Failed),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
	Document,
	Table,
}
impl TargetKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Document => "document",
			Self::Table => "table",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"document" => Some(Self::Document),
			"table" => Some(Self::Table),
			_ => None,
		}
	}
}

/// Pipeline stage of an ingestion run, in execution order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
	Received,
	Normalizing,
	Deduplicating,
	Embedding,
	Indexing,
}
impl RunStage {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Received => "received",
			Self::Normalizing => "normalizing",
			Self::Deduplicating => "deduplicating",
			Self::Embedding => "embedding",
			Self::Indexing => "indexing",
		}
	}
}

/// Run state: the live stages followed by a terminal outcome.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
	Received,
	Normalizing,
	Deduplicating,
	Embedding,
	Indexing,
	Succeeded,
	Partial,
	Failed,
}
impl RunState {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Received => "received",
			Self::Normalizing => "normalizing",
			Self::Deduplicating => "deduplicating",
			Self::Embedding => "embedding",
			Self::Indexing => "indexing",
			Self::Succeeded => "succeeded",
			Self::Partial => "partial",
			Self::Failed => "failed",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"received" => Some(Self::Received),
			"normalizing" => Some(Self::Normalizing),
			"deduplicating" => Some(Self::Deduplicating),
			"embedding" => Some(Self::Embedding),
			"indexing" => Some(Self::Indexing),
			"succeeded" => Some(Self::Succeeded),
			"partial" => Some(Self::Partial),
			"failed" => Some(Self::Failed),
			_ => None,
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Succeeded | Self::Partial | Self::Failed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn terminal_states_are_recognized() {
		assert!(RunState::Succeeded.is_terminal());
		assert!(RunState::Partial.is_terminal());
		assert!(RunState::Failed.is_terminal());
		assert!(!RunState::Embedding.is_terminal());
	}

	#[test]
	fn states_round_trip_through_strings() {
		for state in [
			RunState::Received,
			RunState::Normalizing,
			RunState::Deduplicating,
			RunState::Embedding,
			RunState::Indexing,
			RunState::Succeeded,
			RunState::Partial,
			RunState::Failed,
		] {
			assert_eq!(RunState::parse(state.as_str()), Some(state));
		}
	}
}
