pub mod memory;
pub mod qdrant;
pub mod sparse;

mod error;

pub use error::{Error, Result};
pub use memory::MemoryDenseIndex;
pub use qdrant::QdrantDenseIndex;
pub use sparse::{SparseDoc, SparseHit, SparseIndex, TantivySparseIndex};

use std::{future::Future, pin::Pin};

use uuid::Uuid;

use sift_domain::Visibility;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One vector plus the metadata the index pre-filters on.
#[derive(Clone, Debug)]
pub struct VectorPoint {
	pub chunk_id: Uuid,
	pub vector: Vec<f32>,
	pub payload: PointPayload,
}

#[derive(Clone, Debug)]
pub struct PointPayload {
	pub document_id: Uuid,
	pub ordinal: i32,
	pub visibility: Visibility,
	pub source_type: String,
	pub tags: Vec<String>,
	/// Dedup cluster representatives are searchable as near-duplicate
	/// candidates; duplicates are not.
	pub representative: bool,
	pub embedding_version: String,
}

/// Metadata predicates applied before similarity ranking, never as a
/// post-hoc cut of an already limited top-K.
#[derive(Clone, Debug, Default)]
pub struct SearchFilter {
	/// Allowed visibility scopes; `None` skips the scope check (internal
	/// maintenance paths only — retrieval always sets it).
	pub visibility: Option<Vec<Visibility>>,
	/// Every listed tag must be present.
	pub tags: Vec<String>,
	/// Any-of; empty accepts all source types.
	pub source_types: Vec<String>,
	pub representatives_only: bool,
}
impl SearchFilter {
	pub fn matches(&self, payload: &PointPayload) -> bool {
		if let Some(allowed) = self.visibility.as_ref()
			&& !allowed.contains(&payload.visibility)
		{
			return false;
		}
		if !self.tags.iter().all(|tag| payload.tags.iter().any(|have| have == tag)) {
			return false;
		}
		if !self.source_types.is_empty()
			&& !self.source_types.iter().any(|kind| kind == &payload.source_type)
		{
			return false;
		}
		if self.representatives_only && !payload.representative {
			return false;
		}

		true
	}
}

#[derive(Clone, Debug)]
pub struct ScoredChunk {
	pub chunk_id: Uuid,
	pub score: f32,
	pub payload: PointPayload,
}

/// Tenant-namespaced dense vector index. The namespace is a mandatory
/// parameter on every operation, so cross-tenant reads are structurally
/// impossible. Upserts are idempotent by chunk id. Consistency is eventual;
/// callers must not assume read-your-write.
pub trait DenseIndex
where
	Self: Send + Sync,
{
	fn ensure_namespace<'a>(&'a self, tenant: &'a str) -> BoxFuture<'a, Result<()>>;

	fn upsert<'a>(
		&'a self,
		tenant: &'a str,
		points: Vec<VectorPoint>,
	) -> BoxFuture<'a, Result<()>>;

	fn delete<'a>(&'a self, tenant: &'a str, chunk_ids: &'a [Uuid]) -> BoxFuture<'a, Result<()>>;

	fn search<'a>(
		&'a self,
		tenant: &'a str,
		query: &'a [f32],
		filter: &'a SearchFilter,
		k: u32,
	) -> BoxFuture<'a, Result<Vec<ScoredChunk>>>;
}

pub fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
	let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

	if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
		0.0
	} else {
		dot / (mag_a * mag_b)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn payload(visibility: Visibility, tags: &[&str], source_type: &str) -> PointPayload {
		PointPayload {
			document_id: Uuid::new_v4(),
			ordinal: 0,
			visibility,
			source_type: source_type.to_string(),
			tags: tags.iter().map(|tag| tag.to_string()).collect(),
			representative: true,
			embedding_version: "m:4".to_string(),
		}
	}

	#[test]
	fn cosine_handles_degenerate_inputs() {
		assert_eq!(cosine_sim(&[], &[]), 0.0);
		assert_eq!(cosine_sim(&[1.0, 0.0], &[1.0]), 0.0);
		assert_eq!(cosine_sim(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
		assert!((cosine_sim(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
	}

	#[test]
	fn filter_enforces_visibility_and_tags() {
		let filter = SearchFilter {
			visibility: Some(vec![Visibility::Public]),
			tags: vec!["hr".to_string()],
			source_types: Vec::new(),
			representatives_only: false,
		};

		assert!(filter.matches(&payload(Visibility::Public, &["hr", "policy"], "document")));
		assert!(!filter.matches(&payload(Visibility::Restricted, &["hr"], "document")));
		assert!(!filter.matches(&payload(Visibility::Public, &["policy"], "document")));
	}

	#[test]
	fn filter_source_types_are_any_of() {
		let filter = SearchFilter {
			visibility: None,
			tags: Vec::new(),
			source_types: vec!["table".to_string()],
			representatives_only: false,
		};

		assert!(filter.matches(&payload(Visibility::Public, &[], "table")));
		assert!(!filter.matches(&payload(Visibility::Public, &[], "document")));
	}
}
