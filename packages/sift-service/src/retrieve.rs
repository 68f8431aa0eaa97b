use std::{cmp::Ordering, collections::HashMap};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, Service};
use sift_config::FusionStrategy;
use sift_domain::Visibility;
use sift_index::SearchFilter;
use sift_storage::docs;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RetrieveRequest {
	pub tenant_id: String,
	pub role: String,
	pub query: String,
	/// Visibility scopes the caller may read; established by the external
	/// auth layer and enforced as a pre-filter on both candidate sets.
	pub allowed_visibility: Vec<Visibility>,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub source_types: Vec<String>,
	pub top_k: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RetrievalCandidate {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	pub source_type: String,
	pub ordinal: i32,
	pub snippet: String,
	pub dense_score: f32,
	pub sparse_score: f32,
	pub fused_score: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct RetrieveResponse {
	pub candidates: Vec<RetrievalCandidate>,
}

const SNIPPET_CHARS: usize = 240;

impl Service {
	/// Hybrid retrieval: dense and sparse candidates under the caller's
	/// visibility scopes, normalized and fused into one ranking.
	pub async fn retrieve(&self, req: RetrieveRequest) -> Result<RetrieveResponse> {
		validate_retrieve(&req)?;

		let tenant_cfg = self.cfg.tenant(&req.tenant_id);
		let retrieval = &tenant_cfg.retrieval;
		let top_k = req.top_k.unwrap_or(retrieval.top_k).max(1);
		let filter = SearchFilter {
			visibility: Some(req.allowed_visibility.clone()),
			tags: req.tags.clone(),
			source_types: req.source_types.clone(),
			representatives_only: false,
		};
		let model_override = tenant_cfg.embedding_model.as_deref();
		let embeddings = self.broker.embed(&[req.query.clone()], model_override).await?;
		let query_vector = embeddings.vectors.into_iter().next().ok_or_else(|| {
			Error::ProviderUnavailable {
				message: "Embedding provider returned no query vector.".to_string(),
			}
		})?;
		let dense_hits = self
			.dense
			.search(&req.tenant_id, &query_vector, &filter, retrieval.candidate_n)
			.await?;
		let sparse_hits =
			self.sparse.search(&req.tenant_id, &req.query, &filter, retrieval.candidate_n)?;
		let dense_scores: Vec<(Uuid, f32)> =
			dense_hits.iter().map(|hit| (hit.chunk_id, hit.score)).collect();
		let sparse_scores: Vec<(Uuid, f32)> =
			sparse_hits.iter().map(|hit| (hit.chunk_id, hit.score)).collect();
		let fused = match retrieval.strategy {
			FusionStrategy::Weighted => fuse_weighted(
				&dense_scores,
				&sparse_scores,
				retrieval.dense_weight,
				retrieval.sparse_weight,
			),
			FusionStrategy::Rrf => fuse_rrf(&dense_scores, &sparse_scores, retrieval.rrf_k),
		};
		let chunk_ids: Vec<Uuid> = fused.keys().copied().collect();
		let chunk_rows = docs::fetch_chunks(&self.db.pool, &chunk_ids).await?;
		let recency: HashMap<Uuid, OffsetDateTime> =
			chunk_rows.iter().map(|chunk| (chunk.chunk_id, chunk.created_at)).collect();
		let mut ranked: Vec<(Uuid, FusedScore)> = fused.into_iter().collect();

		ranked.sort_by(|(left_id, left), (right_id, right)| {
			cmp_f32_desc(left.fused, right.fused)
				.then_with(|| {
					let lhs = recency.get(left_id);
					let rhs = recency.get(right_id);

					rhs.cmp(&lhs)
				})
				.then_with(|| left_id.cmp(right_id))
		});
		ranked.truncate(top_k as usize);

		let by_id: HashMap<Uuid, &sift_storage::models::ChunkRecord> =
			chunk_rows.iter().map(|chunk| (chunk.chunk_id, chunk)).collect();
		let mut candidates = Vec::with_capacity(ranked.len());

		for (chunk_id, score) in ranked {
			let Some(chunk) = by_id.get(&chunk_id) else {
				tracing::warn!(chunk_id = %chunk_id, "Fused candidate has no chunk row.");

				continue;
			};

			candidates.push(RetrievalCandidate {
				chunk_id,
				document_id: chunk.document_id,
				source_type: chunk.source_type.clone(),
				ordinal: chunk.ordinal,
				snippet: snippet(&chunk.text),
				dense_score: score.dense,
				sparse_score: score.sparse,
				fused_score: score.fused,
			});
		}

		tracing::info!(
			tenant_id = %req.tenant_id,
			role = %req.role,
			dense_candidates = dense_scores.len(),
			sparse_candidates = sparse_scores.len(),
			returned = candidates.len(),
			"Retrieval completed."
		);

		Ok(RetrieveResponse { candidates })
	}
}

fn validate_retrieve(req: &RetrieveRequest) -> Result<()> {
	if req.tenant_id.trim().is_empty() {
		return Err(Error::Validation { message: "tenant_id is required.".to_string() });
	}
	if req.query.trim().is_empty() {
		return Err(Error::Validation { message: "Query text is empty.".to_string() });
	}
	if req.allowed_visibility.is_empty() {
		return Err(Error::Validation {
			message: "allowed_visibility must name at least one scope.".to_string(),
		});
	}

	Ok(())
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FusedScore {
	pub(crate) dense: f32,
	pub(crate) sparse: f32,
	pub(crate) fused: f32,
}

/// Min-max normalization within one candidate set. A uniform set maps to
/// all ones rather than dividing by zero.
pub(crate) fn min_max_normalize(scores: &[(Uuid, f32)]) -> HashMap<Uuid, f32> {
	if scores.is_empty() {
		return HashMap::new();
	}

	let min = scores.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
	let max = scores.iter().map(|(_, s)| *s).fold(f32::NEG_INFINITY, f32::max);

	if (max - min).abs() < f32::EPSILON {
		return scores.iter().map(|(id, _)| (*id, 1.0)).collect();
	}

	scores.iter().map(|(id, s)| (*id, (s - min) / (max - min))).collect()
}

/// Weighted-sum fusion over independently normalized component scores. A
/// candidate absent from one set contributes zero for that component.
pub(crate) fn fuse_weighted(
	dense: &[(Uuid, f32)],
	sparse: &[(Uuid, f32)],
	dense_weight: f32,
	sparse_weight: f32,
) -> HashMap<Uuid, FusedScore> {
	let dense_norm = min_max_normalize(dense);
	let sparse_norm = min_max_normalize(sparse);
	let mut out: HashMap<Uuid, FusedScore> = HashMap::new();

	for (id, norm) in &dense_norm {
		out.entry(*id).or_default().dense = *norm;
	}
	for (id, norm) in &sparse_norm {
		out.entry(*id).or_default().sparse = *norm;
	}
	for score in out.values_mut() {
		score.fused = weighted_sum(score.dense, score.sparse, dense_weight, sparse_weight);
	}

	out
}

pub(crate) fn weighted_sum(
	dense: f32,
	sparse: f32,
	dense_weight: f32,
	sparse_weight: f32,
) -> f32 {
	dense_weight * dense + sparse_weight * sparse
}

/// Reciprocal-rank fusion; component fields carry the rank contributions so
/// provenance stays inspectable.
pub(crate) fn fuse_rrf(
	dense: &[(Uuid, f32)],
	sparse: &[(Uuid, f32)],
	rrf_k: u32,
) -> HashMap<Uuid, FusedScore> {
	let mut out: HashMap<Uuid, FusedScore> = HashMap::new();

	for (rank, (id, _)) in ranked_desc(dense).into_iter().enumerate() {
		let contribution = 1.0 / (rrf_k as f32 + rank as f32 + 1.0);
		let entry = out.entry(id).or_default();

		entry.dense = contribution;
		entry.fused += contribution;
	}
	for (rank, (id, _)) in ranked_desc(sparse).into_iter().enumerate() {
		let contribution = 1.0 / (rrf_k as f32 + rank as f32 + 1.0);
		let entry = out.entry(id).or_default();

		entry.sparse = contribution;
		entry.fused += contribution;
	}

	out
}

fn ranked_desc(scores: &[(Uuid, f32)]) -> Vec<(Uuid, f32)> {
	let mut sorted = scores.to_vec();

	sorted.sort_by(|(left_id, left), (right_id, right)| {
		cmp_f32_desc(*left, *right).then_with(|| left_id.cmp(right_id))
	});

	sorted
}

pub(crate) fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

fn snippet(text: &str) -> String {
	text.chars().take(SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(byte: u8) -> Uuid {
		Uuid::from_bytes([byte; 16])
	}

	#[test]
	fn normalization_maps_to_unit_interval() {
		let scores = vec![(id(1), 0.2), (id(2), 0.6), (id(3), 1.0)];
		let normalized = min_max_normalize(&scores);

		assert_eq!(normalized[&id(1)], 0.0);
		assert!((normalized[&id(2)] - 0.5).abs() < 1e-6);
		assert_eq!(normalized[&id(3)], 1.0);
	}

	#[test]
	fn uniform_scores_normalize_to_ones() {
		let scores = vec![(id(1), 0.4), (id(2), 0.4)];
		let normalized = min_max_normalize(&scores);

		assert_eq!(normalized[&id(1)], 1.0);
		assert_eq!(normalized[&id(2)], 1.0);
	}

	#[test]
	fn equal_weights_reproduce_reference_fusion() {
		// Chunk X: literal phrase match (sparse 1.0, dense 0.55). Chunk Y:
		// semantically related only (sparse 0.1, dense 0.80).
		let fused_x = weighted_sum(0.55, 1.0, 0.5, 0.5);
		let fused_y = weighted_sum(0.80, 0.1, 0.5, 0.5);

		assert!((fused_x - 0.775).abs() < 1e-6);
		assert!((fused_y - 0.45).abs() < 1e-6);
		assert!(fused_x > fused_y);
	}

	#[test]
	fn weighted_fusion_scores_missing_components_as_zero() {
		let dense = vec![(id(1), 0.9), (id(2), 0.1)];
		let sparse = vec![(id(3), 2.0), (id(2), 1.0)];
		let fused = fuse_weighted(&dense, &sparse, 0.5, 0.5);

		// id(1) has no sparse hit, id(3) has no dense hit.
		assert_eq!(fused[&id(1)].sparse, 0.0);
		assert_eq!(fused[&id(3)].dense, 0.0);
		assert!((fused[&id(1)].fused - 0.5).abs() < 1e-6);
		assert!((fused[&id(3)].fused - 0.5).abs() < 1e-6);
		// id(2) is last in both lists.
		assert_eq!(fused[&id(2)].fused, 0.0);
	}

	#[test]
	fn rrf_prefers_candidates_ranked_in_both_lists() {
		let dense = vec![(id(1), 0.9), (id(2), 0.8)];
		let sparse = vec![(id(2), 5.0), (id(3), 4.0)];
		let fused = fuse_rrf(&dense, &sparse, 60);
		let both = fused[&id(2)].fused;
		let dense_only = fused[&id(1)].fused;
		let sparse_only = fused[&id(3)].fused;

		assert!(both > dense_only);
		assert!(both > sparse_only);
	}

	#[test]
	fn nan_scores_sort_last() {
		assert_eq!(cmp_f32_desc(0.5, f32::NAN), Ordering::Less);
		assert_eq!(cmp_f32_desc(f32::NAN, 0.5), Ordering::Greater);
		assert_eq!(cmp_f32_desc(0.7, 0.3), Ordering::Less);
	}
}
