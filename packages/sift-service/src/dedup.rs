use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Result, Service};
use sift_config::TenantConfig;
use sift_index::SearchFilter;
use sift_storage::{clusters, models};

/// Outcome of the exact (digest) tier, resolved before any embedding call.
#[derive(Clone, Copy, Debug)]
pub enum ExactOutcome {
	/// The digest is already clustered; the new chunk attaches as a
	/// duplicate and skips embedding entirely.
	Duplicate { cluster_id: Uuid },
	Fresh,
}

/// Outcome of the near-duplicate tier, resolved after embedding via the
/// vector index's own top-K search instead of pairwise comparison.
#[derive(Clone, Copy, Debug)]
pub enum NearOutcome {
	/// Cosine similarity to an existing representative met the merge
	/// threshold.
	Merged { cluster_id: Uuid },
	/// Borderline similarity, flagged for manual review; the chunk keeps
	/// its own cluster until resolved.
	Review { cluster_id: Uuid, similarity: f32 },
	/// A new cluster with this chunk as its representative.
	Representative { cluster_id: Uuid },
}
impl NearOutcome {
	pub fn cluster_id(&self) -> Uuid {
		match self {
			Self::Merged { cluster_id }
			| Self::Review { cluster_id, .. }
			| Self::Representative { cluster_id } => *cluster_id,
		}
	}
}

impl Service {
	/// Caller must hold the tenant lock.
	pub(crate) async fn dedup_exact_tier(
		&self,
		tenant_id: &str,
		content_hash: &str,
	) -> Result<ExactOutcome> {
		match clusters::find_cluster_by_hash(&self.db.pool, tenant_id, content_hash).await? {
			Some(cluster) => {
				clusters::attach_member(&self.db.pool, cluster.cluster_id).await?;

				Ok(ExactOutcome::Duplicate { cluster_id: cluster.cluster_id })
			},
			None => Ok(ExactOutcome::Fresh),
		}
	}

	/// Caller must hold the tenant lock.
	pub(crate) async fn dedup_near_tier(
		&self,
		tenant_cfg: &TenantConfig,
		chunk: &models::ChunkRecord,
		vector: &[f32],
		now: OffsetDateTime,
	) -> Result<NearOutcome> {
		let tenant_id = tenant_cfg.tenant_id.as_str();
		let dedup = &tenant_cfg.dedup;
		let filter = SearchFilter { representatives_only: true, ..SearchFilter::default() };
		let candidates = self
			.dense
			.search(tenant_id, vector, &filter, dedup.candidate_k)
			.await?;
		let best = candidates.first();

		if let Some(best) = best
			&& best.score >= dedup.threshold
		{
			let cluster =
				clusters::find_cluster_by_representative(&self.db.pool, best.chunk_id).await?;

			if let Some(cluster) = cluster {
				clusters::attach_member(&self.db.pool, cluster.cluster_id).await?;

				tracing::debug!(
					tenant_id,
					chunk_id = %chunk.chunk_id,
					cluster_id = %cluster.cluster_id,
					similarity = best.score,
					"Merged near-duplicate chunk into existing cluster."
				);

				return Ok(NearOutcome::Merged { cluster_id: cluster.cluster_id });
			}

			tracing::warn!(
				tenant_id,
				representative = %best.chunk_id,
				"Indexed representative has no cluster row. Creating a new cluster."
			);
		}

		let cluster_id =
			self.create_cluster(tenant_id, chunk, dedup.threshold, now).await?;

		if let Some(best) = best
			&& best.score >= dedup.threshold - dedup.review_band
		{
			let review = models::ReviewRecord {
				review_id: Uuid::new_v4(),
				tenant_id: tenant_id.to_string(),
				chunk_id: chunk.chunk_id,
				cluster_id,
				similarity: best.score,
				created_at: now,
			};

			clusters::insert_review(&self.db.pool, &review).await?;

			tracing::info!(
				tenant_id,
				chunk_id = %chunk.chunk_id,
				similarity = best.score,
				"Borderline near-duplicate queued for review."
			);

			return Ok(NearOutcome::Review { cluster_id, similarity: best.score });
		}

		Ok(NearOutcome::Representative { cluster_id })
	}

	async fn create_cluster(
		&self,
		tenant_id: &str,
		chunk: &models::ChunkRecord,
		threshold: f32,
		now: OffsetDateTime,
	) -> Result<Uuid> {
		let cluster = models::ClusterRecord {
			cluster_id: Uuid::new_v4(),
			tenant_id: tenant_id.to_string(),
			representative_chunk_id: chunk.chunk_id,
			content_hash: chunk.content_hash.clone(),
			threshold,
			member_count: 1,
			created_at: now,
		};

		clusters::insert_cluster(&self.db.pool, &cluster).await?;

		Ok(cluster.cluster_id)
	}

	/// Undo cluster membership when a chunk is removed (re-ingestion of
	/// changed content). A representative's cluster is handed to another
	/// member, or deleted with its last member.
	pub(crate) async fn release_cluster_membership(
		&self,
		chunk: &models::ChunkRecord,
	) -> Result<()> {
		let Some(cluster_id) = chunk.cluster_id else {
			return Ok(());
		};
		let Some(cluster) = clusters::fetch_cluster(&self.db.pool, cluster_id).await? else {
			return Ok(());
		};

		if cluster.representative_chunk_id == chunk.chunk_id {
			match clusters::find_other_member(&self.db.pool, cluster_id, chunk.chunk_id).await? {
				Some(next_representative) => {
					clusters::promote_representative(&self.db.pool, cluster_id, next_representative)
						.await?;
					clusters::detach_member(&self.db.pool, cluster_id).await?;
				},
				None => {
					clusters::delete_cluster(&self.db.pool, cluster_id).await?;
				},
			}
		} else {
			clusters::detach_member(&self.db.pool, cluster_id).await?;
		}

		Ok(())
	}
}
