use sqlx::SqliteExecutor;
use uuid::Uuid;

use crate::{
	Result,
	models::{ClusterRecord, ReviewRecord},
};

pub async fn find_cluster_by_hash(
	executor: impl SqliteExecutor<'_>,
	tenant_id: &str,
	content_hash: &str,
) -> Result<Option<ClusterRecord>> {
	let record = sqlx::query_as::<_, ClusterRecord>(
		"SELECT * FROM dedup_clusters WHERE tenant_id = ? AND content_hash = ?",
	)
	.bind(tenant_id)
	.bind(content_hash)
	.fetch_optional(executor)
	.await?;

	Ok(record)
}

pub async fn fetch_cluster(
	executor: impl SqliteExecutor<'_>,
	cluster_id: Uuid,
) -> Result<Option<ClusterRecord>> {
	let record =
		sqlx::query_as::<_, ClusterRecord>("SELECT * FROM dedup_clusters WHERE cluster_id = ?")
			.bind(cluster_id)
			.fetch_optional(executor)
			.await?;

	Ok(record)
}

pub async fn find_cluster_by_representative(
	executor: impl SqliteExecutor<'_>,
	representative_chunk_id: Uuid,
) -> Result<Option<ClusterRecord>> {
	let record = sqlx::query_as::<_, ClusterRecord>(
		"SELECT * FROM dedup_clusters WHERE representative_chunk_id = ?",
	)
	.bind(representative_chunk_id)
	.fetch_optional(executor)
	.await?;

	Ok(record)
}

pub async fn insert_cluster(
	executor: impl SqliteExecutor<'_>,
	cluster: &ClusterRecord,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO dedup_clusters (
	cluster_id,
	tenant_id,
	representative_chunk_id,
	content_hash,
	threshold,
	member_count,
	created_at
)
VALUES (?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(cluster.cluster_id)
	.bind(cluster.tenant_id.as_str())
	.bind(cluster.representative_chunk_id)
	.bind(cluster.content_hash.as_str())
	.bind(cluster.threshold)
	.bind(cluster.member_count)
	.bind(cluster.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn attach_member(executor: impl SqliteExecutor<'_>, cluster_id: Uuid) -> Result<()> {
	sqlx::query("UPDATE dedup_clusters SET member_count = member_count + 1 WHERE cluster_id = ?")
		.bind(cluster_id)
		.execute(executor)
		.await?;

	Ok(())
}

/// Promote another member as the cluster's canonical representative.
pub async fn promote_representative(
	executor: impl SqliteExecutor<'_>,
	cluster_id: Uuid,
	representative_chunk_id: Uuid,
) -> Result<()> {
	sqlx::query("UPDATE dedup_clusters SET representative_chunk_id = ? WHERE cluster_id = ?")
		.bind(representative_chunk_id)
		.bind(cluster_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn detach_member(executor: impl SqliteExecutor<'_>, cluster_id: Uuid) -> Result<()> {
	sqlx::query(
		"UPDATE dedup_clusters SET member_count = MAX(member_count - 1, 0) WHERE cluster_id = ?",
	)
	.bind(cluster_id)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn delete_cluster(executor: impl SqliteExecutor<'_>, cluster_id: Uuid) -> Result<()> {
	sqlx::query("DELETE FROM dedup_clusters WHERE cluster_id = ?")
		.bind(cluster_id)
		.execute(executor)
		.await?;

	Ok(())
}

/// Another chunk of the cluster, if one exists beyond the given member.
pub async fn find_other_member(
	executor: impl SqliteExecutor<'_>,
	cluster_id: Uuid,
	excluding_chunk_id: Uuid,
) -> Result<Option<Uuid>> {
	let chunk_id: Option<Uuid> = sqlx::query_scalar(
		"SELECT chunk_id FROM chunks WHERE cluster_id = ? AND chunk_id <> ? LIMIT 1",
	)
	.bind(cluster_id)
	.bind(excluding_chunk_id)
	.fetch_optional(executor)
	.await?;

	Ok(chunk_id)
}

pub async fn count_clusters(executor: impl SqliteExecutor<'_>, tenant_id: &str) -> Result<i64> {
	let count: i64 =
		sqlx::query_scalar("SELECT COUNT(*) FROM dedup_clusters WHERE tenant_id = ?")
			.bind(tenant_id)
			.fetch_one(executor)
			.await?;

	Ok(count)
}

pub async fn insert_review(
	executor: impl SqliteExecutor<'_>,
	review: &ReviewRecord,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO dedup_reviews (review_id, tenant_id, chunk_id, cluster_id, similarity, created_at)
VALUES (?, ?, ?, ?, ?, ?)",
	)
	.bind(review.review_id)
	.bind(review.tenant_id.as_str())
	.bind(review.chunk_id)
	.bind(review.cluster_id)
	.bind(review.similarity)
	.bind(review.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn list_reviews(
	executor: impl SqliteExecutor<'_>,
	tenant_id: &str,
) -> Result<Vec<ReviewRecord>> {
	let records = sqlx::query_as::<_, ReviewRecord>(
		"SELECT * FROM dedup_reviews WHERE tenant_id = ? ORDER BY created_at",
	)
	.bind(tenant_id)
	.fetch_all(executor)
	.await?;

	Ok(records)
}
