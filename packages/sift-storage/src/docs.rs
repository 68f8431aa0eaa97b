use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{ChunkEmbeddingRecord, ChunkRecord, DocumentRecord},
};

pub async fn fetch_document_by_source(
	executor: impl SqliteExecutor<'_>,
	tenant_id: &str,
	source_ref: &str,
) -> Result<Option<DocumentRecord>> {
	let record = sqlx::query_as::<_, DocumentRecord>(
		"SELECT * FROM documents WHERE tenant_id = ? AND source_ref = ?",
	)
	.bind(tenant_id)
	.bind(source_ref)
	.fetch_optional(executor)
	.await?;

	Ok(record)
}

pub async fn fetch_document(
	executor: impl SqliteExecutor<'_>,
	document_id: Uuid,
) -> Result<Option<DocumentRecord>> {
	let record =
		sqlx::query_as::<_, DocumentRecord>("SELECT * FROM documents WHERE document_id = ?")
			.bind(document_id)
			.fetch_optional(executor)
			.await?;

	Ok(record)
}

pub async fn insert_document(
	executor: impl SqliteExecutor<'_>,
	document: &DocumentRecord,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO documents (
	document_id,
	tenant_id,
	source_ref,
	content_hash,
	mime_type,
	title,
	author,
	tags,
	visibility,
	state,
	created_at,
	updated_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(document.document_id)
	.bind(document.tenant_id.as_str())
	.bind(document.source_ref.as_str())
	.bind(document.content_hash.as_str())
	.bind(document.mime_type.as_str())
	.bind(document.title.as_deref())
	.bind(document.author.as_deref())
	.bind(&document.tags)
	.bind(document.visibility.as_str())
	.bind(document.state.as_str())
	.bind(document.created_at)
	.bind(document.updated_at)
	.execute(executor)
	.await?;

	Ok(())
}

/// Refresh the mutable fields of an existing document before re-ingestion.
/// The document id and created_at stay stable.
pub async fn update_document_content(
	executor: impl SqliteExecutor<'_>,
	document: &DocumentRecord,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE documents
SET
	content_hash = ?,
	mime_type = ?,
	title = ?,
	author = ?,
	tags = ?,
	visibility = ?,
	state = ?,
	updated_at = ?
WHERE document_id = ?",
	)
	.bind(document.content_hash.as_str())
	.bind(document.mime_type.as_str())
	.bind(document.title.as_deref())
	.bind(document.author.as_deref())
	.bind(&document.tags)
	.bind(document.visibility.as_str())
	.bind(document.state.as_str())
	.bind(document.updated_at)
	.bind(document.document_id)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn update_document_state(
	executor: impl SqliteExecutor<'_>,
	document_id: Uuid,
	state: &str,
	updated_at: OffsetDateTime,
) -> Result<()> {
	sqlx::query("UPDATE documents SET state = ?, updated_at = ? WHERE document_id = ?")
		.bind(state)
		.bind(updated_at)
		.bind(document_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn fetch_chunk_ids_for_document(
	executor: impl SqliteExecutor<'_>,
	document_id: Uuid,
) -> Result<Vec<Uuid>> {
	let ids: Vec<Uuid> =
		sqlx::query_scalar("SELECT chunk_id FROM chunks WHERE document_id = ? ORDER BY ordinal")
			.bind(document_id)
			.fetch_all(executor)
			.await?;

	Ok(ids)
}

pub async fn remove_chunks(
	executor: impl SqliteExecutor<'_>,
	document_id: Uuid,
) -> Result<u64> {
	let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
		.bind(document_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected())
}

pub async fn remove_embeddings_for_chunks(
	executor: impl SqliteExecutor<'_>,
	chunk_ids: &[Uuid],
) -> Result<()> {
	if chunk_ids.is_empty() {
		return Ok(());
	}

	let mut builder: QueryBuilder<Sqlite> =
		QueryBuilder::new("DELETE FROM chunk_embeddings WHERE chunk_id IN (");
	let mut separated = builder.separated(", ");

	for chunk_id in chunk_ids {
		separated.push_bind(*chunk_id);
	}

	builder.push(")");
	builder.build().execute(executor).await?;

	Ok(())
}

/// Insert-or-replace used by table summary chunks, whose ids are stable
/// across refreshes.
pub async fn upsert_chunk(executor: impl SqliteExecutor<'_>, chunk: &ChunkRecord) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO chunks (
	chunk_id,
	document_id,
	tenant_id,
	ordinal,
	text,
	token_count,
	content_hash,
	source_type,
	embedding_version,
	cluster_id,
	index_state,
	created_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (chunk_id) DO UPDATE
SET
	text = excluded.text,
	token_count = excluded.token_count,
	content_hash = excluded.content_hash,
	embedding_version = excluded.embedding_version,
	index_state = excluded.index_state",
	)
	.bind(chunk.chunk_id)
	.bind(chunk.document_id)
	.bind(chunk.tenant_id.as_str())
	.bind(chunk.ordinal)
	.bind(chunk.text.as_str())
	.bind(chunk.token_count)
	.bind(chunk.content_hash.as_str())
	.bind(chunk.source_type.as_str())
	.bind(chunk.embedding_version.as_deref())
	.bind(chunk.cluster_id)
	.bind(chunk.index_state.as_str())
	.bind(chunk.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn insert_chunk(executor: impl SqliteExecutor<'_>, chunk: &ChunkRecord) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO chunks (
	chunk_id,
	document_id,
	tenant_id,
	ordinal,
	text,
	token_count,
	content_hash,
	source_type,
	embedding_version,
	cluster_id,
	index_state,
	created_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(chunk.chunk_id)
	.bind(chunk.document_id)
	.bind(chunk.tenant_id.as_str())
	.bind(chunk.ordinal)
	.bind(chunk.text.as_str())
	.bind(chunk.token_count)
	.bind(chunk.content_hash.as_str())
	.bind(chunk.source_type.as_str())
	.bind(chunk.embedding_version.as_deref())
	.bind(chunk.cluster_id)
	.bind(chunk.index_state.as_str())
	.bind(chunk.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn fetch_chunk(
	executor: impl SqliteExecutor<'_>,
	chunk_id: Uuid,
) -> Result<Option<ChunkRecord>> {
	let record = sqlx::query_as::<_, ChunkRecord>("SELECT * FROM chunks WHERE chunk_id = ?")
		.bind(chunk_id)
		.fetch_optional(executor)
		.await?;

	Ok(record)
}

pub async fn fetch_chunks_for_document(
	executor: impl SqliteExecutor<'_>,
	document_id: Uuid,
) -> Result<Vec<ChunkRecord>> {
	let records = sqlx::query_as::<_, ChunkRecord>(
		"SELECT * FROM chunks WHERE document_id = ? ORDER BY ordinal",
	)
	.bind(document_id)
	.fetch_all(executor)
	.await?;

	Ok(records)
}

pub async fn fetch_chunks(
	executor: impl SqliteExecutor<'_>,
	chunk_ids: &[Uuid],
) -> Result<Vec<ChunkRecord>> {
	if chunk_ids.is_empty() {
		return Ok(Vec::new());
	}

	let mut builder: QueryBuilder<Sqlite> =
		QueryBuilder::new("SELECT * FROM chunks WHERE chunk_id IN (");
	let mut separated = builder.separated(", ");

	for chunk_id in chunk_ids {
		separated.push_bind(*chunk_id);
	}

	builder.push(")");

	let records = builder.build_query_as::<ChunkRecord>().fetch_all(executor).await?;

	Ok(records)
}

pub async fn update_chunk_cluster(
	executor: impl SqliteExecutor<'_>,
	chunk_id: Uuid,
	cluster_id: Uuid,
	index_state: &str,
) -> Result<()> {
	sqlx::query("UPDATE chunks SET cluster_id = ?, index_state = ? WHERE chunk_id = ?")
		.bind(cluster_id)
		.bind(index_state)
		.bind(chunk_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn update_chunk_embedding_version(
	executor: impl SqliteExecutor<'_>,
	chunk_id: Uuid,
	embedding_version: &str,
) -> Result<()> {
	sqlx::query("UPDATE chunks SET embedding_version = ? WHERE chunk_id = ?")
		.bind(embedding_version)
		.bind(chunk_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn update_chunk_index_state(
	executor: impl SqliteExecutor<'_>,
	chunk_id: Uuid,
	index_state: &str,
) -> Result<()> {
	sqlx::query("UPDATE chunks SET index_state = ? WHERE chunk_id = ?")
		.bind(index_state)
		.bind(chunk_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn upsert_chunk_embedding(
	executor: impl SqliteExecutor<'_>,
	embedding: &ChunkEmbeddingRecord,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO chunk_embeddings (chunk_id, embedding_version, dim, vec, stale, created_at)
VALUES (?, ?, ?, ?, ?, ?)
ON CONFLICT (chunk_id, embedding_version) DO UPDATE
SET
	dim = excluded.dim,
	vec = excluded.vec,
	stale = excluded.stale,
	created_at = excluded.created_at",
	)
	.bind(embedding.chunk_id)
	.bind(embedding.embedding_version.as_str())
	.bind(embedding.dim)
	.bind(embedding.vec.as_str())
	.bind(embedding.stale)
	.bind(embedding.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn fetch_embedding(
	executor: impl SqliteExecutor<'_>,
	chunk_id: Uuid,
	embedding_version: &str,
) -> Result<Option<ChunkEmbeddingRecord>> {
	let record = sqlx::query_as::<_, ChunkEmbeddingRecord>(
		"SELECT * FROM chunk_embeddings WHERE chunk_id = ? AND embedding_version = ?",
	)
	.bind(chunk_id)
	.bind(embedding_version)
	.fetch_optional(executor)
	.await?;

	Ok(record)
}

/// Flag stored vectors whose stamp differs from the tenant's current model
/// version. They stay queryable until re-embedded.
pub async fn mark_embeddings_stale(
	executor: impl SqliteExecutor<'_>,
	tenant_id: &str,
	current_version: &str,
) -> Result<u64> {
	let result = sqlx::query(
		"\
UPDATE chunk_embeddings
SET stale = 1
WHERE embedding_version <> ?
	AND chunk_id IN (SELECT chunk_id FROM chunks WHERE tenant_id = ?)",
	)
	.bind(current_version)
	.bind(tenant_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

pub async fn fetch_stale_chunks(
	executor: impl SqliteExecutor<'_>,
	tenant_id: &str,
	limit: u32,
) -> Result<Vec<ChunkRecord>> {
	let records = sqlx::query_as::<_, ChunkRecord>(
		"\
SELECT chunks.*
FROM chunks
JOIN chunk_embeddings ON chunk_embeddings.chunk_id = chunks.chunk_id
WHERE chunks.tenant_id = ? AND chunk_embeddings.stale = 1
ORDER BY chunks.created_at
LIMIT ?",
	)
	.bind(tenant_id)
	.bind(limit as i64)
	.fetch_all(executor)
	.await?;

	Ok(records)
}

/// Drop embedding rows superseded by a newer model version, once the new
/// vector is stored and indexed.
pub async fn remove_superseded_embeddings(
	executor: impl SqliteExecutor<'_>,
	chunk_id: Uuid,
	current_version: &str,
) -> Result<u64> {
	let result =
		sqlx::query("DELETE FROM chunk_embeddings WHERE chunk_id = ? AND embedding_version <> ?")
			.bind(chunk_id)
			.bind(current_version)
			.execute(executor)
			.await?;

	Ok(result.rows_affected())
}

/// Tenants with at least one chunk; drives per-tenant maintenance sweeps.
pub async fn list_tenants(executor: impl SqliteExecutor<'_>) -> Result<Vec<String>> {
	let tenants: Vec<String> =
		sqlx::query_scalar("SELECT DISTINCT tenant_id FROM chunks ORDER BY tenant_id")
			.fetch_all(executor)
			.await?;

	Ok(tenants)
}

/// Chunk rows paired with their stamped embedding, for index rebuilds.
pub async fn fetch_indexed_chunks_with_embeddings(
	pool: &sqlx::SqlitePool,
	tenant_id: &str,
) -> Result<Vec<(ChunkRecord, ChunkEmbeddingRecord)>> {
	let chunks = sqlx::query_as::<_, ChunkRecord>(
		"SELECT * FROM chunks WHERE tenant_id = ? AND index_state = 'indexed' ORDER BY created_at",
	)
	.bind(tenant_id)
	.fetch_all(pool)
	.await?;
	let mut out = Vec::with_capacity(chunks.len());

	for chunk in chunks {
		let Some(version) = chunk.embedding_version.clone() else {
			continue;
		};

		if let Some(embedding) = fetch_embedding(pool, chunk.chunk_id, version.as_str()).await? {
			out.push((chunk, embedding));
		}
	}

	Ok(out)
}
