use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct DocumentRecord {
	pub document_id: Uuid,
	pub tenant_id: String,
	pub source_ref: String,
	pub content_hash: String,
	pub mime_type: String,
	pub title: Option<String>,
	pub author: Option<String>,
	pub tags: Value,
	pub visibility: String,
	pub state: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ChunkRecord {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	pub tenant_id: String,
	pub ordinal: i32,
	pub text: String,
	pub token_count: i32,
	pub content_hash: String,
	pub source_type: String,
	pub embedding_version: Option<String>,
	pub cluster_id: Option<Uuid>,
	pub index_state: String,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ChunkEmbeddingRecord {
	pub chunk_id: Uuid,
	pub embedding_version: String,
	pub dim: i32,
	pub vec: String,
	pub stale: bool,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ClusterRecord {
	pub cluster_id: Uuid,
	pub tenant_id: String,
	pub representative_chunk_id: Uuid,
	pub content_hash: String,
	pub threshold: f32,
	pub member_count: i64,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ReviewRecord {
	pub review_id: Uuid,
	pub tenant_id: String,
	pub chunk_id: Uuid,
	pub cluster_id: Uuid,
	pub similarity: f32,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct RunRecord {
	pub run_id: Uuid,
	pub tenant_id: String,
	pub target_kind: String,
	pub target_ref: String,
	pub state: String,
	pub chunks_created: i64,
	pub duplicates_skipped: i64,
	pub embeddings_generated: i64,
	pub failures: i64,
	pub started_at: OffsetDateTime,
	pub finished_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct RunEventRecord {
	pub event_id: Uuid,
	pub run_id: Uuid,
	pub stage: String,
	pub message: String,
	pub counts: Value,
	pub duration_ms: i64,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct TableRecord {
	pub table_id: Uuid,
	pub tenant_id: String,
	pub name: String,
	pub source_ref: String,
	pub visibility: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ColumnRecord {
	pub column_id: Uuid,
	pub table_id: Uuid,
	pub name: String,
	pub col_type: String,
	pub nullable: bool,
	pub primary_key_candidate: bool,
	pub position: i32,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SnapshotRecord {
	pub snapshot_id: Uuid,
	pub table_id: Uuid,
	pub version: i64,
	pub row_count: i64,
	pub schema_json: Value,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ColumnStatsRecord {
	pub snapshot_id: Uuid,
	pub column_name: String,
	pub distinct_count: i64,
	pub null_ratio: f64,
	pub min_value: Option<String>,
	pub max_value: Option<String>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct PolicyRecord {
	pub policy_id: Uuid,
	pub tenant_id: String,
	pub role: String,
	pub table_name: String,
	pub policy: Value,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AuditRecord {
	pub audit_id: Uuid,
	pub tenant_id: String,
	pub role: String,
	pub table_name: String,
	pub query_shape: Value,
	pub outcome: String,
	pub row_count: i64,
	pub truncated: bool,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct PendingIndexEntry {
	pub pending_id: Uuid,
	pub tenant_id: String,
	pub chunk_id: Uuid,
	pub op: String,
	pub status: String,
	pub attempts: i32,
	pub last_error: Option<String>,
	pub available_at: OffsetDateTime,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
