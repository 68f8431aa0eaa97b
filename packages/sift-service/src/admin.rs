use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Error, Result, Service, ingest};
use sift_domain::RunState;
use sift_index::{PointPayload, SparseDoc, VectorPoint};
use sift_storage::{docs, models, parse_vector_text, pending, runs, tables as table_store};

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;
const RECONCILE_LEASE_SECONDS: i64 = 30;
const RECONCILE_BASE_BACKOFF_MS: i64 = 500;
const RECONCILE_MAX_BACKOFF_MS: i64 = 30_000;
const MAX_PENDING_ERROR_CHARS: usize = 1_024;

#[derive(Clone, Debug, Deserialize)]
pub struct RunListRequest {
	/// Opaque telemetry credential; issuance is external, the core only
	/// accepts or rejects it.
	pub token: Option<String>,
	pub tenant_id: String,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
	pub run_id: Uuid,
	pub tenant_id: String,
	pub target_kind: String,
	pub target_ref: String,
	pub state: RunState,
	pub chunks_created: i64,
	pub duplicates_skipped: i64,
	pub embeddings_generated: i64,
	pub failures: i64,
	pub started_at: OffsetDateTime,
	pub finished_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunListPage {
	pub runs: Vec<RunSummary>,
	pub offset: u32,
	pub has_more: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunEventView {
	pub stage: String,
	pub message: String,
	pub counts: Value,
	pub duration_ms: i64,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunDetail {
	pub run: RunSummary,
	pub events: Vec<RunEventView>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReembedReport {
	pub tenant_id: String,
	pub marked_stale: u64,
	pub reembedded: u64,
	pub failures: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RebuildReport {
	pub tenant_id: String,
	pub points: u64,
	pub skipped: u64,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ReconcileReport {
	pub processed: u64,
	pub failed: u64,
}

impl Service {
	/// Opaque-token gate on the telemetry surface. No token configured means
	/// the surface is closed.
	pub fn authorize_telemetry(&self, token: Option<&str>) -> Result<()> {
		let expected = self.cfg.security.telemetry_token.as_deref().ok_or_else(|| {
			Error::Unauthorized { message: "Telemetry access is not configured.".to_string() }
		})?;

		match token {
			Some(presented) if presented == expected => Ok(()),
			_ => Err(Error::Unauthorized { message: "Telemetry token rejected.".to_string() }),
		}
	}

	/// Paginated run listing with per-stage counters, for the external admin
	/// view.
	pub async fn list_runs(&self, req: RunListRequest) -> Result<RunListPage> {
		self.authorize_telemetry(req.token.as_deref())?;

		if req.tenant_id.trim().is_empty() {
			return Err(Error::Validation { message: "tenant_id is required.".to_string() });
		}

		let limit = req.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
		let offset = req.offset.unwrap_or(0);
		let mut records = runs::list_runs(&self.db.pool, &req.tenant_id, limit + 1, offset).await?;
		let has_more = records.len() as u32 > limit;

		records.truncate(limit as usize);

		let runs = records.iter().map(run_summary).collect::<Result<Vec<_>>>()?;

		Ok(RunListPage { runs, offset, has_more })
	}

	pub async fn run_detail(&self, token: Option<&str>, run_id: Uuid) -> Result<RunDetail> {
		self.authorize_telemetry(token)?;

		let run = runs::fetch_run(&self.db.pool, run_id)
			.await?
			.ok_or_else(|| Error::NotFound { message: format!("Run {run_id} does not exist.") })?;
		let events = runs::list_events(&self.db.pool, run_id)
			.await?
			.into_iter()
			.map(|event| RunEventView {
				stage: event.stage,
				message: event.message,
				counts: event.counts,
				duration_ms: event.duration_ms,
				created_at: event.created_at,
			})
			.collect();

		Ok(RunDetail { run: run_summary(&run)?, events })
	}

	/// Flag vectors whose stamp differs from the tenant's current model
	/// version and re-embed a bounded batch of them. Superseded vectors are
	/// replaced only after the new one is stored and indexed.
	pub async fn reembed_stale(&self, tenant_id: &str, limit: u32) -> Result<ReembedReport> {
		if tenant_id.trim().is_empty() {
			return Err(Error::Validation { message: "tenant_id is required.".to_string() });
		}

		let tenant_cfg = self.cfg.tenant(tenant_id);
		let model_override = tenant_cfg.embedding_model.as_deref();
		let current_version = self.broker.current_version(model_override);
		let marked_stale =
			docs::mark_embeddings_stale(&self.db.pool, tenant_id, &current_version).await?;
		let stale: Vec<models::ChunkRecord> =
			docs::fetch_stale_chunks(&self.db.pool, tenant_id, limit)
				.await?
				.into_iter()
				// Duplicates never reached the index; their cluster
				// representative carries the searchable vector.
				.filter(|chunk| chunk.index_state == "indexed")
				.collect();
		let mut reembedded = 0_u64;
		let mut failures = 0_u64;

		self.dense.ensure_namespace(tenant_id).await?;

		for batch in stale.chunks(self.cfg.ingest.batch_size as usize) {
			let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
			let embeddings = match self.broker.embed(&texts, model_override).await {
				Ok(embeddings) => embeddings,
				Err(err) => {
					failures += batch.len() as u64;

					tracing::warn!(
						tenant_id,
						error = %err,
						"Re-embedding batch failed. Stale vectors stay flagged for retry."
					);

					continue;
				},
			};
			let now = OffsetDateTime::now_utc();

			for (chunk, vector) in batch.iter().zip(embeddings.vectors.iter()) {
				let Some((payload, sparse_doc)) = self.citation_for_chunk(chunk).await? else {
					failures += 1;

					continue;
				};

				docs::upsert_chunk_embedding(
					&self.db.pool,
					&models::ChunkEmbeddingRecord {
						chunk_id: chunk.chunk_id,
						embedding_version: embeddings.version.clone(),
						dim: vector.len() as i32,
						vec: sift_storage::vector_to_text(vector),
						stale: false,
						created_at: now,
					},
				)
				.await?;
				docs::update_chunk_embedding_version(
					&self.db.pool,
					chunk.chunk_id,
					&embeddings.version,
				)
				.await?;

				let point = VectorPoint {
					chunk_id: chunk.chunk_id,
					vector: vector.clone(),
					payload,
				};

				self.dense.upsert(tenant_id, vec![point]).await?;
				self.sparse.upsert(tenant_id, &[sparse_doc])?;
				docs::remove_superseded_embeddings(
					&self.db.pool,
					chunk.chunk_id,
					&embeddings.version,
				)
				.await?;

				reembedded += 1;
			}
		}

		tracing::info!(tenant_id, marked_stale, reembedded, failures, "Re-embedding pass finished.");

		Ok(ReembedReport { tenant_id: tenant_id.to_string(), marked_stale, reembedded, failures })
	}

	/// Rebuild the tenant's retrieval indexes from the stored embedding
	/// copies. Upserts are idempotent, so a partial prior state is harmless.
	pub async fn rebuild_index(&self, tenant_id: &str) -> Result<RebuildReport> {
		if tenant_id.trim().is_empty() {
			return Err(Error::Validation { message: "tenant_id is required.".to_string() });
		}

		self.dense.ensure_namespace(tenant_id).await?;

		let pairs = docs::fetch_indexed_chunks_with_embeddings(&self.db.pool, tenant_id).await?;
		let mut points = Vec::with_capacity(pairs.len());
		let mut sparse_docs = Vec::with_capacity(pairs.len());
		let mut skipped = 0_u64;

		for (chunk, embedding) in &pairs {
			let Some((payload, sparse_doc)) = self.citation_for_chunk(chunk).await? else {
				skipped += 1;

				continue;
			};

			points.push(VectorPoint {
				chunk_id: chunk.chunk_id,
				vector: parse_vector_text(&embedding.vec)?,
				payload,
			});
			sparse_docs.push(sparse_doc);
		}

		let rebuilt = points.len() as u64;
		let batch_size = self.cfg.ingest.batch_size as usize;

		for batch in points.chunks(batch_size) {
			self.dense.upsert(tenant_id, batch.to_vec()).await?;
		}

		self.sparse.upsert(tenant_id, &sparse_docs)?;
		tracing::info!(tenant_id, points = rebuilt, skipped, "Index rebuild finished.");

		Ok(RebuildReport { tenant_id: tenant_id.to_string(), points: rebuilt, skipped })
	}

	/// Drain the pending-index queue: chunks whose vector upsert failed after
	/// the metadata commit. Failures go back on the queue with exponential
	/// backoff; nothing is left silently unsearchable.
	pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
		let mut report = ReconcileReport::default();

		loop {
			let now = OffsetDateTime::now_utc();
			let Some(entry) =
				pending::claim_next(&self.db.pool, now, RECONCILE_LEASE_SECONDS).await?
			else {
				break;
			};

			match self.reconcile_entry(&entry).await {
				Ok(()) => {
					pending::mark_done(&self.db.pool, entry.pending_id, now).await?;

					report.processed += 1;
				},
				Err(err) => {
					let attempts = entry.attempts.saturating_add(1);
					let available_at = now + reconcile_backoff(attempts);
					let message = sanitize_pending_error(&err.to_string());

					pending::mark_failed(
						&self.db.pool,
						entry.pending_id,
						attempts,
						&message,
						available_at,
						now,
					)
					.await?;
					tracing::warn!(
						pending_id = %entry.pending_id,
						chunk_id = %entry.chunk_id,
						attempts,
						error = %err,
						"Pending-index entry failed. Requeued with backoff."
					);

					report.failed += 1;
				},
			}
		}

		Ok(report)
	}

	async fn reconcile_entry(&self, entry: &models::PendingIndexEntry) -> Result<()> {
		match entry.op.as_str() {
			"UPSERT" => {
				let Some(chunk) = docs::fetch_chunk(&self.db.pool, entry.chunk_id).await? else {
					tracing::info!(chunk_id = %entry.chunk_id, "Chunk gone; pending entry retired.");

					return Ok(());
				};
				let Some(version) = chunk.embedding_version.as_deref() else {
					return Err(Error::IndexInconsistency {
						message: format!("Chunk {} has no embedding to index.", chunk.chunk_id),
					});
				};
				let Some(embedding) =
					docs::fetch_embedding(&self.db.pool, chunk.chunk_id, version).await?
				else {
					return Err(Error::IndexInconsistency {
						message: format!(
							"Chunk {} is missing its {version} embedding row.",
							chunk.chunk_id
						),
					});
				};
				let Some((payload, sparse_doc)) = self.citation_for_chunk(&chunk).await? else {
					tracing::info!(chunk_id = %entry.chunk_id, "Parent gone; pending entry retired.");

					return Ok(());
				};
				let point = VectorPoint {
					chunk_id: chunk.chunk_id,
					vector: parse_vector_text(&embedding.vec)?,
					payload,
				};

				self.dense.ensure_namespace(&entry.tenant_id).await?;
				self.dense.upsert(&entry.tenant_id, vec![point]).await?;
				self.sparse.upsert(&entry.tenant_id, &[sparse_doc])?;
				docs::update_chunk_index_state(&self.db.pool, chunk.chunk_id, "indexed").await?;

				Ok(())
			},
			"DELETE" => {
				self.dense.delete(&entry.tenant_id, &[entry.chunk_id]).await?;
				self.sparse.delete(&entry.tenant_id, &[entry.chunk_id])?;

				Ok(())
			},
			other => Err(Error::Validation {
				message: format!("Unsupported pending-index op: {other}."),
			}),
		}
	}

	/// Index payload and sparse doc for a chunk, resolved through its parent
	/// document or table. `None` when the parent no longer exists.
	async fn citation_for_chunk(
		&self,
		chunk: &models::ChunkRecord,
	) -> Result<Option<(PointPayload, SparseDoc)>> {
		if chunk.source_type == ingest::SOURCE_TYPE_TABLE {
			let Some(table) =
				table_store::fetch_table_by_id(&self.db.pool, chunk.document_id).await?
			else {
				return Ok(None);
			};
			let visibility = sift_domain::Visibility::parse(&table.visibility)
				.unwrap_or(sift_domain::Visibility::Restricted);
			let payload = PointPayload {
				document_id: table.table_id,
				ordinal: chunk.ordinal,
				visibility,
				source_type: chunk.source_type.clone(),
				tags: Vec::new(),
				representative: true,
				embedding_version: chunk.embedding_version.clone().unwrap_or_default(),
			};
			let sparse_doc = SparseDoc {
				chunk_id: chunk.chunk_id,
				document_id: table.table_id,
				text: chunk.text.clone(),
				visibility,
				source_type: chunk.source_type.clone(),
				tags: Vec::new(),
			};

			return Ok(Some((payload, sparse_doc)));
		}

		let Some(document) = docs::fetch_document(&self.db.pool, chunk.document_id).await? else {
			return Ok(None);
		};

		Ok(Some((
			ingest::point_payload(&document, chunk),
			ingest::sparse_doc(&document, chunk),
		)))
	}
}

fn run_summary(record: &models::RunRecord) -> Result<RunSummary> {
	let state = RunState::parse(&record.state).ok_or_else(|| Error::Storage {
		message: format!("Run {} carries unknown state {:?}.", record.run_id, record.state),
	})?;

	Ok(RunSummary {
		run_id: record.run_id,
		tenant_id: record.tenant_id.clone(),
		target_kind: record.target_kind.clone(),
		target_ref: record.target_ref.clone(),
		state,
		chunks_created: record.chunks_created,
		duplicates_skipped: record.duplicates_skipped,
		embeddings_generated: record.embeddings_generated,
		failures: record.failures,
		started_at: record.started_at,
		finished_at: record.finished_at,
	})
}

fn reconcile_backoff(attempt: i32) -> Duration {
	let exp = (attempt.max(1) as u32).saturating_sub(1).min(6);
	let base = RECONCILE_BASE_BACKOFF_MS.saturating_mul(1 << exp);

	Duration::milliseconds(base.min(RECONCILE_MAX_BACKOFF_MS))
}

/// Queue rows are readable by operators; keep credentials out of them.
fn sanitize_pending_error(text: &str) -> String {
	let mut parts = Vec::new();
	let mut redact_next = false;

	for raw in text.split_whitespace() {
		let mut word = raw.to_string();

		if redact_next {
			word = "[REDACTED]".to_string();
			redact_next = false;
		}
		if raw.eq_ignore_ascii_case("bearer") {
			redact_next = true;
		}

		let lowered = raw.to_ascii_lowercase();

		for key in ["api_key", "apikey", "password", "secret", "token"] {
			if lowered.contains(key) && (lowered.contains('=') || lowered.contains(':')) {
				let sep = if raw.contains('=') { '=' } else { ':' };
				let prefix = raw.split(sep).next().unwrap_or(raw);

				word = format!("{prefix}{sep}[REDACTED]");

				break;
			}
		}

		parts.push(word);
	}

	let mut out = parts.join(" ");

	if out.chars().count() > MAX_PENDING_ERROR_CHARS {
		out = out.chars().take(MAX_PENDING_ERROR_CHARS).collect();
		out.push_str("...");
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reconcile_backoff_grows_and_caps() {
		assert_eq!(reconcile_backoff(1), Duration::milliseconds(500));
		assert_eq!(reconcile_backoff(2), Duration::milliseconds(1_000));
		assert_eq!(reconcile_backoff(5), Duration::milliseconds(8_000));
		assert_eq!(reconcile_backoff(20), Duration::milliseconds(30_000));
		assert_eq!(reconcile_backoff(0), Duration::milliseconds(500));
	}

	#[test]
	fn pending_errors_are_redacted_and_bounded() {
		let sanitized = sanitize_pending_error("Bearer abc123 api_key=shhh detail");

		assert!(sanitized.contains("[REDACTED]"));
		assert!(!sanitized.contains("abc123"));
		assert!(!sanitized.contains("shhh"));
		assert!(sanitized.contains("api_key=[REDACTED]"));

		let long = "x".repeat(5_000);
		let sanitized = sanitize_pending_error(&long);

		assert!(sanitized.chars().count() <= MAX_PENDING_ERROR_CHARS + 3);
		assert!(sanitized.ends_with("..."));
	}
}
