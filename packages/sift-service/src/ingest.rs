use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, Service, dedup::{ExactOutcome, NearOutcome}};
use sift_config::TenantConfig;
use sift_domain::{DocumentState, RunState, TargetKind, Visibility, hash};
use sift_index::{PointPayload, SparseDoc, VectorPoint};
use sift_storage::{docs, models, pending, runs, vector_to_text};

pub const SOURCE_TYPE_DOCUMENT: &str = "document";
pub const SOURCE_TYPE_TABLE: &str = "table";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DocumentMetadata {
	pub mime_type: String,
	pub title: Option<String>,
	pub author: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
	pub visibility: Visibility,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SubmitDocumentRequest {
	pub tenant_id: String,
	pub source_ref: String,
	pub bytes: Vec<u8>,
	pub metadata: DocumentMetadata,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubmitOutcome {
	pub run_id: Uuid,
	pub state: RunState,
	pub chunks_created: u64,
	pub duplicates_skipped: u64,
	pub embeddings_generated: u64,
	pub failures: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StageCounters {
	pub(crate) chunks_created: u64,
	pub(crate) duplicates_skipped: u64,
	pub(crate) embeddings_generated: u64,
	pub(crate) failures: u64,
}

struct PipelineResult {
	counters: StageCounters,
	partial: bool,
	cancelled: bool,
}

impl Service {
	/// Ingest one document through the full pipeline and return the run's
	/// terminal accounting. Runs for different documents proceed
	/// concurrently up to the worker-pool ceiling.
	pub async fn submit_document(&self, req: SubmitDocumentRequest) -> Result<SubmitOutcome> {
		self.submit_document_with_run_id(Uuid::new_v4(), req).await
	}

	pub async fn submit_document_with_run_id(
		&self,
		run_id: Uuid,
		req: SubmitDocumentRequest,
	) -> Result<SubmitOutcome> {
		validate_submit(&req)?;

		let tenant_cfg = self.cfg.tenant(&req.tenant_id);
		let pool = self.worker_pool();
		let _permit = pool
			.acquire_owned()
			.await
			.map_err(|_| Error::Storage { message: "Ingestion worker pool is closed.".to_string() })?;
		let now = OffsetDateTime::now_utc();
		let text = sift_chunking::normalize(&String::from_utf8_lossy(&req.bytes));

		if text.trim().is_empty() {
			return Err(Error::Validation { message: "Document text is empty.".to_string() });
		}

		let content_hash = hash::content_hash(&req.bytes);

		self.dense.ensure_namespace(&req.tenant_id).await?;

		let existing =
			docs::fetch_document_by_source(&self.db.pool, &req.tenant_id, &req.source_ref).await?;

		if let Some(existing) = existing.as_ref()
			&& existing.content_hash == content_hash
		{
			return self.short_circuit_run(run_id, &req, now).await;
		}

		let document = self.upsert_document_row(existing, &req, &content_hash, now).await?;
		let run = models::RunRecord {
			run_id,
			tenant_id: req.tenant_id.clone(),
			target_kind: TargetKind::Document.as_str().to_string(),
			target_ref: req.source_ref.clone(),
			state: RunState::Received.as_str().to_string(),
			chunks_created: 0,
			duplicates_skipped: 0,
			embeddings_generated: 0,
			failures: 0,
			started_at: now,
			finished_at: None,
		};

		runs::insert_run(&self.db.pool, &run).await?;
		self.record_event(run_id, "received", "Run accepted.", json!({}), None).await?;

		let result = self.execute_document_pipeline(run_id, &document, &text, &tenant_cfg).await;

		self.finish_run(run_id, &document, result).await
	}

	async fn execute_document_pipeline(
		&self,
		run_id: Uuid,
		document: &models::DocumentRecord,
		text: &str,
		tenant_cfg: &TenantConfig,
	) -> Result<PipelineResult> {
		let tenant_id = document.tenant_id.as_str();
		let now = OffsetDateTime::now_utc();
		let mut counters = StageCounters::default();
		let mut partial = false;

		// Stage: normalizing.
		let started = Instant::now();

		self.set_run_state(run_id, RunState::Normalizing).await?;

		let drafts =
			sift_chunking::split_text(text, &self.chunking_options(tenant_cfg), self.token_counter());

		if drafts.is_empty() {
			return Err(Error::Validation {
				message: "Chunking produced no chunks for non-empty input.".to_string(),
			});
		}

		let mut chunk_rows = Vec::with_capacity(drafts.len());

		for draft in &drafts {
			let chunk = models::ChunkRecord {
				chunk_id: chunk_id_for(document.document_id, draft.ordinal),
				document_id: document.document_id,
				tenant_id: tenant_id.to_string(),
				ordinal: draft.ordinal,
				text: draft.text.clone(),
				token_count: draft.token_count as i32,
				content_hash: draft.content_hash.clone(),
				source_type: SOURCE_TYPE_DOCUMENT.to_string(),
				embedding_version: None,
				cluster_id: None,
				index_state: "pending".to_string(),
				created_at: now,
			};

			docs::insert_chunk(&self.db.pool, &chunk).await?;
			chunk_rows.push(chunk);
		}

		counters.chunks_created = chunk_rows.len() as u64;

		docs::update_document_state(
			&self.db.pool,
			document.document_id,
			DocumentState::Chunked.as_str(),
			now,
		)
		.await?;
		self.record_event(
			run_id,
			"normalizing",
			"Document split into chunks.",
			json!({ "chunks": chunk_rows.len() }),
			Some(started),
		)
		.await?;

		if self.is_cancelled(run_id) {
			return Ok(PipelineResult { counters, partial, cancelled: true });
		}

		// Stage: deduplicating (exact digest tier, before any embedding).
		let started = Instant::now();

		self.set_run_state(run_id, RunState::Deduplicating).await?;

		let mut survivors = Vec::with_capacity(chunk_rows.len());

		{
			let lock = self.tenant_lock(tenant_id);
			let _guard = lock.lock().await;

			for chunk in &chunk_rows {
				match self.dedup_exact_tier(tenant_id, &chunk.content_hash).await? {
					ExactOutcome::Duplicate { cluster_id } => {
						docs::update_chunk_cluster(
							&self.db.pool,
							chunk.chunk_id,
							cluster_id,
							"duplicate",
						)
						.await?;

						counters.duplicates_skipped += 1;
					},
					ExactOutcome::Fresh => survivors.push(chunk.clone()),
				}
			}
		}

		self.record_event(
			run_id,
			"deduplicating",
			"Exact-duplicate chunks attached to existing clusters.",
			json!({ "duplicates": counters.duplicates_skipped, "survivors": survivors.len() }),
			Some(started),
		)
		.await?;

		if self.is_cancelled(run_id) {
			return Ok(PipelineResult { counters, partial, cancelled: true });
		}

		// Stage: embedding.
		let started = Instant::now();

		self.set_run_state(run_id, RunState::Embedding).await?;

		let batch_size = self.cfg.ingest.batch_size as usize;
		let model_override = tenant_cfg.embedding_model.as_deref();
		let mut embedded: Vec<(models::ChunkRecord, Vec<f32>)> = Vec::with_capacity(survivors.len());
		let mut remaining = survivors.len();

		for batch in survivors.chunks(batch_size) {
			let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();

			match self.broker.embed(&texts, model_override).await {
				Ok(embeddings) => {
					for (chunk, vector) in batch.iter().zip(embeddings.vectors.into_iter()) {
						let record = models::ChunkEmbeddingRecord {
							chunk_id: chunk.chunk_id,
							embedding_version: embeddings.version.clone(),
							dim: vector.len() as i32,
							vec: vector_to_text(&vector),
							stale: false,
							created_at: now,
						};

						docs::upsert_chunk_embedding(&self.db.pool, &record).await?;
						docs::update_chunk_embedding_version(
							&self.db.pool,
							chunk.chunk_id,
							&embeddings.version,
						)
						.await?;

						let mut chunk = chunk.clone();

						chunk.embedding_version = Some(embeddings.version.clone());

						embedded.push((chunk, vector));
					}

					counters.embeddings_generated += batch.len() as u64;
					remaining -= batch.len();
				},
				Err(err) => {
					// Chain exhaustion: failed chunks stay retryable, the
					// run degrades to partial instead of rolling back.
					counters.failures += remaining as u64;
					partial = true;

					tracing::warn!(
						run_id = %run_id,
						error = %err,
						failed_chunks = remaining,
						"Embedding stage degraded. Remaining chunks left for retry."
					);

					break;
				},
			}
		}

		if !embedded.is_empty() {
			docs::update_document_state(
				&self.db.pool,
				document.document_id,
				DocumentState::Embedded.as_str(),
				now,
			)
			.await?;
		}

		self.record_event(
			run_id,
			"embedding",
			"Survivor chunks embedded.",
			json!({ "embedded": counters.embeddings_generated, "failed": counters.failures }),
			Some(started),
		)
		.await?;

		if self.is_cancelled(run_id) {
			return Ok(PipelineResult { counters, partial, cancelled: true });
		}

		// Stage: indexing (near-duplicate tier, then index upserts).
		let started = Instant::now();

		self.set_run_state(run_id, RunState::Indexing).await?;

		let mut indexed = 0_u64;

		{
			let lock = self.tenant_lock(tenant_id);
			let _guard = lock.lock().await;

			for (chunk, vector) in &embedded {
				let outcome = self.dedup_near_tier(tenant_cfg, chunk, vector, now).await?;

				match outcome {
					NearOutcome::Merged { cluster_id } => {
						docs::update_chunk_cluster(
							&self.db.pool,
							chunk.chunk_id,
							cluster_id,
							"duplicate",
						)
						.await?;

						counters.duplicates_skipped += 1;
					},
					NearOutcome::Review { cluster_id, .. }
					| NearOutcome::Representative { cluster_id } => {
						docs::update_chunk_cluster(
							&self.db.pool,
							chunk.chunk_id,
							cluster_id,
							"pending",
						)
						.await?;

						if self.index_chunk(document, chunk, vector).await? {
							indexed += 1;
						} else {
							counters.failures += 1;
							partial = true;
						}
					},
				}
			}
		}

		self.record_event(
			run_id,
			"indexing",
			"Representative chunks indexed.",
			json!({ "indexed": indexed, "pending": counters.failures }),
			Some(started),
		)
		.await?;

		let final_doc_state = if indexed == 0 && counters.embeddings_generated == 0 {
			DocumentState::Failed
		} else {
			DocumentState::Indexed
		};

		docs::update_document_state(
			&self.db.pool,
			document.document_id,
			final_doc_state.as_str(),
			now,
		)
		.await?;

		Ok(PipelineResult { counters, partial, cancelled: false })
	}

	/// Upsert one chunk into both retrieval indexes. A failure parks the
	/// chunk on the pending-index queue instead of leaving it silently
	/// unsearchable.
	async fn index_chunk(
		&self,
		document: &models::DocumentRecord,
		chunk: &models::ChunkRecord,
		vector: &[f32],
	) -> Result<bool> {
		let tenant_id = document.tenant_id.as_str();
		let point = VectorPoint {
			chunk_id: chunk.chunk_id,
			vector: vector.to_vec(),
			payload: point_payload(document, chunk),
		};
		let sparse_doc = sparse_doc(document, chunk);
		let dense_result = self.dense.upsert(tenant_id, vec![point]).await;
		let sparse_result = match &dense_result {
			Ok(()) => self.sparse.upsert(tenant_id, &[sparse_doc]).map_err(Error::from),
			Err(_) => Ok(()),
		};

		match dense_result.map_err(Error::from).and(sparse_result) {
			Ok(()) => {
				docs::update_chunk_index_state(&self.db.pool, chunk.chunk_id, "indexed").await?;

				Ok(true)
			},
			Err(err) => {
				let now = OffsetDateTime::now_utc();

				pending::enqueue(&self.db.pool, tenant_id, chunk.chunk_id, "UPSERT", now).await?;
				tracing::warn!(
					chunk_id = %chunk.chunk_id,
					error = %err,
					"Index upsert failed. Chunk parked for reconciliation."
				);

				Ok(false)
			},
		}
	}

	async fn short_circuit_run(
		&self,
		run_id: Uuid,
		req: &SubmitDocumentRequest,
		now: OffsetDateTime,
	) -> Result<SubmitOutcome> {
		let run = models::RunRecord {
			run_id,
			tenant_id: req.tenant_id.clone(),
			target_kind: TargetKind::Document.as_str().to_string(),
			target_ref: req.source_ref.clone(),
			state: RunState::Succeeded.as_str().to_string(),
			chunks_created: 0,
			duplicates_skipped: 0,
			embeddings_generated: 0,
			failures: 0,
			started_at: now,
			finished_at: Some(now),
		};

		runs::insert_run(&self.db.pool, &run).await?;
		self.record_event(
			run_id,
			"received",
			"Content hash unchanged; run short-circuited.",
			json!({ "short_circuit": true }),
			None,
		)
		.await?;
		tracing::info!(
			run_id = %run_id,
			tenant_id = %req.tenant_id,
			source_ref = %req.source_ref,
			"Idempotent re-ingest short-circuited."
		);

		Ok(SubmitOutcome {
			run_id,
			state: RunState::Succeeded,
			chunks_created: 0,
			duplicates_skipped: 0,
			embeddings_generated: 0,
			failures: 0,
		})
	}

	async fn upsert_document_row(
		&self,
		existing: Option<models::DocumentRecord>,
		req: &SubmitDocumentRequest,
		content_hash: &str,
		now: OffsetDateTime,
	) -> Result<models::DocumentRecord> {
		match existing {
			Some(mut document) => {
				self.remove_document_chunks(&document).await?;

				document.content_hash = content_hash.to_string();
				document.mime_type = req.metadata.mime_type.clone();
				document.title = req.metadata.title.clone();
				document.author = req.metadata.author.clone();
				document.tags = json!(req.metadata.tags);
				document.visibility = req.metadata.visibility.as_str().to_string();
				document.state = DocumentState::Received.as_str().to_string();
				document.updated_at = now;

				docs::update_document_content(&self.db.pool, &document).await?;

				Ok(document)
			},
			None => {
				let document = models::DocumentRecord {
					document_id: Uuid::new_v4(),
					tenant_id: req.tenant_id.clone(),
					source_ref: req.source_ref.clone(),
					content_hash: content_hash.to_string(),
					mime_type: req.metadata.mime_type.clone(),
					title: req.metadata.title.clone(),
					author: req.metadata.author.clone(),
					tags: json!(req.metadata.tags),
					visibility: req.metadata.visibility.as_str().to_string(),
					state: DocumentState::Received.as_str().to_string(),
					created_at: now,
					updated_at: now,
				};

				docs::insert_document(&self.db.pool, &document).await?;

				Ok(document)
			},
		}
	}

	/// Re-ingestion of changed content replaces every chunk of the
	/// document: indexes, embeddings, cluster memberships and rows.
	async fn remove_document_chunks(&self, document: &models::DocumentRecord) -> Result<()> {
		let old_chunks =
			docs::fetch_chunks_for_document(&self.db.pool, document.document_id).await?;

		if old_chunks.is_empty() {
			return Ok(());
		}

		let tenant_id = document.tenant_id.as_str();
		let ids: Vec<Uuid> = old_chunks.iter().map(|chunk| chunk.chunk_id).collect();

		{
			let lock = self.tenant_lock(tenant_id);
			let _guard = lock.lock().await;

			for chunk in &old_chunks {
				self.release_cluster_membership(chunk).await?;
			}
		}

		self.dense.delete(tenant_id, &ids).await?;
		self.sparse.delete(tenant_id, &ids)?;
		docs::remove_embeddings_for_chunks(&self.db.pool, &ids).await?;
		docs::remove_chunks(&self.db.pool, document.document_id).await?;

		Ok(())
	}

	async fn finish_run(
		&self,
		run_id: Uuid,
		document: &models::DocumentRecord,
		result: Result<PipelineResult>,
	) -> Result<SubmitOutcome> {
		let now = OffsetDateTime::now_utc();

		match result {
			Ok(PipelineResult { counters, partial, cancelled }) => {
				let state = if cancelled {
					self.take_cancellation(run_id);
					self.record_event(
						run_id,
						"cancelled",
						"Run cancelled; no further stages started.",
						json!({}),
						None,
					)
					.await?;

					RunState::Failed
				} else if partial || counters.failures > 0 {
					RunState::Partial
				} else {
					RunState::Succeeded
				};

				self.write_run_totals(run_id, state, counters, now).await?;

				Ok(SubmitOutcome {
					run_id,
					state,
					chunks_created: counters.chunks_created,
					duplicates_skipped: counters.duplicates_skipped,
					embeddings_generated: counters.embeddings_generated,
					failures: counters.failures,
				})
			},
			Err(err) => {
				self.take_cancellation(run_id);
				runs::update_run_state(
					&self.db.pool,
					run_id,
					RunState::Failed.as_str(),
					Some(now),
				)
				.await?;
				self.record_event(
					run_id,
					"failed",
					&format!("Run failed: {err}"),
					json!({}),
					None,
				)
				.await?;
				docs::update_document_state(
					&self.db.pool,
					document.document_id,
					DocumentState::Failed.as_str(),
					now,
				)
				.await?;

				Err(err)
			},
		}
	}

	pub(crate) async fn write_run_totals(
		&self,
		run_id: Uuid,
		state: RunState,
		counters: StageCounters,
		now: OffsetDateTime,
	) -> Result<()> {
		runs::update_run_counters(
			&self.db.pool,
			run_id,
			counters.chunks_created as i64,
			counters.duplicates_skipped as i64,
			counters.embeddings_generated as i64,
			counters.failures as i64,
		)
		.await?;
		runs::update_run_state(&self.db.pool, run_id, state.as_str(), Some(now)).await?;

		Ok(())
	}

	pub(crate) async fn set_run_state(&self, run_id: Uuid, state: RunState) -> Result<()> {
		runs::update_run_state(&self.db.pool, run_id, state.as_str(), None).await?;

		Ok(())
	}

	/// Telemetry event for one stage; duration measured from `started`.
	pub(crate) async fn record_event(
		&self,
		run_id: Uuid,
		stage: &str,
		message: &str,
		counts: Value,
		started: Option<Instant>,
	) -> Result<()> {
		let duration_ms =
			started.map(|instant| instant.elapsed().as_millis() as i64).unwrap_or(0);
		let event = models::RunEventRecord {
			event_id: Uuid::new_v4(),
			run_id,
			stage: stage.to_string(),
			message: message.to_string(),
			counts,
			duration_ms,
			created_at: OffsetDateTime::now_utc(),
		};

		runs::insert_event(&self.db.pool, &event).await?;
		tracing::debug!(run_id = %run_id, stage, message, "Ingestion stage event.");

		Ok(())
	}
}

fn validate_submit(req: &SubmitDocumentRequest) -> Result<()> {
	if req.tenant_id.trim().is_empty() {
		return Err(Error::Validation { message: "tenant_id is required.".to_string() });
	}
	if req.source_ref.trim().is_empty() {
		return Err(Error::Validation { message: "source_ref is required.".to_string() });
	}
	if req.bytes.is_empty() {
		return Err(Error::Validation { message: "Document bytes are empty.".to_string() });
	}
	if !mime_is_recognized(&req.metadata.mime_type) {
		return Err(Error::Validation {
			message: format!("Unrecognized mime type: {}.", req.metadata.mime_type),
		});
	}

	Ok(())
}

fn mime_is_recognized(mime_type: &str) -> bool {
	mime_type.starts_with("text/") || mime_type == "application/json"
}

pub(crate) fn chunk_id_for(document_id: Uuid, ordinal: i32) -> Uuid {
	let name = format!("{document_id}:{ordinal}");

	Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

pub(crate) fn point_payload(
	document: &models::DocumentRecord,
	chunk: &models::ChunkRecord,
) -> PointPayload {
	PointPayload {
		document_id: document.document_id,
		ordinal: chunk.ordinal,
		visibility: Visibility::parse(&document.visibility).unwrap_or(Visibility::Restricted),
		source_type: chunk.source_type.clone(),
		tags: tags_from_value(&document.tags),
		representative: true,
		embedding_version: chunk.embedding_version.clone().unwrap_or_default(),
	}
}

pub(crate) fn sparse_doc(
	document: &models::DocumentRecord,
	chunk: &models::ChunkRecord,
) -> SparseDoc {
	SparseDoc {
		chunk_id: chunk.chunk_id,
		document_id: document.document_id,
		text: chunk.text.clone(),
		visibility: Visibility::parse(&document.visibility).unwrap_or(Visibility::Restricted),
		source_type: chunk.source_type.clone(),
		tags: tags_from_value(&document.tags),
	}
}

pub(crate) fn tags_from_value(tags: &Value) -> Vec<String> {
	tags.as_array()
		.map(|items| {
			items
				.iter()
				.filter_map(|item| item.as_str().map(ToString::to_string))
				.collect()
		})
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn chunk_ids_are_deterministic_per_document_and_ordinal() {
		let document_id = Uuid::new_v4();

		assert_eq!(chunk_id_for(document_id, 0), chunk_id_for(document_id, 0));
		assert_ne!(chunk_id_for(document_id, 0), chunk_id_for(document_id, 1));
		assert_ne!(chunk_id_for(document_id, 0), chunk_id_for(Uuid::new_v4(), 0));
	}

	#[test]
	fn mime_recognition_accepts_text_families() {
		assert!(mime_is_recognized("text/plain"));
		assert!(mime_is_recognized("text/markdown"));
		assert!(mime_is_recognized("application/json"));
		assert!(!mime_is_recognized("application/octet-stream"));
		assert!(!mime_is_recognized("image/png"));
	}

	#[test]
	fn tags_parse_from_json_arrays_only() {
		assert_eq!(tags_from_value(&json!(["a", "b"])), vec!["a".to_string(), "b".to_string()]);
		assert!(tags_from_value(&json!({"not": "array"})).is_empty());
	}
}
