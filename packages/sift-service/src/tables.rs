use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::{
	Error, Result, Service,
	ingest::{SOURCE_TYPE_TABLE, StageCounters},
};
use sift_domain::{RunState, TargetKind, Visibility, hash, policy};
use sift_index::{PointPayload, SparseDoc, VectorPoint};
use sift_storage::{audit, docs, models, runs, tables as table_store, vector_to_text};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegisterTableRequest {
	pub tenant_id: String,
	pub name: String,
	pub source_ref: String,
	pub visibility: Visibility,
	pub rows: Vec<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TableReport {
	pub run_id: Uuid,
	pub state: RunState,
	pub table_id: Uuid,
	pub snapshot_version: i64,
	pub columns: Vec<ColumnDef>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ColumnDef {
	pub name: String,
	pub col_type: ColumnType,
	pub nullable: bool,
	pub primary_key_candidate: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
	Boolean,
	Integer,
	Real,
	Timestamp,
	Text,
}
impl ColumnType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Boolean => "boolean",
			Self::Integer => "integer",
			Self::Real => "real",
			Self::Timestamp => "timestamp",
			Self::Text => "text",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"boolean" => Some(Self::Boolean),
			"integer" => Some(Self::Integer),
			"real" => Some(Self::Real),
			"timestamp" => Some(Self::Timestamp),
			"text" => Some(Self::Text),
			_ => None,
		}
	}
}

impl Service {
	/// Register a table source or refresh it with new rows. A refresh whose
	/// inferred schema is incompatible with the prior snapshot halts with a
	/// schema-drift error; the prior snapshot stays queryable unchanged.
	pub async fn register_table(&self, req: RegisterTableRequest) -> Result<TableReport> {
		validate_register(&req)?;

		let run_id = Uuid::new_v4();
		let tenant_cfg = self.cfg.tenant(&req.tenant_id);
		let pool = self.worker_pool();
		let _permit = pool
			.acquire_owned()
			.await
			.map_err(|_| Error::Storage { message: "Ingestion worker pool is closed.".to_string() })?;
		let now = OffsetDateTime::now_utc();

		self.dense.ensure_namespace(&req.tenant_id).await?;

		let run = models::RunRecord {
			run_id,
			tenant_id: req.tenant_id.clone(),
			target_kind: TargetKind::Table.as_str().to_string(),
			target_ref: req.name.clone(),
			state: RunState::Received.as_str().to_string(),
			chunks_created: 0,
			duplicates_skipped: 0,
			embeddings_generated: 0,
			failures: 0,
			started_at: now,
			finished_at: None,
		};

		runs::insert_run(&self.db.pool, &run).await?;
		self.record_event(run_id, "received", "Table run accepted.", json!({}), None).await?;

		match self.execute_table_pipeline(run_id, &req, &tenant_cfg, now).await {
			Ok((report, counters, partial)) => {
				let state = if partial { RunState::Partial } else { RunState::Succeeded };

				self.write_run_totals(run_id, state, counters, OffsetDateTime::now_utc()).await?;

				Ok(TableReport { state, ..report })
			},
			Err(err) => {
				runs::update_run_state(
					&self.db.pool,
					run_id,
					RunState::Failed.as_str(),
					Some(OffsetDateTime::now_utc()),
				)
				.await?;
				self.record_event(
					run_id,
					"failed",
					&format!("Table run failed: {err}"),
					json!({}),
					None,
				)
				.await?;

				Err(err)
			},
		}
	}

	async fn execute_table_pipeline(
		&self,
		run_id: Uuid,
		req: &RegisterTableRequest,
		tenant_cfg: &sift_config::TenantConfig,
		now: OffsetDateTime,
	) -> Result<(TableReport, StageCounters, bool)> {
		let mut counters = StageCounters::default();
		let mut partial = false;

		// Stage: normalizing (schema inference and drift check).
		let started = Instant::now();

		self.set_run_state(run_id, RunState::Normalizing).await?;

		let columns = infer_schema(&req.rows)?;
		let existing = table_store::fetch_table(&self.db.pool, &req.tenant_id, &req.name).await?;
		let table = match existing {
			Some(table) => {
				let prior = table_store::fetch_columns(&self.db.pool, table.table_id).await?;

				if let Err(drift) = check_drift(&prior, &columns) {
					self.audit_schema_drift(req, &drift, now).await?;

					return Err(Error::SchemaDrift { message: drift });
				}

				table_store::touch_table(&self.db.pool, table.table_id, now).await?;

				table
			},
			None => {
				let table = models::TableRecord {
					table_id: Uuid::new_v4(),
					tenant_id: req.tenant_id.clone(),
					name: req.name.clone(),
					source_ref: req.source_ref.clone(),
					visibility: req.visibility.as_str().to_string(),
					created_at: now,
					updated_at: now,
				};

				table_store::insert_table(&self.db.pool, &table).await?;

				table
			},
		};
		let column_rows: Vec<models::ColumnRecord> = columns
			.iter()
			.enumerate()
			.map(|(position, column)| models::ColumnRecord {
				column_id: Uuid::new_v4(),
				table_id: table.table_id,
				name: column.name.clone(),
				col_type: column.col_type.as_str().to_string(),
				nullable: column.nullable,
				primary_key_candidate: column.primary_key_candidate,
				position: position as i32,
			})
			.collect();

		table_store::replace_columns(&self.db.pool, table.table_id, &column_rows).await?;

		let version = table_store::next_snapshot_version(&self.db.pool, table.table_id).await?;
		let snapshot = models::SnapshotRecord {
			snapshot_id: Uuid::new_v4(),
			table_id: table.table_id,
			version,
			row_count: req.rows.len() as i64,
			schema_json: serde_json::to_value(&columns)
				.map_err(|err| Error::Storage { message: err.to_string() })?,
			created_at: now,
		};

		table_store::insert_snapshot(&self.db.pool, &snapshot).await?;
		table_store::insert_snapshot_rows(&self.db.pool, snapshot.snapshot_id, &req.rows).await?;

		let stats = compute_column_stats(snapshot.snapshot_id, &req.rows, &columns);

		table_store::insert_column_stats(&self.db.pool, &stats).await?;
		self.record_event(
			run_id,
			"normalizing",
			"Snapshot persisted with inferred schema.",
			json!({ "columns": columns.len(), "rows": req.rows.len(), "version": version }),
			Some(started),
		)
		.await?;

		// Stage: embedding (table and column summaries).
		let started = Instant::now();

		self.set_run_state(run_id, RunState::Embedding).await?;

		let summaries = build_summaries(&table, &columns, &stats, req.rows.len());
		let texts: Vec<String> = summaries.iter().map(|(_, text)| text.clone()).collect();
		let model_override = tenant_cfg.embedding_model.as_deref();
		let embedded = match self.broker.embed(&texts, model_override).await {
			Ok(embeddings) => Some(embeddings),
			Err(err) => {
				counters.failures += texts.len() as u64;
				partial = true;

				tracing::warn!(
					run_id = %run_id,
					error = %err,
					"Summary embedding failed. Snapshot remains queryable; summaries are retryable."
				);

				None
			},
		};

		if let Some(embeddings) = embedded.as_ref() {
			counters.embeddings_generated = embeddings.vectors.len() as u64;
		}

		self.record_event(
			run_id,
			"embedding",
			"Table summaries embedded.",
			json!({ "summaries": texts.len(), "embedded": counters.embeddings_generated }),
			Some(started),
		)
		.await?;

		// Stage: indexing (summary chunks into both retrieval indexes).
		if let Some(embeddings) = embedded {
			let started = Instant::now();

			self.set_run_state(run_id, RunState::Indexing).await?;

			let mut points = Vec::with_capacity(summaries.len());
			let mut sparse_docs = Vec::with_capacity(summaries.len());

			for ((ordinal, (chunk_id, text)), vector) in
				summaries.iter().enumerate().zip(embeddings.vectors.iter())
			{
				let chunk = models::ChunkRecord {
					chunk_id: *chunk_id,
					document_id: table.table_id,
					tenant_id: req.tenant_id.clone(),
					ordinal: ordinal as i32,
					text: text.clone(),
					token_count: self.token_counter().count(text) as i32,
					content_hash: hash::text_hash(text),
					source_type: SOURCE_TYPE_TABLE.to_string(),
					embedding_version: Some(embeddings.version.clone()),
					cluster_id: None,
					index_state: "indexed".to_string(),
					created_at: now,
				};

				docs::upsert_chunk(&self.db.pool, &chunk).await?;
				docs::upsert_chunk_embedding(
					&self.db.pool,
					&models::ChunkEmbeddingRecord {
						chunk_id: chunk.chunk_id,
						embedding_version: embeddings.version.clone(),
						dim: vector.len() as i32,
						vec: vector_to_text(vector),
						stale: false,
						created_at: now,
					},
				)
				.await?;

				points.push(VectorPoint {
					chunk_id: chunk.chunk_id,
					vector: vector.clone(),
					payload: PointPayload {
						document_id: table.table_id,
						ordinal: chunk.ordinal,
						visibility: req.visibility,
						source_type: SOURCE_TYPE_TABLE.to_string(),
						tags: Vec::new(),
						representative: true,
						embedding_version: embeddings.version.clone(),
					},
				});
				sparse_docs.push(SparseDoc {
					chunk_id: chunk.chunk_id,
					document_id: table.table_id,
					text: text.clone(),
					visibility: req.visibility,
					source_type: SOURCE_TYPE_TABLE.to_string(),
					tags: Vec::new(),
				});
			}

			counters.chunks_created = points.len() as u64;

			let index_result = match self.dense.upsert(&req.tenant_id, points).await {
				Ok(()) => self.sparse.upsert(&req.tenant_id, &sparse_docs).map_err(Error::from),
				Err(err) => Err(Error::from(err)),
			};

			if let Err(err) = index_result {
				for (chunk_id, _) in &summaries {
					sift_storage::pending::enqueue(
						&self.db.pool,
						&req.tenant_id,
						*chunk_id,
						"UPSERT",
						now,
					)
					.await?;
				}

				counters.failures += summaries.len() as u64;
				partial = true;

				tracing::warn!(
					run_id = %run_id,
					error = %err,
					"Summary index upsert failed. Chunks parked for reconciliation."
				);
			}

			self.record_event(
				run_id,
				"indexing",
				"Table summaries indexed.",
				json!({ "indexed": counters.chunks_created }),
				Some(started),
			)
			.await?;
		}

		let report = TableReport {
			run_id,
			state: RunState::Succeeded,
			table_id: table.table_id,
			snapshot_version: version,
			columns,
		};

		Ok((report, counters, partial))
	}

	async fn audit_schema_drift(
		&self,
		req: &RegisterTableRequest,
		drift: &str,
		now: OffsetDateTime,
	) -> Result<()> {
		let entry = models::AuditRecord {
			audit_id: Uuid::new_v4(),
			tenant_id: req.tenant_id.clone(),
			role: "ingestor".to_string(),
			table_name: req.name.clone(),
			query_shape: json!({ "refresh": true, "drift": drift }),
			outcome: "drift".to_string(),
			row_count: 0,
			truncated: false,
			created_at: now,
		};

		audit::insert_audit(&self.db.pool, &entry).await?;

		Ok(())
	}
}

fn validate_register(req: &RegisterTableRequest) -> Result<()> {
	if req.tenant_id.trim().is_empty() {
		return Err(Error::Validation { message: "tenant_id is required.".to_string() });
	}
	if !policy::is_valid_identifier(&req.name) {
		return Err(Error::Validation {
			message: format!("Table name {:?} is not a valid identifier.", req.name),
		});
	}
	if req.rows.is_empty() {
		return Err(Error::Validation { message: "Table rows are empty.".to_string() });
	}

	for (idx, row) in req.rows.iter().enumerate() {
		if !row.is_object() {
			return Err(Error::Validation {
				message: format!("Row {idx} is not an object."),
			});
		}
	}

	Ok(())
}

/// Infer column definitions from JSON rows with widening promotion:
/// integer widens to real, anything conflicting widens to text.
pub fn infer_schema(rows: &[Value]) -> Result<Vec<ColumnDef>> {
	let mut names: Vec<String> = Vec::new();
	let mut seen: HashSet<String> = HashSet::new();

	for row in rows {
		if let Some(object) = row.as_object() {
			for key in object.keys() {
				if seen.insert(key.clone()) {
					names.push(key.clone());
				}
			}
		}
	}

	if names.is_empty() {
		return Err(Error::Validation { message: "Rows contain no columns.".to_string() });
	}

	let mut columns = Vec::with_capacity(names.len());

	for name in names {
		if !policy::is_valid_identifier(&name) {
			return Err(Error::Validation {
				message: format!("Column name {name:?} is not a valid identifier."),
			});
		}

		let mut col_type: Option<ColumnType> = None;
		let mut nullable = false;
		let mut rendered: HashSet<String> = HashSet::new();
		let mut all_present = true;

		for row in rows {
			let value = row.get(&name).unwrap_or(&Value::Null);

			match value_type(value) {
				None => {
					nullable = true;
					all_present = false;
				},
				Some(observed) => {
					col_type = Some(match col_type {
						None => observed,
						Some(current) => widen(current, observed),
					});

					rendered.insert(render_value(value));
				},
			}
		}

		let col_type = col_type.unwrap_or(ColumnType::Text);
		let unique = rendered.len() == rows.len();
		let primary_key_candidate = all_present
			&& unique
			&& matches!(col_type, ColumnType::Integer | ColumnType::Text | ColumnType::Timestamp);

		columns.push(ColumnDef { name, col_type, nullable, primary_key_candidate });
	}

	Ok(columns)
}

fn value_type(value: &Value) -> Option<ColumnType> {
	match value {
		Value::Null => None,
		Value::Bool(_) => Some(ColumnType::Boolean),
		Value::Number(number) =>
			if number.is_i64() || number.is_u64() {
				Some(ColumnType::Integer)
			} else {
				Some(ColumnType::Real)
			},
		Value::String(text) =>
			if OffsetDateTime::parse(text, &Rfc3339).is_ok() {
				Some(ColumnType::Timestamp)
			} else {
				Some(ColumnType::Text)
			},
		Value::Array(_) | Value::Object(_) => Some(ColumnType::Text),
	}
}

fn widen(current: ColumnType, observed: ColumnType) -> ColumnType {
	match (current, observed) {
		(a, b) if a == b => a,
		(ColumnType::Integer, ColumnType::Real) | (ColumnType::Real, ColumnType::Integer) =>
			ColumnType::Real,
		_ => ColumnType::Text,
	}
}

/// A refresh is compatible when every prior column survives with the same
/// or a wider type. Anything else silently defeats column masking policies
/// written against the prior schema, so it halts instead.
pub fn check_drift(prior: &[models::ColumnRecord], next: &[ColumnDef]) -> std::result::Result<(), String> {
	for old in prior {
		let Some(new) = next.iter().find(|column| column.name == old.name) else {
			return Err(format!("Column {} was removed.", old.name));
		};
		let Some(old_type) = ColumnType::parse(&old.col_type) else {
			continue;
		};

		if widen(old_type, new.col_type) != new.col_type {
			return Err(format!(
				"Column {} narrowed from {} to {}.",
				old.name,
				old_type.as_str(),
				new.col_type.as_str()
			));
		}
	}

	Ok(())
}

fn render_value(value: &Value) -> String {
	match value {
		Value::String(text) => text.clone(),
		other => other.to_string(),
	}
}

pub(crate) fn compute_column_stats(
	snapshot_id: Uuid,
	rows: &[Value],
	columns: &[ColumnDef],
) -> Vec<models::ColumnStatsRecord> {
	let total = rows.len().max(1) as f64;
	let mut out = Vec::with_capacity(columns.len());

	for column in columns {
		let mut distinct: HashSet<String> = HashSet::new();
		let mut nulls = 0_usize;
		let mut min_number: Option<f64> = None;
		let mut max_number: Option<f64> = None;
		let mut min_ts: Option<OffsetDateTime> = None;
		let mut max_ts: Option<OffsetDateTime> = None;

		for row in rows {
			let value = row.get(&column.name).unwrap_or(&Value::Null);

			if value.is_null() {
				nulls += 1;

				continue;
			}

			distinct.insert(render_value(value));

			match column.col_type {
				ColumnType::Integer | ColumnType::Real =>
					if let Some(number) = value.as_f64() {
						min_number = Some(min_number.map_or(number, |m| m.min(number)));
						max_number = Some(max_number.map_or(number, |m| m.max(number)));
					},
				ColumnType::Timestamp =>
					if let Some(ts) = value
						.as_str()
						.and_then(|text| OffsetDateTime::parse(text, &Rfc3339).ok())
					{
						min_ts = Some(min_ts.map_or(ts, |m| m.min(ts)));
						max_ts = Some(max_ts.map_or(ts, |m| m.max(ts)));
					},
				_ => {},
			}
		}

		let (min_value, max_value) = match column.col_type {
			ColumnType::Integer | ColumnType::Real => (
				min_number.map(|number| number.to_string()),
				max_number.map(|number| number.to_string()),
			),
			ColumnType::Timestamp => (
				min_ts.and_then(|ts| ts.format(&Rfc3339).ok()),
				max_ts.and_then(|ts| ts.format(&Rfc3339).ok()),
			),
			_ => (None, None),
		};

		out.push(models::ColumnStatsRecord {
			snapshot_id,
			column_name: column.name.clone(),
			distinct_count: distinct.len() as i64,
			null_ratio: nulls as f64 / total,
			min_value,
			max_value,
		});
	}

	out
}

/// Natural-language summaries indexed next to document chunks so retrieval
/// can cite structured sources. Chunk ids are stable across refreshes.
fn build_summaries(
	table: &models::TableRecord,
	columns: &[ColumnDef],
	stats: &[models::ColumnStatsRecord],
	row_count: usize,
) -> Vec<(Uuid, String)> {
	let mut out = Vec::with_capacity(columns.len() + 1);
	let column_list = columns
		.iter()
		.map(|column| format!("{} ({})", column.name, column.col_type.as_str()))
		.collect::<Vec<_>>()
		.join(", ");

	out.push((
		summary_chunk_id(table.table_id, "table"),
		format!("Table {} has {row_count} rows. Columns: {column_list}.", table.name),
	));

	for column in columns {
		let stat = stats.iter().find(|entry| entry.column_name == column.name);
		let mut text = format!(
			"Column {} of table {} holds {} values",
			column.name,
			table.name,
			column.col_type.as_str()
		);

		if let Some(stat) = stat {
			text.push_str(&format!(
				", {} distinct, {:.0}% null",
				stat.distinct_count,
				stat.null_ratio * 100.0
			));

			if let (Some(min), Some(max)) = (stat.min_value.as_ref(), stat.max_value.as_ref()) {
				text.push_str(&format!(", range {min} to {max}"));
			}
		}

		text.push('.');
		out.push((summary_chunk_id(table.table_id, &column.name), text));
	}

	out
}

fn summary_chunk_id(table_id: Uuid, suffix: &str) -> Uuid {
	let name = format!("{table_id}:summary:{suffix}");

	Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rows() -> Vec<Value> {
		vec![
			json!({ "id": 1, "name": "Ada", "score": 9.5, "active": true, "joined": "2024-01-02T00:00:00Z" }),
			json!({ "id": 2, "name": "Grace", "score": 7, "active": false, "joined": "2024-02-03T00:00:00Z" }),
			json!({ "id": 3, "name": "Alan", "score": 8.25, "active": true, "joined": null }),
		]
	}

	fn column<'a>(columns: &'a [ColumnDef], name: &str) -> &'a ColumnDef {
		columns.iter().find(|column| column.name == name).expect("Column should be inferred.")
	}

	#[test]
	fn schema_inference_widens_and_flags_nullability() {
		let columns = infer_schema(&rows()).unwrap();

		assert_eq!(column(&columns, "id").col_type, ColumnType::Integer);
		assert!(column(&columns, "id").primary_key_candidate);
		// Mixed integer and real widens to real.
		assert_eq!(column(&columns, "score").col_type, ColumnType::Real);
		assert!(!column(&columns, "score").nullable);
		assert_eq!(column(&columns, "active").col_type, ColumnType::Boolean);
		assert_eq!(column(&columns, "joined").col_type, ColumnType::Timestamp);
		assert!(column(&columns, "joined").nullable);
		assert!(!column(&columns, "joined").primary_key_candidate);
	}

	#[test]
	fn pk_candidates_require_uniqueness() {
		let rows = vec![json!({ "id": 1, "kind": "a" }), json!({ "id": 2, "kind": "a" })];
		let columns = infer_schema(&rows).unwrap();

		assert!(column(&columns, "id").primary_key_candidate);
		assert!(!column(&columns, "kind").primary_key_candidate);
	}

	#[test]
	fn invalid_column_names_are_rejected() {
		let rows = vec![json!({ "drop table": 1 })];

		assert!(matches!(infer_schema(&rows), Err(Error::Validation { .. })));
	}

	fn prior(name: &str, col_type: &str) -> models::ColumnRecord {
		models::ColumnRecord {
			column_id: Uuid::new_v4(),
			table_id: Uuid::new_v4(),
			name: name.to_string(),
			col_type: col_type.to_string(),
			nullable: false,
			primary_key_candidate: false,
			position: 0,
		}
	}

	#[test]
	fn drift_detects_removed_and_narrowed_columns() {
		let next = vec![ColumnDef {
			name: "amount".to_string(),
			col_type: ColumnType::Integer,
			nullable: false,
			primary_key_candidate: false,
		}];

		// Removed column.
		assert!(check_drift(&[prior("ssn", "text")], &next).is_err());
		// Narrowed real -> integer.
		assert!(check_drift(&[prior("amount", "real")], &next).is_err());
		// Widened integer -> real is compatible.
		let widened = vec![ColumnDef {
			name: "amount".to_string(),
			col_type: ColumnType::Real,
			nullable: false,
			primary_key_candidate: false,
		}];

		assert!(check_drift(&[prior("amount", "integer")], &widened).is_ok());
		// New columns are compatible.
		assert!(check_drift(&[], &next).is_ok());
	}

	#[test]
	fn stats_cover_nulls_distincts_and_ranges() {
		let columns = infer_schema(&rows()).unwrap();
		let stats = compute_column_stats(Uuid::new_v4(), &rows(), &columns);
		let score = stats.iter().find(|entry| entry.column_name == "score").unwrap();

		assert_eq!(score.distinct_count, 3);
		assert_eq!(score.null_ratio, 0.0);
		assert_eq!(score.min_value.as_deref(), Some("7"));
		assert_eq!(score.max_value.as_deref(), Some("9.5"));

		let joined = stats.iter().find(|entry| entry.column_name == "joined").unwrap();

		assert!((joined.null_ratio - 1.0 / 3.0).abs() < 1e-9);
		assert_eq!(joined.min_value.as_deref(), Some("2024-01-02T00:00:00Z"));
	}
}
