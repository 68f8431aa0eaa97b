use sqlx::SqliteExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{RunEventRecord, RunRecord},
};

pub async fn insert_run(executor: impl SqliteExecutor<'_>, run: &RunRecord) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO ingestion_runs (
	run_id,
	tenant_id,
	target_kind,
	target_ref,
	state,
	chunks_created,
	duplicates_skipped,
	embeddings_generated,
	failures,
	started_at,
	finished_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(run.run_id)
	.bind(run.tenant_id.as_str())
	.bind(run.target_kind.as_str())
	.bind(run.target_ref.as_str())
	.bind(run.state.as_str())
	.bind(run.chunks_created)
	.bind(run.duplicates_skipped)
	.bind(run.embeddings_generated)
	.bind(run.failures)
	.bind(run.started_at)
	.bind(run.finished_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn update_run_state(
	executor: impl SqliteExecutor<'_>,
	run_id: Uuid,
	state: &str,
	finished_at: Option<OffsetDateTime>,
) -> Result<()> {
	sqlx::query("UPDATE ingestion_runs SET state = ?, finished_at = ? WHERE run_id = ?")
		.bind(state)
		.bind(finished_at)
		.bind(run_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn update_run_counters(
	executor: impl SqliteExecutor<'_>,
	run_id: Uuid,
	chunks_created: i64,
	duplicates_skipped: i64,
	embeddings_generated: i64,
	failures: i64,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE ingestion_runs
SET
	chunks_created = ?,
	duplicates_skipped = ?,
	embeddings_generated = ?,
	failures = ?
WHERE run_id = ?",
	)
	.bind(chunks_created)
	.bind(duplicates_skipped)
	.bind(embeddings_generated)
	.bind(failures)
	.bind(run_id)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn fetch_run(
	executor: impl SqliteExecutor<'_>,
	run_id: Uuid,
) -> Result<Option<RunRecord>> {
	let record = sqlx::query_as::<_, RunRecord>("SELECT * FROM ingestion_runs WHERE run_id = ?")
		.bind(run_id)
		.fetch_optional(executor)
		.await?;

	Ok(record)
}

pub async fn list_runs(
	executor: impl SqliteExecutor<'_>,
	tenant_id: &str,
	limit: u32,
	offset: u32,
) -> Result<Vec<RunRecord>> {
	let records = sqlx::query_as::<_, RunRecord>(
		"\
SELECT *
FROM ingestion_runs
WHERE tenant_id = ?
ORDER BY started_at DESC
LIMIT ? OFFSET ?",
	)
	.bind(tenant_id)
	.bind(limit as i64)
	.bind(offset as i64)
	.fetch_all(executor)
	.await?;

	Ok(records)
}

pub async fn insert_event(
	executor: impl SqliteExecutor<'_>,
	event: &RunEventRecord,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO run_events (event_id, run_id, stage, message, counts, duration_ms, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(event.event_id)
	.bind(event.run_id)
	.bind(event.stage.as_str())
	.bind(event.message.as_str())
	.bind(&event.counts)
	.bind(event.duration_ms)
	.bind(event.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn list_events(
	executor: impl SqliteExecutor<'_>,
	run_id: Uuid,
) -> Result<Vec<RunEventRecord>> {
	let records = sqlx::query_as::<_, RunEventRecord>(
		"SELECT * FROM run_events WHERE run_id = ? ORDER BY created_at, event_id",
	)
	.bind(run_id)
	.fetch_all(executor)
	.await?;

	Ok(records)
}
