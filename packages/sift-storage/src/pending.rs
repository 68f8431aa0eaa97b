use sqlx::{SqliteExecutor, SqlitePool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Result, models::PendingIndexEntry};

/// Record a chunk whose vector upsert failed after the metadata commit. The
/// reconciliation pass retries it; the chunk is never silently unsearchable.
pub async fn enqueue(
	executor: impl SqliteExecutor<'_>,
	tenant_id: &str,
	chunk_id: Uuid,
	op: &str,
	now: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO pending_index (
	pending_id,
	tenant_id,
	chunk_id,
	op,
	status,
	attempts,
	available_at,
	created_at,
	updated_at
)
VALUES (?, ?, ?, ?, 'PENDING', 0, ?, ?, ?)",
	)
	.bind(Uuid::new_v4())
	.bind(tenant_id)
	.bind(chunk_id)
	.bind(op)
	.bind(now)
	.bind(now)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}

/// Claim the next due entry under a short lease so concurrent reconcilers
/// do not double-process it.
pub async fn claim_next(
	pool: &SqlitePool,
	now: OffsetDateTime,
	lease_seconds: i64,
) -> Result<Option<PendingIndexEntry>> {
	let mut tx = pool.begin().await?;
	let row = sqlx::query_as::<_, PendingIndexEntry>(
		"\
SELECT *
FROM pending_index
WHERE status IN ('PENDING', 'FAILED') AND available_at <= ?
ORDER BY available_at
LIMIT 1",
	)
	.bind(now)
	.fetch_optional(&mut *tx)
	.await?;
	let entry = if let Some(mut entry) = row {
		let lease_until = now + Duration::seconds(lease_seconds);

		sqlx::query("UPDATE pending_index SET available_at = ?, updated_at = ? WHERE pending_id = ?")
			.bind(lease_until)
			.bind(now)
			.bind(entry.pending_id)
			.execute(&mut *tx)
			.await?;

		entry.available_at = lease_until;
		entry.updated_at = now;

		Some(entry)
	} else {
		None
	};

	tx.commit().await?;

	Ok(entry)
}

pub async fn mark_done(
	executor: impl SqliteExecutor<'_>,
	pending_id: Uuid,
	now: OffsetDateTime,
) -> Result<()> {
	sqlx::query("UPDATE pending_index SET status = 'DONE', updated_at = ? WHERE pending_id = ?")
		.bind(now)
		.bind(pending_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn mark_failed(
	executor: impl SqliteExecutor<'_>,
	pending_id: Uuid,
	attempts: i32,
	last_error: &str,
	available_at: OffsetDateTime,
	now: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE pending_index
SET
	status = 'FAILED',
	attempts = ?,
	last_error = ?,
	available_at = ?,
	updated_at = ?
WHERE pending_id = ?",
	)
	.bind(attempts)
	.bind(last_error)
	.bind(available_at)
	.bind(now)
	.bind(pending_id)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn count_open(executor: impl SqliteExecutor<'_>, tenant_id: &str) -> Result<i64> {
	let count: i64 = sqlx::query_scalar(
		"SELECT COUNT(*) FROM pending_index WHERE tenant_id = ? AND status IN ('PENDING', 'FAILED')",
	)
	.bind(tenant_id)
	.fetch_one(executor)
	.await?;

	Ok(count)
}
