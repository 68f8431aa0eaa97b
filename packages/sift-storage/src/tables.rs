use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{ColumnRecord, ColumnStatsRecord, PolicyRecord, SnapshotRecord, TableRecord},
};

// Three binds per row against SQLite's default 999-variable limit.
const SNAPSHOT_ROW_BATCH: usize = 300;

pub async fn fetch_table(
	executor: impl SqliteExecutor<'_>,
	tenant_id: &str,
	name: &str,
) -> Result<Option<TableRecord>> {
	let record = sqlx::query_as::<_, TableRecord>(
		"SELECT * FROM table_catalog WHERE tenant_id = ? AND name = ?",
	)
	.bind(tenant_id)
	.bind(name)
	.fetch_optional(executor)
	.await?;

	Ok(record)
}

pub async fn fetch_table_by_id(
	executor: impl SqliteExecutor<'_>,
	table_id: Uuid,
) -> Result<Option<TableRecord>> {
	let record =
		sqlx::query_as::<_, TableRecord>("SELECT * FROM table_catalog WHERE table_id = ?")
			.bind(table_id)
			.fetch_optional(executor)
			.await?;

	Ok(record)
}

pub async fn insert_table(executor: impl SqliteExecutor<'_>, table: &TableRecord) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO table_catalog (table_id, tenant_id, name, source_ref, visibility, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(table.table_id)
	.bind(table.tenant_id.as_str())
	.bind(table.name.as_str())
	.bind(table.source_ref.as_str())
	.bind(table.visibility.as_str())
	.bind(table.created_at)
	.bind(table.updated_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn touch_table(
	executor: impl SqliteExecutor<'_>,
	table_id: Uuid,
	updated_at: OffsetDateTime,
) -> Result<()> {
	sqlx::query("UPDATE table_catalog SET updated_at = ? WHERE table_id = ?")
		.bind(updated_at)
		.bind(table_id)
		.execute(executor)
		.await?;

	Ok(())
}

/// Replace the catalog columns after a compatible refresh. Snapshots carry
/// their own schema copy, so history is unaffected.
pub async fn replace_columns(pool: &SqlitePool, table_id: Uuid, columns: &[ColumnRecord]) -> Result<()> {
	let mut tx = pool.begin().await?;

	sqlx::query("DELETE FROM table_columns WHERE table_id = ?")
		.bind(table_id)
		.execute(&mut *tx)
		.await?;

	for column in columns {
		sqlx::query(
			"\
INSERT INTO table_columns (column_id, table_id, name, col_type, nullable, primary_key_candidate, position)
VALUES (?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(column.column_id)
		.bind(column.table_id)
		.bind(column.name.as_str())
		.bind(column.col_type.as_str())
		.bind(column.nullable)
		.bind(column.primary_key_candidate)
		.bind(column.position)
		.execute(&mut *tx)
		.await?;
	}

	tx.commit().await?;

	Ok(())
}

pub async fn fetch_columns(
	executor: impl SqliteExecutor<'_>,
	table_id: Uuid,
) -> Result<Vec<ColumnRecord>> {
	let records = sqlx::query_as::<_, ColumnRecord>(
		"SELECT * FROM table_columns WHERE table_id = ? ORDER BY position",
	)
	.bind(table_id)
	.fetch_all(executor)
	.await?;

	Ok(records)
}

pub async fn next_snapshot_version(
	executor: impl SqliteExecutor<'_>,
	table_id: Uuid,
) -> Result<i64> {
	let current: Option<i64> =
		sqlx::query_scalar("SELECT MAX(version) FROM table_snapshots WHERE table_id = ?")
			.bind(table_id)
			.fetch_one(executor)
			.await?;

	Ok(current.unwrap_or(0) + 1)
}

pub async fn insert_snapshot(
	executor: impl SqliteExecutor<'_>,
	snapshot: &SnapshotRecord,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO table_snapshots (snapshot_id, table_id, version, row_count, schema_json, created_at)
VALUES (?, ?, ?, ?, ?, ?)",
	)
	.bind(snapshot.snapshot_id)
	.bind(snapshot.table_id)
	.bind(snapshot.version)
	.bind(snapshot.row_count)
	.bind(&snapshot.schema_json)
	.bind(snapshot.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn insert_snapshot_rows(
	pool: &SqlitePool,
	snapshot_id: Uuid,
	rows: &[Value],
) -> Result<()> {
	for (batch_index, batch) in rows.chunks(SNAPSHOT_ROW_BATCH).enumerate() {
		let mut builder: QueryBuilder<Sqlite> =
			QueryBuilder::new("INSERT INTO table_snapshot_rows (snapshot_id, row_index, row_json) ");

		builder.push_values(batch.iter().enumerate(), |mut b, (offset, row)| {
			let row_index = (batch_index * SNAPSHOT_ROW_BATCH + offset) as i64;

			b.push_bind(snapshot_id).push_bind(row_index).push_bind(row);
		});
		builder.build().execute(pool).await?;
	}

	Ok(())
}

pub async fn latest_snapshot(
	executor: impl SqliteExecutor<'_>,
	table_id: Uuid,
) -> Result<Option<SnapshotRecord>> {
	let record = sqlx::query_as::<_, SnapshotRecord>(
		"SELECT * FROM table_snapshots WHERE table_id = ? ORDER BY version DESC LIMIT 1",
	)
	.bind(table_id)
	.fetch_optional(executor)
	.await?;

	Ok(record)
}

pub async fn fetch_snapshot(
	executor: impl SqliteExecutor<'_>,
	table_id: Uuid,
	version: i64,
) -> Result<Option<SnapshotRecord>> {
	let record = sqlx::query_as::<_, SnapshotRecord>(
		"SELECT * FROM table_snapshots WHERE table_id = ? AND version = ?",
	)
	.bind(table_id)
	.bind(version)
	.fetch_optional(executor)
	.await?;

	Ok(record)
}

pub async fn fetch_snapshot_rows(
	executor: impl SqliteExecutor<'_>,
	snapshot_id: Uuid,
) -> Result<Vec<Value>> {
	let rows: Vec<Value> = sqlx::query_scalar(
		"SELECT row_json FROM table_snapshot_rows WHERE snapshot_id = ? ORDER BY row_index",
	)
	.bind(snapshot_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn insert_column_stats(
	pool: &SqlitePool,
	stats: &[ColumnStatsRecord],
) -> Result<()> {
	for entry in stats {
		sqlx::query(
			"\
INSERT INTO table_column_stats (snapshot_id, column_name, distinct_count, null_ratio, min_value, max_value)
VALUES (?, ?, ?, ?, ?, ?)",
		)
		.bind(entry.snapshot_id)
		.bind(entry.column_name.as_str())
		.bind(entry.distinct_count)
		.bind(entry.null_ratio)
		.bind(entry.min_value.as_deref())
		.bind(entry.max_value.as_deref())
		.execute(pool)
		.await?;
	}

	Ok(())
}

pub async fn fetch_column_stats(
	executor: impl SqliteExecutor<'_>,
	snapshot_id: Uuid,
) -> Result<Vec<ColumnStatsRecord>> {
	let records = sqlx::query_as::<_, ColumnStatsRecord>(
		"SELECT * FROM table_column_stats WHERE snapshot_id = ? ORDER BY column_name",
	)
	.bind(snapshot_id)
	.fetch_all(executor)
	.await?;

	Ok(records)
}

pub async fn upsert_policy(
	executor: impl SqliteExecutor<'_>,
	policy: &PolicyRecord,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO column_policies (policy_id, tenant_id, role, table_name, policy)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT (tenant_id, role, table_name) DO UPDATE
SET policy = excluded.policy",
	)
	.bind(policy.policy_id)
	.bind(policy.tenant_id.as_str())
	.bind(policy.role.as_str())
	.bind(policy.table_name.as_str())
	.bind(&policy.policy)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn fetch_policy(
	executor: impl SqliteExecutor<'_>,
	tenant_id: &str,
	role: &str,
	table_name: &str,
) -> Result<Option<PolicyRecord>> {
	let record = sqlx::query_as::<_, PolicyRecord>(
		"SELECT * FROM column_policies WHERE tenant_id = ? AND role = ? AND table_name = ?",
	)
	.bind(tenant_id)
	.bind(role)
	.bind(table_name)
	.fetch_optional(executor)
	.await?;

	Ok(record)
}
