use sqlx::SqliteExecutor;

use crate::{Result, models::AuditRecord};

pub async fn insert_audit(executor: impl SqliteExecutor<'_>, entry: &AuditRecord) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO query_audit (
	audit_id,
	tenant_id,
	role,
	table_name,
	query_shape,
	outcome,
	row_count,
	truncated,
	created_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(entry.audit_id)
	.bind(entry.tenant_id.as_str())
	.bind(entry.role.as_str())
	.bind(entry.table_name.as_str())
	.bind(&entry.query_shape)
	.bind(entry.outcome.as_str())
	.bind(entry.row_count)
	.bind(entry.truncated)
	.bind(entry.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn list_audit(
	executor: impl SqliteExecutor<'_>,
	tenant_id: &str,
	limit: u32,
) -> Result<Vec<AuditRecord>> {
	let records = sqlx::query_as::<_, AuditRecord>(
		"\
SELECT *
FROM query_audit
WHERE tenant_id = ?
ORDER BY created_at DESC
LIMIT ?",
	)
	.bind(tenant_id)
	.bind(limit as i64)
	.fetch_all(executor)
	.await?;

	Ok(records)
}
