use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, Service, tables::ColumnType};
use sift_domain::policy::{ColumnPolicy, RowFilter};
use sift_storage::{audit, models, tables as table_store};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TableQueryRequest {
	pub tenant_id: String,
	pub role: String,
	pub intent: QueryIntent,
	/// Defaults to the latest snapshot; prior versions stay queryable.
	pub snapshot_version: Option<i64>,
}

/// Structured query intent. Free-form SQL text is never accepted; the
/// restricted shape below is the whole surface.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct QueryIntent {
	pub table: String,
	/// Empty selects every column the policy leaves visible.
	#[serde(default)]
	pub columns: Vec<String>,
	pub aggregate: Option<Aggregate>,
	#[serde(default)]
	pub filters: Vec<Predicate>,
	pub limit: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase", tag = "op", content = "column")]
pub enum Aggregate {
	Count,
	Sum(String),
	Avg(String),
	Min(String),
	Max(String),
}
impl Aggregate {
	fn column(&self) -> Option<&str> {
		match self {
			Self::Count => None,
			Self::Sum(column) | Self::Avg(column) | Self::Min(column) | Self::Max(column) =>
				Some(column),
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Predicate {
	pub column: String,
	pub op: CompareOp,
	pub value: Value,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
	Contains,
}

#[derive(Clone, Debug, Serialize)]
pub struct TableQueryResponse {
	pub rows: Vec<Map<String, Value>>,
	pub aggregate: Option<Value>,
	pub row_count: u64,
	pub truncated: bool,
	pub snapshot_version: i64,
}

impl Service {
	/// Guarded execution: catalog resolution, policy evaluation, bounded
	/// evaluation over an immutable snapshot, audit entry for every outcome
	/// including denials and timeouts.
	pub async fn query_table(&self, req: TableQueryRequest) -> Result<TableQueryResponse> {
		let tenant_cfg = self.cfg.tenant(&req.tenant_id);
		let now = OffsetDateTime::now_utc();
		let shape = intent_shape(&req.intent);

		let result = self.query_table_inner(&req, &tenant_cfg).await;

		let (outcome, row_count, truncated) = match &result {
			Ok(response) => ("ok", response.row_count as i64, response.truncated),
			Err(Error::PolicyViolation { .. }) => ("denied", 0, false),
			Err(Error::Timeout { .. }) => ("timeout", 0, false),
			Err(_) => ("failed", 0, false),
		};
		let entry = models::AuditRecord {
			audit_id: Uuid::new_v4(),
			tenant_id: req.tenant_id.clone(),
			role: req.role.clone(),
			table_name: req.intent.table.clone(),
			query_shape: shape,
			outcome: outcome.to_string(),
			row_count,
			truncated,
			created_at: now,
		};

		audit::insert_audit(&self.db.pool, &entry).await?;

		result
	}

	async fn query_table_inner(
		&self,
		req: &TableQueryRequest,
		tenant_cfg: &sift_config::TenantConfig,
	) -> Result<TableQueryResponse> {
		validate_query(req)?;

		// Catalog resolution.
		let table = table_store::fetch_table(&self.db.pool, &req.tenant_id, &req.intent.table)
			.await?
			.ok_or_else(|| Error::Validation {
				message: format!("Unknown table: {}.", req.intent.table),
			})?;
		let columns = table_store::fetch_columns(&self.db.pool, table.table_id).await?;

		for requested in referenced_columns(&req.intent) {
			if !columns.iter().any(|column| column.name == *requested) {
				return Err(Error::Validation {
					message: format!("Unknown column: {requested}."),
				});
			}
		}

		// Policy evaluation. Denied columns are excluded at build time;
		// a request that names one is rejected outright.
		let policy =
			self.load_policy(&req.tenant_id, &req.role, &req.intent.table).await?;

		if let Some(denied) =
			policy.first_denied(referenced_columns(&req.intent).map(String::as_str))
		{
			return Err(Error::PolicyViolation {
				message: format!("Column {denied} is masked for role {}.", req.role),
			});
		}

		// Query build.
		let projected: Vec<String> = if req.intent.columns.is_empty() {
			columns
				.iter()
				.map(|column| column.name.clone())
				.filter(|name| !policy.denies(name))
				.collect()
		} else {
			req.intent.columns.clone()
		};
		let mut predicates: Vec<Predicate> = req.intent.filters.clone();

		// Row filters are injected unconditionally; the intent cannot
		// override them.
		for filter in &policy.row_filters {
			predicates.push(Predicate {
				column: filter.column.clone(),
				op: CompareOp::Eq,
				value: filter.equals.clone(),
			});
		}

		let row_cap = tenant_cfg.tables.row_cap;
		let effective_limit = req.intent.limit.map_or(row_cap, |limit| limit.min(row_cap));
		let snapshot = match req.snapshot_version {
			Some(version) => table_store::fetch_snapshot(&self.db.pool, table.table_id, version)
				.await?
				.ok_or_else(|| Error::NotFound {
					message: format!("Snapshot version {version} does not exist."),
				})?,
			None => table_store::latest_snapshot(&self.db.pool, table.table_id)
				.await?
				.ok_or_else(|| Error::NotFound {
					message: format!("Table {} has no snapshot.", req.intent.table),
				})?,
		};

		// Bounded execution. All-or-nothing on timeout; a timed-out query
		// is audited as failed and never auto-retried.
		let timeout = Duration::from_millis(tenant_cfg.tables.statement_timeout_ms);
		let execution = async {
			let rows = table_store::fetch_snapshot_rows(&self.db.pool, snapshot.snapshot_id).await?;

			Ok::<_, Error>(evaluate(
				&rows,
				&projected,
				&predicates,
				req.intent.aggregate.as_ref(),
				effective_limit,
			))
		};
		let evaluated = tokio::time::timeout(timeout, execution)
			.await
			.map_err(|_| Error::Timeout {
				message: format!(
					"Query against {} exceeded {}ms.",
					req.intent.table, tenant_cfg.tables.statement_timeout_ms
				),
			})??;

		Ok(TableQueryResponse {
			row_count: evaluated.rows.len() as u64,
			rows: evaluated.rows,
			aggregate: evaluated.aggregate,
			truncated: evaluated.truncated,
			snapshot_version: snapshot.version,
		})
	}

	async fn load_policy(
		&self,
		tenant_id: &str,
		role: &str,
		table_name: &str,
	) -> Result<ColumnPolicy> {
		let record = table_store::fetch_policy(&self.db.pool, tenant_id, role, table_name).await?;

		match record {
			Some(record) => serde_json::from_value(record.policy)
				.map_err(|err| Error::Storage { message: format!("Malformed policy: {err}.") }),
			None => Ok(ColumnPolicy::default()),
		}
	}

	/// Register or replace the (tenant, role, table) masking policy.
	pub async fn set_policy(
		&self,
		tenant_id: &str,
		role: &str,
		table_name: &str,
		policy: &ColumnPolicy,
	) -> Result<()> {
		let record = models::PolicyRecord {
			policy_id: Uuid::new_v4(),
			tenant_id: tenant_id.to_string(),
			role: role.to_string(),
			table_name: table_name.to_string(),
			policy: serde_json::to_value(policy)
				.map_err(|err| Error::Storage { message: err.to_string() })?,
		};

		table_store::upsert_policy(&self.db.pool, &record).await?;

		Ok(())
	}
}

fn validate_query(req: &TableQueryRequest) -> Result<()> {
	if req.tenant_id.trim().is_empty() {
		return Err(Error::Validation { message: "tenant_id is required.".to_string() });
	}
	if req.role.trim().is_empty() {
		return Err(Error::Validation { message: "role is required.".to_string() });
	}
	if !sift_domain::policy::is_valid_identifier(&req.intent.table) {
		return Err(Error::Validation {
			message: format!("Table name {:?} is not a valid identifier.", req.intent.table),
		});
	}

	for column in referenced_columns(&req.intent) {
		if !sift_domain::policy::is_valid_identifier(column) {
			return Err(Error::Validation {
				message: format!("Column name {column:?} is not a valid identifier."),
			});
		}
	}

	if let Some(limit) = req.intent.limit
		&& limit == 0
	{
		return Err(Error::Validation { message: "limit must be greater than zero.".to_string() });
	}

	Ok(())
}

fn referenced_columns(intent: &QueryIntent) -> impl Iterator<Item = &String> {
	intent
		.columns
		.iter()
		.chain(intent.filters.iter().map(|predicate| &predicate.column))
		.chain(intent.aggregate.iter().filter_map(|aggregate| match aggregate {
			Aggregate::Count => None,
			Aggregate::Sum(column)
			| Aggregate::Avg(column)
			| Aggregate::Min(column)
			| Aggregate::Max(column) => Some(column),
		}))
}

/// The audited shape: resolved structure only, never raw values of masked
/// data.
fn intent_shape(intent: &QueryIntent) -> Value {
	json!({
		"table": intent.table,
		"columns": intent.columns,
		"aggregate": intent.aggregate.as_ref().map(|aggregate| match aggregate {
			Aggregate::Count => json!({ "op": "count" }),
			other => json!({ "op": "fold", "column": other.column() }),
		}),
		"filters": intent.filters.iter().map(|predicate| json!({
			"column": predicate.column,
			"op": format!("{:?}", predicate.op).to_lowercase(),
		})).collect::<Vec<_>>(),
		"limit": intent.limit,
	})
}

struct Evaluated {
	rows: Vec<Map<String, Value>>,
	aggregate: Option<Value>,
	truncated: bool,
}

fn evaluate(
	rows: &[Value],
	projected: &[String],
	predicates: &[Predicate],
	aggregate: Option<&Aggregate>,
	limit: u32,
) -> Evaluated {
	let matching = rows.iter().filter(|row| predicates.iter().all(|p| matches(row, p)));

	if let Some(aggregate) = aggregate {
		let value = fold(matching, aggregate);

		return Evaluated { rows: Vec::new(), aggregate: Some(value), truncated: false };
	}

	let mut out = Vec::new();
	let mut truncated = false;

	for row in matching {
		if out.len() as u32 >= limit {
			truncated = true;

			break;
		}

		out.push(project(row, projected));
	}

	Evaluated { rows: out, aggregate: None, truncated }
}

fn project(row: &Value, projected: &[String]) -> Map<String, Value> {
	let mut out = Map::new();

	for name in projected {
		out.insert(name.clone(), row.get(name).cloned().unwrap_or(Value::Null));
	}

	out
}

fn matches(row: &Value, predicate: &Predicate) -> bool {
	let value = row.get(&predicate.column).unwrap_or(&Value::Null);

	match predicate.op {
		CompareOp::Eq => json_eq(value, &predicate.value),
		CompareOp::Ne => !json_eq(value, &predicate.value),
		CompareOp::Contains => match (value.as_str(), predicate.value.as_str()) {
			(Some(haystack), Some(needle)) => haystack.contains(needle),
			_ => false,
		},
		CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
			let Some(ordering) = json_cmp(value, &predicate.value) else {
				return false;
			};

			match predicate.op {
				CompareOp::Lt => ordering.is_lt(),
				CompareOp::Le => ordering.is_le(),
				CompareOp::Gt => ordering.is_gt(),
				CompareOp::Ge => ordering.is_ge(),
				_ => unreachable!(),
			}
		},
	}
}

fn json_eq(left: &Value, right: &Value) -> bool {
	match (left.as_f64(), right.as_f64()) {
		(Some(a), Some(b)) => a == b,
		_ => left == right,
	}
}

fn json_cmp(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
	if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
		return a.partial_cmp(&b);
	}
	if let (Some(a), Some(b)) = (left.as_str(), right.as_str()) {
		return Some(a.cmp(b));
	}

	None
}

fn fold<'a, I>(rows: I, aggregate: &'a Aggregate) -> Value
where
	I: Iterator<Item = &'a Value> + 'a,
{
	match aggregate {
		Aggregate::Count => json!(rows.count()),
		Aggregate::Sum(column) => {
			let sum: f64 = numbers(rows, column).sum();

			json!(sum)
		},
		Aggregate::Avg(column) => {
			let values: Vec<f64> = numbers(rows, column).collect();

			if values.is_empty() {
				Value::Null
			} else {
				json!(values.iter().sum::<f64>() / values.len() as f64)
			}
		},
		Aggregate::Min(column) => fold_extremum(rows, column, |a, b| a < b),
		Aggregate::Max(column) => fold_extremum(rows, column, |a, b| a > b),
	}
}

fn numbers<'a, I>(rows: I, column: &'a str) -> impl Iterator<Item = f64> + 'a
where
	I: Iterator<Item = &'a Value> + 'a,
{
	rows.filter_map(move |row| row.get(column).and_then(Value::as_f64))
}

fn fold_extremum<'a, I>(rows: I, column: &str, keep_left: fn(f64, f64) -> bool) -> Value
where
	I: Iterator<Item = &'a Value>,
{
	let mut best: Option<f64> = None;

	for row in rows {
		if let Some(number) = row.get(column).and_then(Value::as_f64) {
			best = Some(match best {
				Some(current) if keep_left(current, number) => current,
				_ => number,
			});
		}
	}

	best.map(|number| json!(number)).unwrap_or(Value::Null)
}
