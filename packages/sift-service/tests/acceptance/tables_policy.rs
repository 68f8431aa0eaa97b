use serde_json::{Value, json};

use super::suite::hash_suite;
use sift_domain::{Visibility, policy::{ColumnPolicy, RowFilter}};
use sift_service::{Error, QueryIntent, RegisterTableRequest, TableQueryRequest};
use sift_storage::audit;
use sift_testkit::{Suite, SuiteBuilder};

fn employees(rows: Vec<Value>) -> RegisterTableRequest {
	RegisterTableRequest {
		tenant_id: "acme".to_string(),
		name: "employees".to_string(),
		source_ref: "sql://hr/employees".to_string(),
		visibility: Visibility::Internal,
		rows,
	}
}

fn base_rows() -> Vec<Value> {
	vec![
		json!({ "id": 1, "name": "Ada", "ssn": "111-22-3333", "region": "emea" }),
		json!({ "id": 2, "name": "Grace", "ssn": "444-55-6666", "region": "amer" }),
		json!({ "id": 3, "name": "Alan", "ssn": "777-88-9999", "region": "emea" }),
	]
}

fn query(role: &str, intent: QueryIntent) -> TableQueryRequest {
	TableQueryRequest {
		tenant_id: "acme".to_string(),
		role: role.to_string(),
		intent,
		snapshot_version: None,
	}
}

fn select(columns: &[&str]) -> QueryIntent {
	QueryIntent {
		table: "employees".to_string(),
		columns: columns.iter().map(ToString::to_string).collect(),
		aggregate: None,
		filters: Vec::new(),
		limit: None,
	}
}

async fn audited_outcomes(suite: &Suite) -> Vec<String> {
	audit::list_audit(suite.pool(), "acme", 20)
		.await
		.expect("Audit log should be readable.")
		.into_iter()
		.map(|entry| entry.outcome)
		.collect()
}

#[tokio::test]
async fn masked_column_is_denied_and_audited() {
	let suite = hash_suite().await;

	suite.service.register_table(employees(base_rows())).await.expect("Register should succeed.");
	suite
		.service
		.set_policy(
			"acme",
			"customer",
			"employees",
			&ColumnPolicy { masked_columns: vec!["ssn".to_string()], row_filters: Vec::new() },
		)
		.await
		.expect("Policy should store.");

	let denied = suite.service.query_table(query("customer", select(&["ssn"]))).await;

	assert!(matches!(denied, Err(Error::PolicyViolation { .. })));

	// The admin role has no masking policy and reads the same column.
	let allowed = suite
		.service
		.query_table(query("admin", select(&["id", "ssn"])))
		.await
		.expect("Admin query should succeed.");

	assert_eq!(allowed.rows.len(), 3);
	assert_eq!(allowed.rows[0]["ssn"], json!("111-22-3333"));

	// Both the denial and the success leave audit entries.
	let outcomes = audited_outcomes(&suite).await;

	assert!(outcomes.iter().any(|outcome| outcome == "denied"));
	assert!(outcomes.iter().any(|outcome| outcome == "ok"));
}

#[tokio::test]
async fn masked_columns_are_excluded_from_wildcard_projection() {
	let suite = hash_suite().await;

	suite.service.register_table(employees(base_rows())).await.expect("Register should succeed.");
	suite
		.service
		.set_policy(
			"acme",
			"customer",
			"employees",
			&ColumnPolicy { masked_columns: vec!["ssn".to_string()], row_filters: Vec::new() },
		)
		.await
		.expect("Policy should store.");

	// An empty selection means "everything visible", never a masked column.
	let response = suite
		.service
		.query_table(query("customer", select(&[])))
		.await
		.expect("Wildcard query should succeed.");

	assert!(response.rows.iter().all(|row| !row.contains_key("ssn")));
	assert!(response.rows.iter().all(|row| row.contains_key("name")));
}

#[tokio::test]
async fn row_filters_are_injected_unconditionally() {
	let suite = hash_suite().await;

	suite.service.register_table(employees(base_rows())).await.expect("Register should succeed.");
	suite
		.service
		.set_policy(
			"acme",
			"customer",
			"employees",
			&ColumnPolicy {
				masked_columns: vec!["ssn".to_string()],
				row_filters: vec![RowFilter {
					column: "region".to_string(),
					equals: json!("emea"),
				}],
			},
		)
		.await
		.expect("Policy should store.");

	// The intent asks for every row; the policy predicate still applies.
	let response = suite
		.service
		.query_table(query("customer", select(&["id", "region"])))
		.await
		.expect("Query should succeed.");

	assert_eq!(response.rows.len(), 2);
	assert!(response.rows.iter().all(|row| row["region"] == json!("emea")));
}

#[tokio::test]
async fn schema_drift_halts_refresh_and_keeps_prior_snapshot() {
	let suite = hash_suite().await;

	suite.service.register_table(employees(base_rows())).await.expect("Register should succeed.");

	// Refresh with the ssn column removed: incompatible with the schema the
	// masking policy was written against.
	let dropped = vec![
		json!({ "id": 1, "name": "Ada", "region": "emea" }),
		json!({ "id": 2, "name": "Grace", "region": "amer" }),
	];
	let result = suite.service.register_table(employees(dropped)).await;

	assert!(matches!(result, Err(Error::SchemaDrift { .. })));

	// The prior snapshot stays queryable unchanged.
	let response = suite
		.service
		.query_table(query("admin", select(&["id", "ssn"])))
		.await
		.expect("Prior snapshot should answer.");

	assert_eq!(response.snapshot_version, 1);
	assert_eq!(response.rows.len(), 3);

	let outcomes = audited_outcomes(&suite).await;

	assert!(outcomes.iter().any(|outcome| outcome == "drift"));
}

#[tokio::test]
async fn compatible_refresh_appends_a_new_version() {
	let suite = hash_suite().await;

	suite.service.register_table(employees(base_rows())).await.expect("Register should succeed.");

	// A new nullable column widens the schema; the refresh is compatible.
	let mut refreshed = base_rows();

	refreshed.push(json!({
		"id": 4, "name": "Edsger", "ssn": "000-11-2222", "region": "emea", "title": "Fellow"
	}));

	let report =
		suite.service.register_table(employees(refreshed)).await.expect("Refresh should succeed.");

	assert_eq!(report.snapshot_version, 2);

	// Latest answers with the new version; the prior version stays intact.
	let latest = suite
		.service
		.query_table(query("admin", select(&["id"])))
		.await
		.expect("Latest snapshot should answer.");

	assert_eq!(latest.snapshot_version, 2);
	assert_eq!(latest.rows.len(), 4);

	let mut pinned = query("admin", select(&["id"]));

	pinned.snapshot_version = Some(1);

	let prior = suite
		.service
		.query_table(pinned)
		.await
		.expect("Pinned snapshot should answer.");

	assert_eq!(prior.snapshot_version, 1);
	assert_eq!(prior.rows.len(), 3);
}

#[tokio::test]
async fn row_cap_truncates_with_indicator() {
	let suite = SuiteBuilder::new()
		.tenant(sift_config::TenantOverride {
			tenant_id: "acme".to_string(),
			row_cap: Some(5),
			..Default::default()
		})
		.build()
		.await
		.expect("Failed to build test suite.");
	let rows: Vec<Value> = (0..20)
		.map(|idx| json!({ "id": idx, "name": format!("user{idx}") }))
		.collect();

	suite.service.register_table(employees(rows)).await.expect("Register should succeed.");

	let response = suite
		.service
		.query_table(query("admin", select(&["id"])))
		.await
		.expect("Query should succeed.");

	assert_eq!(response.rows.len(), 5);
	assert_eq!(response.row_count, 5);
	assert!(response.truncated);

	// An intent limit can tighten but never exceed the cap.
	let mut wide = query("admin", select(&["id"]));

	wide.intent.limit = Some(100);

	let response = suite.service.query_table(wide).await.expect("Query should succeed.");

	assert_eq!(response.rows.len(), 5);
	assert!(response.truncated);
}

#[tokio::test]
async fn table_summaries_surface_in_retrieval() {
	let suite = hash_suite().await;

	suite.service.register_table(employees(base_rows())).await.expect("Register should succeed.");

	let mut request = super::suite::retrieval("acme", "Table employees columns");

	request.source_types = vec!["table".to_string()];

	let response =
		suite.service.retrieve(request).await.expect("Retrieval should succeed.");

	assert!(!response.candidates.is_empty());
	assert!(response.candidates.iter().all(|candidate| candidate.source_type == "table"));
	assert!(response.candidates.iter().any(|candidate| candidate.snippet.contains("employees")));
}
