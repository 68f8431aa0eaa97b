use axum::{
	body::{self, Body},
	http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::util::ServiceExt;

use sift_api::{routes, state::AppState};
use sift_domain::policy::ColumnPolicy;
use sift_testkit::{Suite, SuiteBuilder, TELEMETRY_TOKEN};

async fn suite() -> Suite {
	SuiteBuilder::new().build().await.expect("Failed to build test suite.")
}

fn app(suite: &Suite) -> axum::Router {
	routes::router(AppState::with_service(suite.service.clone()))
}

async fn post_json(app: axum::Router, uri: &str, payload: Value) -> (StatusCode, Value) {
	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri(uri)
				.header("content-type", "application/json")
				.body(Body::from(payload.to_string()))
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call route.");
	let status = response.status();
	let bytes = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");
	let json = serde_json::from_slice(&bytes).expect("Failed to parse response.");

	(status, json)
}

fn document_payload(content: &str) -> Value {
	json!({
		"tenant_id": "acme",
		"source_ref": "drive://handbook.md",
		"content": content,
		"metadata": {
			"mime_type": "text/markdown",
			"title": "Handbook",
			"tags": ["hr"],
			"visibility": "internal"
		}
	})
}

fn employees_payload(rows: Value) -> Value {
	json!({
		"tenant_id": "acme",
		"name": "employees",
		"source_ref": "sql://hr/employees",
		"visibility": "internal",
		"rows": rows
	})
}

#[tokio::test]
async fn health_ok() {
	let suite = suite().await;
	let response = app(&suite)
		.oneshot(
			Request::builder()
				.uri("/health")
				.body(Body::empty())
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call /health.");

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn ingest_then_retrieve_round_trip() {
	let suite = suite().await;
	let content = "Employees accrue twenty five vacation days per year.";
	let (status, outcome) =
		post_json(app(&suite), "/v1/ingest/document", document_payload(content)).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(outcome["state"], "succeeded");
	assert_eq!(outcome["chunks_created"], 1);

	let (status, retrieved) = post_json(
		app(&suite),
		"/v1/retrieve",
		json!({
			"tenant_id": "acme",
			"role": "analyst",
			"query": content,
			"allowed_visibility": ["internal"],
			"top_k": 3
		}),
	)
	.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(retrieved["candidates"][0]["snippet"], content);
}

#[tokio::test]
async fn empty_document_is_rejected() {
	let suite = suite().await;
	let (status, body) =
		post_json(app(&suite), "/v1/ingest/document", document_payload("")).await;

	assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
	assert_eq!(body["error_code"], "validation");
}

#[tokio::test]
async fn telemetry_requires_bearer_token() {
	let suite = suite().await;
	let (status, _) =
		post_json(app(&suite), "/v1/ingest/document", document_payload("Telemetry body.")).await;

	assert_eq!(status, StatusCode::OK);

	let response = app(&suite)
		.oneshot(
			Request::builder()
				.uri("/v1/runs?tenant_id=acme")
				.body(Body::empty())
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call /v1/runs.");

	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

	let response = app(&suite)
		.oneshot(
			Request::builder()
				.uri("/v1/runs?tenant_id=acme")
				.header("authorization", format!("Bearer {TELEMETRY_TOKEN}"))
				.body(Body::empty())
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call /v1/runs.");

	assert_eq!(response.status(), StatusCode::OK);

	let bytes = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");
	let page: Value = serde_json::from_slice(&bytes).expect("Failed to parse response.");

	assert_eq!(page["runs"].as_array().map(Vec::len), Some(1));
	assert_eq!(page["runs"][0]["state"], "succeeded");
}

#[tokio::test]
async fn masked_column_is_forbidden() {
	let suite = suite().await;
	let rows = json!([
		{ "id": 1, "name": "Ada", "ssn": "111-22-3333" },
		{ "id": 2, "name": "Grace", "ssn": "444-55-6666" }
	]);
	let (status, _) = post_json(app(&suite), "/v1/ingest/table", employees_payload(rows)).await;

	assert_eq!(status, StatusCode::OK);

	suite
		.service
		.set_policy(
			"acme",
			"customer",
			"employees",
			&ColumnPolicy { masked_columns: vec!["ssn".to_string()], row_filters: Vec::new() },
		)
		.await
		.expect("Failed to store policy.");

	let intent = json!({ "table": "employees", "columns": ["ssn"] });
	let (status, body) = post_json(
		app(&suite),
		"/v1/table/query",
		json!({ "tenant_id": "acme", "role": "customer", "intent": intent.clone() }),
	)
	.await;

	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(body["error_code"], "policy_violation");

	let (status, body) = post_json(
		app(&suite),
		"/v1/table/query",
		json!({ "tenant_id": "acme", "role": "admin", "intent": intent }),
	)
	.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["rows"][0]["ssn"], "111-22-3333");
}

#[tokio::test]
async fn unknown_table_is_validation() {
	let suite = suite().await;
	let (status, body) = post_json(
		app(&suite),
		"/v1/table/query",
		json!({
			"tenant_id": "acme",
			"role": "analyst",
			"intent": { "table": "ghost" }
		}),
	)
	.await;

	assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
	assert_eq!(body["error_code"], "validation");
}
