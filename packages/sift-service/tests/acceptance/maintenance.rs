use super::suite::{document, hash_suite, retrieval};
use sift_domain::RunState;
use sift_service::{Error, RunListRequest};
use sift_storage::{docs, pending};
use sift_testkit::{SuiteBuilder, TELEMETRY_TOKEN};

fn list_request(token: Option<&str>) -> RunListRequest {
	RunListRequest {
		token: token.map(ToString::to_string),
		tenant_id: "acme".to_string(),
		limit: None,
		offset: None,
	}
}

#[tokio::test]
async fn telemetry_surface_requires_the_configured_token() {
	let suite = hash_suite().await;
	let outcome = suite
		.service
		.submit_document(document("acme", "drive://a.md", "Telemetry test body."))
		.await
		.expect("Ingest should succeed.");

	assert!(matches!(
		suite.service.list_runs(list_request(None)).await,
		Err(Error::Unauthorized { .. })
	));
	assert!(matches!(
		suite.service.list_runs(list_request(Some("wrong"))).await,
		Err(Error::Unauthorized { .. })
	));

	let page = suite
		.service
		.list_runs(list_request(Some(TELEMETRY_TOKEN)))
		.await
		.expect("Listing should succeed with the token.");

	assert_eq!(page.runs.len(), 1);
	assert_eq!(page.runs[0].state, RunState::Succeeded);
	assert!(!page.has_more);

	let detail = suite
		.service
		.run_detail(Some(TELEMETRY_TOKEN), outcome.run_id)
		.await
		.expect("Detail should succeed with the token.");
	let stages: Vec<&str> = detail.events.iter().map(|event| event.stage.as_str()).collect();

	assert!(stages.contains(&"received"));
	assert!(stages.contains(&"normalizing"));
	assert!(stages.contains(&"embedding"));
	assert!(stages.contains(&"indexing"));
}

#[tokio::test]
async fn unconfigured_telemetry_surface_is_closed() {
	let suite = SuiteBuilder::new()
		.telemetry_token(None)
		.build()
		.await
		.expect("Failed to build test suite.");

	assert!(matches!(
		suite.service.list_runs(list_request(Some(TELEMETRY_TOKEN))).await,
		Err(Error::Unauthorized { .. })
	));
}

#[tokio::test]
async fn failed_index_upserts_are_reconciled() {
	let suite = SuiteBuilder::new()
		.fail_upserts(1)
		.build()
		.await
		.expect("Failed to build test suite.");
	let text = "Reconciliation candidate body.";
	let outcome = suite
		.service
		.submit_document(document("acme", "drive://flaky.md", text))
		.await
		.expect("Run should complete.");

	// The vector upsert failed after the metadata commit: the run degrades
	// and the chunk is parked, never silently unsearchable.
	assert_eq!(outcome.state, RunState::Partial);
	assert_eq!(outcome.failures, 1);
	assert_eq!(suite.dense.point_count("acme"), 0);
	assert_eq!(
		pending::count_open(suite.pool(), "acme").await.expect("Queue should be readable."),
		1
	);

	let report =
		suite.service.reconcile_pending().await.expect("Reconciliation should succeed.");

	assert_eq!(report.processed, 1);
	assert_eq!(report.failed, 0);
	assert_eq!(
		pending::count_open(suite.pool(), "acme").await.expect("Queue should be readable."),
		0
	);
	assert_eq!(suite.dense.point_count("acme"), 1);

	// The chunk is searchable after reconciliation.
	let response = suite
		.service
		.retrieve(retrieval("acme", text))
		.await
		.expect("Retrieval should succeed.");

	assert_eq!(response.candidates.len(), 1);
	assert_eq!(response.candidates[0].snippet, text);
}

#[tokio::test]
async fn model_change_marks_and_reembeds_stale_vectors() {
	let first = hash_suite().await;
	let text = "Stable content under a changing embedding model.";

	first
		.service
		.submit_document(document("acme", "drive://stable.md", text))
		.await
		.expect("Ingest should succeed.");

	let doc = docs::fetch_document_by_source(first.pool(), "acme", "drive://stable.md")
		.await
		.expect("Document should be readable.")
		.expect("Document row should exist.");
	let chunk_id = docs::fetch_chunks_for_document(first.pool(), doc.document_id)
		.await
		.expect("Chunks should be readable.")[0]
		.chunk_id;

	assert!(
		docs::fetch_embedding(first.pool(), chunk_id, "stub-embed:8")
			.await
			.expect("Embedding should be readable.")
			.is_some()
	);

	// The same durable state and indexes, seen by a service whose configured
	// model version moved on.
	let second = SuiteBuilder::new()
		.model("stub-embed-v2")
		.share_storage(&first)
		.share_indexes(&first)
		.build()
		.await
		.expect("Failed to build upgraded suite.");
	let report = second
		.service
		.reembed_stale("acme", 32)
		.await
		.expect("Re-embedding should succeed.");

	assert_eq!(report.marked_stale, 1);
	assert_eq!(report.reembedded, 1);
	assert_eq!(report.failures, 0);

	let chunk = docs::fetch_chunk(second.pool(), chunk_id)
		.await
		.expect("Chunk should be readable.")
		.expect("Chunk row should exist.");

	assert_eq!(chunk.embedding_version.as_deref(), Some("stub-embed-v2:8"));

	let refreshed = docs::fetch_embedding(second.pool(), chunk_id, "stub-embed-v2:8")
		.await
		.expect("Embedding should be readable.")
		.expect("New embedding row should exist.");

	assert!(!refreshed.stale);
	// The superseded vector is dropped only after its replacement landed.
	assert!(
		docs::fetch_embedding(second.pool(), chunk_id, "stub-embed:8")
			.await
			.expect("Embedding should be readable.")
			.is_none()
	);

	// A second pass finds nothing left to do.
	let report = second
		.service
		.reembed_stale("acme", 32)
		.await
		.expect("Re-embedding should succeed.");

	assert_eq!(report.marked_stale, 0);
	assert_eq!(report.reembedded, 0);
}

#[tokio::test]
async fn rebuild_restores_indexes_from_stored_vectors() {
	let first = hash_suite().await;
	let text_a = "Vacation policy grants twenty five days.";
	let text_b = "Incident response has a one hour escalation window.";

	first
		.service
		.submit_document(document("acme", "drive://a.md", text_a))
		.await
		.expect("Ingest should succeed.");
	first
		.service
		.submit_document(document("acme", "drive://b.md", text_b))
		.await
		.expect("Ingest should succeed.");

	// Same durable store, empty indexes: the wiped-vector-store scenario.
	let second = SuiteBuilder::new()
		.share_storage(&first)
		.build()
		.await
		.expect("Failed to build rebuilt suite.");

	assert_eq!(second.dense.point_count("acme"), 0);

	let report =
		second.service.rebuild_index("acme").await.expect("Rebuild should succeed.");

	assert_eq!(report.points, 2);
	assert_eq!(report.skipped, 0);
	assert_eq!(second.dense.point_count("acme"), 2);

	let response = second
		.service
		.retrieve(retrieval("acme", text_a))
		.await
		.expect("Retrieval should succeed.");

	assert_eq!(response.candidates[0].snippet, text_a);
}

#[tokio::test]
async fn cancellation_stops_before_the_next_stage() {
	let suite = hash_suite().await;
	let run_id = uuid::Uuid::new_v4();

	// Cancellation requested before submission: the pipeline finishes its
	// current stage and never starts the next one.
	suite.service.cancel_run(run_id);

	let outcome = suite
		.service
		.submit_document_with_run_id(
			run_id,
			document("acme", "drive://cancelled.md", "Body that never reaches the index."),
		)
		.await
		.expect("Run should complete.");

	assert_eq!(outcome.state, RunState::Failed);
	assert!(outcome.chunks_created >= 1);
	assert_eq!(outcome.embeddings_generated, 0);
	assert_eq!(suite.dense.point_count("acme"), 0);
}
