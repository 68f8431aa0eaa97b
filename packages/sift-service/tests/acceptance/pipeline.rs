use std::sync::Arc;

use super::suite::{document, hash_suite, retrieval};
use sift_domain::RunState;
use sift_service::Error;
use sift_storage::{clusters, docs};
use sift_testkit::{DownEmbedding, PresetEmbedding, SuiteBuilder};

#[tokio::test]
async fn identical_bytes_reingest_short_circuits() {
	let suite = hash_suite().await;
	let text = "Expense reports are due on the fifth business day.";
	let first = suite
		.service
		.submit_document(document("acme", "drive://expenses.md", text))
		.await
		.expect("First ingest should succeed.");

	assert_eq!(first.state, RunState::Succeeded);
	assert_eq!(first.chunks_created, 1);

	let clusters_before = clusters::count_clusters(suite.pool(), "acme")
		.await
		.expect("Cluster count should be readable.");
	let second = suite
		.service
		.submit_document(document("acme", "drive://expenses.md", text))
		.await
		.expect("Re-ingest should succeed.");

	assert_eq!(second.state, RunState::Succeeded);
	assert_eq!(second.chunks_created, 0);
	assert_eq!(second.embeddings_generated, 0);

	let clusters_after = clusters::count_clusters(suite.pool(), "acme")
		.await
		.expect("Cluster count should be readable.");

	assert_eq!(clusters_before, clusters_after);
}

#[tokio::test]
async fn indexed_literal_text_is_top_dense_hit() {
	let suite = hash_suite().await;
	let target = "Employees accrue twenty five vacation days per year.";
	let decoy = "The quarterly financial report covers revenue and costs.";

	suite
		.service
		.submit_document(document("acme", "drive://handbook.md", target))
		.await
		.expect("Ingest should succeed.");
	suite
		.service
		.submit_document(document("acme", "drive://finance.md", decoy))
		.await
		.expect("Ingest should succeed.");

	let response = suite
		.service
		.retrieve(retrieval("acme", target))
		.await
		.expect("Retrieval should succeed.");

	assert!(!response.candidates.is_empty());
	assert_eq!(response.candidates[0].snippet, target);
	// The literal match tops the normalized dense ranking.
	assert!((response.candidates[0].dense_score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn near_duplicates_merge_at_threshold() {
	let text_a = "Quarterly revenue grew in the north region.";
	let text_b = "Quarterly revenue increased in the north region.";
	let provider = PresetEmbedding::new()
		.with(text_a, vec![1.0, 0.0, 0.0, 0.0])
		// Cosine 0.95 against the representative, above the 0.92 threshold.
		.with(text_b, vec![0.95, 0.312_249_9, 0.0, 0.0]);
	let suite = SuiteBuilder::new()
		.dim(4)
		.provider(Arc::new(provider))
		.build()
		.await
		.expect("Failed to build test suite.");

	suite
		.service
		.submit_document(document("acme", "drive://a.md", text_a))
		.await
		.expect("Ingest should succeed.");

	let second = suite
		.service
		.submit_document(document("acme", "drive://b.md", text_b))
		.await
		.expect("Ingest should succeed.");

	assert_eq!(second.duplicates_skipped, 1);
	assert_eq!(
		clusters::count_clusters(suite.pool(), "acme").await.expect("Count should be readable."),
		1
	);
	// The duplicate never reaches the index; only the representative is
	// searchable.
	assert_eq!(suite.dense.point_count("acme"), 1);
}

#[tokio::test]
async fn distant_chunks_create_separate_clusters() {
	let text_a = "Quarterly revenue grew in the north region.";
	let text_c = "Security reviews happen before every release.";
	let provider = PresetEmbedding::new()
		.with(text_a, vec![1.0, 0.0, 0.0, 0.0])
		// Cosine 0.80: below the threshold and below the review band.
		.with(text_c, vec![0.8, 0.6, 0.0, 0.0]);
	let suite = SuiteBuilder::new()
		.dim(4)
		.provider(Arc::new(provider))
		.build()
		.await
		.expect("Failed to build test suite.");

	suite
		.service
		.submit_document(document("acme", "drive://a.md", text_a))
		.await
		.expect("Ingest should succeed.");

	let second = suite
		.service
		.submit_document(document("acme", "drive://c.md", text_c))
		.await
		.expect("Ingest should succeed.");

	assert_eq!(second.duplicates_skipped, 0);
	assert_eq!(
		clusters::count_clusters(suite.pool(), "acme").await.expect("Count should be readable."),
		2
	);
	assert_eq!(suite.dense.point_count("acme"), 2);
	assert!(
		clusters::list_reviews(suite.pool(), "acme")
			.await
			.expect("Reviews should be readable.")
			.is_empty()
	);
}

#[tokio::test]
async fn borderline_similarity_is_queued_for_review() {
	let text_a = "Quarterly revenue grew in the north region.";
	let text_d = "Quarterly revenue rose across the north region.";
	let provider = PresetEmbedding::new()
		.with(text_a, vec![1.0, 0.0, 0.0, 0.0])
		// Cosine 0.90: inside the review band just below the 0.92 threshold.
		.with(text_d, vec![0.9, 0.435_889_9, 0.0, 0.0]);
	let suite = SuiteBuilder::new()
		.dim(4)
		.provider(Arc::new(provider))
		.build()
		.await
		.expect("Failed to build test suite.");

	suite
		.service
		.submit_document(document("acme", "drive://a.md", text_a))
		.await
		.expect("Ingest should succeed.");
	suite
		.service
		.submit_document(document("acme", "drive://d.md", text_d))
		.await
		.expect("Ingest should succeed.");

	// Not merged: both chunks keep their own cluster, but the pair is
	// flagged for manual review instead of being silently separated.
	assert_eq!(
		clusters::count_clusters(suite.pool(), "acme").await.expect("Count should be readable."),
		2
	);

	let reviews = clusters::list_reviews(suite.pool(), "acme")
		.await
		.expect("Reviews should be readable.");

	assert_eq!(reviews.len(), 1);
	assert!(reviews[0].similarity >= 0.87 && reviews[0].similarity < 0.92);
}

#[tokio::test]
async fn tenant_namespaces_never_leak() {
	let suite = hash_suite().await;
	let text = "Tenant A's private onboarding checklist.";

	suite
		.service
		.submit_document(document("tenant_a", "drive://onboarding.md", text))
		.await
		.expect("Ingest should succeed.");

	let mut request = retrieval("tenant_b", text);

	request.allowed_visibility = vec![
		sift_domain::Visibility::Public,
		sift_domain::Visibility::Internal,
		sift_domain::Visibility::Restricted,
	];

	let response =
		suite.service.retrieve(request).await.expect("Retrieval should succeed.");

	assert!(response.candidates.is_empty());

	// The same holds under every filter combination.
	let mut filtered = retrieval("tenant_b", text);

	filtered.source_types = vec!["document".to_string()];
	filtered.tags = Vec::new();

	let response =
		suite.service.retrieve(filtered).await.expect("Retrieval should succeed.");

	assert!(response.candidates.is_empty());
	assert_eq!(suite.dense.point_count("tenant_b"), 0);
}

#[tokio::test]
async fn provider_outage_degrades_run_to_partial() {
	let suite = SuiteBuilder::new()
		.provider(Arc::new(DownEmbedding))
		.build()
		.await
		.expect("Failed to build test suite.");
	let outcome = suite
		.service
		.submit_document(document("acme", "drive://doomed.md", "Text that cannot be embedded."))
		.await
		.expect("The run itself should complete.");

	assert_eq!(outcome.state, RunState::Partial);
	assert_eq!(outcome.chunks_created, 1);
	assert_eq!(outcome.embeddings_generated, 0);
	assert_eq!(outcome.failures, 1);

	// Chunks that reached the dedup stage stay committed and retryable.
	let doc = docs::fetch_document_by_source(suite.pool(), "acme", "drive://doomed.md")
		.await
		.expect("Document should be readable.")
		.expect("Document row should exist.");
	let chunks = docs::fetch_chunks_for_document(suite.pool(), doc.document_id)
		.await
		.expect("Chunks should be readable.");

	assert_eq!(chunks.len(), 1);
	assert_eq!(chunks[0].index_state, "pending");
	assert!(chunks[0].embedding_version.is_none());
}

#[tokio::test]
async fn empty_document_is_rejected() {
	let suite = hash_suite().await;
	let result =
		suite.service.submit_document(document("acme", "drive://empty.md", "   \n\n ")).await;

	assert!(matches!(result, Err(Error::Validation { .. })));
}

#[tokio::test]
async fn unrecognized_mime_is_rejected() {
	let suite = hash_suite().await;
	let mut request = document("acme", "drive://blob.bin", "binary-ish");

	request.metadata.mime_type = "application/octet-stream".to_string();

	assert!(matches!(
		suite.service.submit_document(request).await,
		Err(Error::Validation { .. })
	));
}
