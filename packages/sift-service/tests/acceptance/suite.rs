use sift_domain::Visibility;
use sift_service::{DocumentMetadata, RetrieveRequest, SubmitDocumentRequest};
use sift_testkit::{Suite, SuiteBuilder};

pub async fn hash_suite() -> Suite {
	SuiteBuilder::new().build().await.expect("Failed to build test suite.")
}

pub fn document(tenant_id: &str, source_ref: &str, text: &str) -> SubmitDocumentRequest {
	SubmitDocumentRequest {
		tenant_id: tenant_id.to_string(),
		source_ref: source_ref.to_string(),
		bytes: text.as_bytes().to_vec(),
		metadata: DocumentMetadata {
			mime_type: "text/plain".to_string(),
			title: None,
			author: None,
			tags: Vec::new(),
			visibility: Visibility::Internal,
		},
	}
}

pub fn retrieval(tenant_id: &str, query: &str) -> RetrieveRequest {
	RetrieveRequest {
		tenant_id: tenant_id.to_string(),
		role: "analyst".to_string(),
		query: query.to_string(),
		allowed_visibility: vec![Visibility::Internal],
		tags: Vec::new(),
		source_types: Vec::new(),
		top_k: Some(5),
	}
}
