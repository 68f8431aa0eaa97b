use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use serde_json::Map;

use sift_config::{EmbeddingProviderConfig, Providers, Retry};
use sift_providers::{BoxFuture, Broker, EmbeddingProvider, Error, Result};

fn provider_entry(provider_id: &str, model: &str) -> EmbeddingProviderConfig {
	EmbeddingProviderConfig {
		provider_id: provider_id.to_string(),
		api_base: "http://localhost".to_string(),
		api_key: "key".to_string(),
		path: "/v1/embeddings".to_string(),
		model: model.to_string(),
		dimensions: 4,
		timeout_ms: 1_000,
		default_headers: Map::new(),
	}
}

fn providers(chain: Vec<EmbeddingProviderConfig>) -> Providers {
	Providers {
		embedding: chain,
		retry: Retry { max_attempts: 3, base_backoff_ms: 1, max_backoff_ms: 2 },
		max_concurrency: 2,
	}
}

/// Fails the first `fail_first` calls with a transient error, then serves
/// constant unit-ish vectors of the configured dimensionality.
struct FlakyProvider {
	fail_first: usize,
	calls: Arc<AtomicUsize>,
}
impl EmbeddingProvider for FlakyProvider {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			let call = self.calls.fetch_add(1, Ordering::SeqCst);

			if call < self.fail_first {
				return Err(Error::Upstream { message: "Temporary upstream failure.".to_string() });
			}

			Ok(texts.iter().map(|_| vec![1.0_f32; cfg.dimensions as usize]).collect())
		})
	}
}

/// Fails every call routed to `broken_provider_id`, succeeds elsewhere.
struct PartitionedProvider {
	broken_provider_id: String,
	calls: Arc<AtomicUsize>,
}
impl EmbeddingProvider for PartitionedProvider {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			if cfg.provider_id == self.broken_provider_id {
				return Err(Error::Upstream { message: "Primary is down.".to_string() });
			}

			Ok(texts.iter().map(|_| vec![0.5_f32; cfg.dimensions as usize]).collect())
		})
	}
}

struct AlwaysDown;
impl EmbeddingProvider for AlwaysDown {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		_texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			Err(Error::Upstream { message: "Provider is unreachable.".to_string() })
		})
	}
}

struct WrongDimensions;
impl EmbeddingProvider for WrongDimensions {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(texts.iter().map(|_| vec![1.0_f32; 2]).collect()) })
	}
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
	let calls = Arc::new(AtomicUsize::new(0));
	let stub = FlakyProvider { fail_first: 2, calls: calls.clone() };
	let broker = Broker::new(&providers(vec![provider_entry("primary", "embed-small")]), Arc::new(stub));
	let texts = vec!["hello".to_string()];
	let embeddings = broker.embed(&texts, None).await.expect("Embedding should succeed.");

	assert_eq!(embeddings.vectors.len(), 1);
	assert_eq!(embeddings.vectors[0].len(), 4);
	assert_eq!(embeddings.version, "embed-small:4");
	assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn broken_primary_falls_through_to_fallback() {
	let calls = Arc::new(AtomicUsize::new(0));
	let stub = PartitionedProvider {
		broken_provider_id: "primary".to_string(),
		calls: calls.clone(),
	};
	let chain =
		vec![provider_entry("primary", "embed-small"), provider_entry("fallback", "embed-alt")];
	let broker = Broker::new(&providers(chain), Arc::new(stub));
	let texts = vec!["hello".to_string(), "world".to_string()];
	let embeddings = broker.embed(&texts, None).await.expect("Fallback should serve.");

	assert_eq!(embeddings.vectors.len(), 2);
	// Stamped with the model that actually produced the vectors.
	assert_eq!(embeddings.version, "embed-alt:4");
	// Primary retried to exhaustion before the fallback's first success.
	assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn chain_exhaustion_is_provider_unavailable() {
	let chain =
		vec![provider_entry("primary", "embed-small"), provider_entry("fallback", "embed-small")];
	let broker = Broker::new(&providers(chain), Arc::new(AlwaysDown));
	let texts = vec!["hello".to_string()];

	assert!(matches!(
		broker.embed(&texts, None).await,
		Err(Error::ProviderUnavailable { .. })
	));
}

#[tokio::test]
async fn dimension_mismatch_is_not_retried_as_success() {
	let broker = Broker::new(
		&providers(vec![provider_entry("primary", "embed-small")]),
		Arc::new(WrongDimensions),
	);
	let texts = vec!["hello".to_string()];

	assert!(matches!(
		broker.embed(&texts, None).await,
		Err(Error::ProviderUnavailable { .. })
	));
}

#[tokio::test]
async fn model_override_changes_request_and_stamp() {
	let calls = Arc::new(AtomicUsize::new(0));
	let stub = FlakyProvider { fail_first: 0, calls };
	let broker = Broker::new(&providers(vec![provider_entry("primary", "embed-small")]), Arc::new(stub));
	let texts = vec!["hello".to_string()];
	let embeddings =
		broker.embed(&texts, Some("embed-large")).await.expect("Embedding should succeed.");

	assert_eq!(embeddings.version, "embed-large:4");
	assert_eq!(broker.current_version(Some("embed-large")), "embed-large:4");
	assert_eq!(broker.current_version(None), "embed-small:4");
}

#[tokio::test]
async fn empty_input_short_circuits() {
	let calls = Arc::new(AtomicUsize::new(0));
	let stub = FlakyProvider { fail_first: 0, calls: calls.clone() };
	let broker = Broker::new(&providers(vec![provider_entry("primary", "embed-small")]), Arc::new(stub));
	let embeddings = broker.embed(&[], None).await.expect("Empty input is fine.");

	assert!(embeddings.vectors.is_empty());
	assert_eq!(calls.load(Ordering::SeqCst), 0);
}
