use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::{sync::Semaphore, time};

use crate::{BoxFuture, EmbeddingProvider, Error, Result};
use sift_config::{EmbeddingProviderConfig, Providers, Retry};

/// Vectors together with the model version that produced them. The stamp is
/// `model:dimensions`, independent of which chain entry served the call.
#[derive(Clone, Debug)]
pub struct Embeddings {
	pub vectors: Vec<Vec<f32>>,
	pub version: String,
}

/// Walks an ordered provider chain, retrying each entry with exponential
/// backoff and jitter before falling through to the next one. Chain
/// exhaustion surfaces as [`Error::ProviderUnavailable`]. Concurrency is
/// capped independently of the ingestion worker pool so provider rate
/// limits are honored under pipelined load.
pub struct Broker {
	chain: Vec<EmbeddingProviderConfig>,
	retry: RetrySettings,
	provider: Arc<dyn EmbeddingProvider>,
	limiter: Arc<Semaphore>,
}

#[derive(Clone, Debug)]
struct RetrySettings {
	max_attempts: u32,
	base_backoff_ms: u64,
	max_backoff_ms: u64,
}
impl From<&Retry> for RetrySettings {
	fn from(retry: &Retry) -> Self {
		Self {
			max_attempts: retry.max_attempts,
			base_backoff_ms: retry.base_backoff_ms,
			max_backoff_ms: retry.max_backoff_ms,
		}
	}
}

struct HttpProvider;
impl EmbeddingProvider for HttpProvider {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(crate::embedding::embed(cfg, texts))
	}
}

impl Broker {
	pub fn new(providers: &Providers, provider: Arc<dyn EmbeddingProvider>) -> Self {
		Self {
			chain: providers.embedding.clone(),
			retry: RetrySettings::from(&providers.retry),
			provider,
			limiter: Arc::new(Semaphore::new(providers.max_concurrency as usize)),
		}
	}

	pub fn http(providers: &Providers) -> Self {
		Self::new(providers, Arc::new(HttpProvider))
	}

	pub fn dimensions(&self) -> u32 {
		self.chain.first().map(|cfg| cfg.dimensions).unwrap_or(0)
	}

	/// The version new vectors are expected to carry for a tenant. Stored
	/// vectors with a different stamp are stale and due for re-embedding.
	pub fn current_version(&self, model_override: Option<&str>) -> String {
		let primary = self.chain.first();
		let model = model_override
			.or(primary.map(|cfg| cfg.model.as_str()))
			.unwrap_or_default();

		format!("{model}:{}", self.dimensions())
	}

	pub async fn embed(
		&self,
		texts: &[String],
		model_override: Option<&str>,
	) -> Result<Embeddings> {
		if texts.is_empty() {
			return Ok(Embeddings {
				vectors: Vec::new(),
				version: self.current_version(model_override),
			});
		}

		let _permit = self
			.limiter
			.acquire()
			.await
			.map_err(|_| Error::ProviderUnavailable {
				message: "Embedding limiter is closed.".to_string(),
			})?;
		let mut last_error: Option<Error> = None;

		for entry in &self.chain {
			let cfg = match model_override {
				Some(model) => {
					let mut cfg = entry.clone();

					cfg.model = model.to_string();

					cfg
				},
				None => entry.clone(),
			};

			match self.embed_with_retry(&cfg, texts).await {
				Ok(vectors) => {
					return Ok(Embeddings {
						vectors,
						version: format!("{}:{}", cfg.model, cfg.dimensions),
					});
				},
				Err(err) => {
					tracing::warn!(
						provider = %cfg.provider_id,
						error = %err,
						"Embedding provider failed. Falling through the chain."
					);

					last_error = Some(err);
				},
			}
		}

		let message = match last_error {
			Some(err) => err.to_string(),
			None => "Provider chain is empty.".to_string(),
		};

		Err(Error::ProviderUnavailable { message })
	}

	async fn embed_with_retry(
		&self,
		cfg: &EmbeddingProviderConfig,
		texts: &[String],
	) -> Result<Vec<Vec<f32>>> {
		let mut last_error: Option<Error> = None;

		for attempt in 1..=self.retry.max_attempts {
			match self.provider.embed(cfg, texts).await {
				Ok(vectors) => {
					validate_vectors(cfg, texts.len(), &vectors)?;

					return Ok(vectors);
				},
				Err(err @ Error::InvalidResponse { .. }) => {
					// A malformed body will not improve on retry.
					return Err(err);
				},
				Err(err) => {
					tracing::debug!(
						provider = %cfg.provider_id,
						attempt,
						error = %err,
						"Embedding attempt failed."
					);

					last_error = Some(err);
				},
			}

			if attempt < self.retry.max_attempts {
				time::sleep(self.backoff_for_attempt(attempt)).await;
			}
		}

		Err(last_error.unwrap_or(Error::ProviderUnavailable {
			message: "Retry loop ended without an attempt.".to_string(),
		}))
	}

	fn backoff_for_attempt(&self, attempt: u32) -> Duration {
		let exp = attempt.saturating_sub(1).min(6);
		let base = self.retry.base_backoff_ms.saturating_mul(1 << exp);
		let capped = base.min(self.retry.max_backoff_ms);
		let jitter = if capped == 0 { 0 } else { rand::thread_rng().gen_range(0..=capped / 2) };

		Duration::from_millis(capped + jitter)
	}
}

fn validate_vectors(
	cfg: &EmbeddingProviderConfig,
	expected: usize,
	vectors: &[Vec<f32>],
) -> Result<()> {
	if vectors.len() != expected {
		return Err(Error::InvalidResponse {
			message: format!(
				"Provider {} returned {} vectors for {expected} texts.",
				cfg.provider_id,
				vectors.len()
			),
		});
	}

	for vector in vectors {
		if vector.len() != cfg.dimensions as usize {
			return Err(Error::InvalidResponse {
				message: format!(
					"Provider {} returned dimension {} instead of {}.",
					cfg.provider_id,
					vector.len(),
					cfg.dimensions
				),
			});
		}
	}

	Ok(())
}
