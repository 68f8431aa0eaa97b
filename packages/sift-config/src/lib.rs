mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Chunking, Config, Dedup, EmbeddingProviderConfig, FusionStrategy, Ingest, Providers, Qdrant,
	Retrieval, Retry, Security, Service, Sparse, Sqlite, Storage, Tables, TenantConfig,
	TenantOverride, Vector, VectorBackend,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.sqlite.path.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.sqlite.path must be non-empty.".to_string(),
		});
	}
	if cfg.storage.sqlite.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.sqlite.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.vector.collection_prefix.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.vector.collection_prefix must be non-empty.".to_string(),
		});
	}
	if cfg.storage.vector.backend == VectorBackend::Qdrant && cfg.storage.vector.qdrant.is_none() {
		return Err(Error::Validation {
			message: "storage.vector.qdrant is required when the qdrant backend is selected."
				.to_string(),
		});
	}
	if cfg.providers.embedding.is_empty() {
		return Err(Error::Validation {
			message: "providers.embedding must list at least one provider.".to_string(),
		});
	}

	let dimensions = cfg.providers.embedding[0].dimensions;

	for provider in &cfg.providers.embedding {
		if provider.provider_id.trim().is_empty() {
			return Err(Error::Validation {
				message: "providers.embedding.provider_id must be non-empty.".to_string(),
			});
		}
		if provider.api_key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!(
					"Provider {} api_key must be non-empty.",
					provider.provider_id
				),
			});
		}
		if provider.dimensions == 0 {
			return Err(Error::Validation {
				message: "providers.embedding.dimensions must be greater than zero.".to_string(),
			});
		}
		if provider.dimensions != dimensions {
			return Err(Error::Validation {
				message: "All embedding providers in the chain must share one dimensionality."
					.to_string(),
			});
		}
	}

	if cfg.providers.retry.max_attempts == 0 {
		return Err(Error::Validation {
			message: "providers.retry.max_attempts must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.max_concurrency == 0 {
		return Err(Error::Validation {
			message: "providers.max_concurrency must be greater than zero.".to_string(),
		});
	}

	validate_chunking(&cfg.chunking)?;
	validate_dedup(&cfg.dedup)?;
	validate_retrieval(&cfg.retrieval)?;
	validate_tables(&cfg.tables)?;

	if cfg.ingest.worker_pool == 0 {
		return Err(Error::Validation {
			message: "ingest.worker_pool must be greater than zero.".to_string(),
		});
	}
	if cfg.ingest.batch_size == 0 {
		return Err(Error::Validation {
			message: "ingest.batch_size must be greater than zero.".to_string(),
		});
	}

	for tenant in &cfg.tenants {
		if tenant.tenant_id.trim().is_empty() {
			return Err(Error::Validation {
				message: "tenants.tenant_id must be non-empty.".to_string(),
			});
		}

		if let Some(threshold) = tenant.dedup_threshold
			&& !(threshold > 0.0 && threshold <= 1.0)
		{
			return Err(Error::Validation {
				message: format!(
					"tenants.dedup_threshold for {} must be in (0.0, 1.0].",
					tenant.tenant_id
				),
			});
		}

		for (label, weight) in
			[("dense_weight", tenant.dense_weight), ("sparse_weight", tenant.sparse_weight)]
		{
			if let Some(weight) = weight
				&& !(weight.is_finite() && (0.0..=1.0).contains(&weight))
			{
				return Err(Error::Validation {
					message: format!(
						"tenants.{label} for {} must be in the range 0.0-1.0.",
						tenant.tenant_id
					),
				});
			}
		}

		if let Some(row_cap) = tenant.row_cap
			&& row_cap == 0
		{
			return Err(Error::Validation {
				message: format!(
					"tenants.row_cap for {} must be greater than zero.",
					tenant.tenant_id
				),
			});
		}
		if let Some(top_k) = tenant.top_k
			&& top_k == 0
		{
			return Err(Error::Validation {
				message: format!(
					"tenants.top_k for {} must be greater than zero.",
					tenant.tenant_id
				),
			});
		}
	}

	Ok(())
}

fn validate_chunking(chunking: &Chunking) -> Result<()> {
	if chunking.max_tokens == 0 {
		return Err(Error::Validation {
			message: "chunking.max_tokens must be greater than zero.".to_string(),
		});
	}
	if chunking.min_tokens > chunking.max_tokens {
		return Err(Error::Validation {
			message: "chunking.min_tokens must not exceed chunking.max_tokens.".to_string(),
		});
	}
	if !chunking.overlap_ratio.is_finite() || !(0.0..1.0).contains(&chunking.overlap_ratio) {
		return Err(Error::Validation {
			message: "chunking.overlap_ratio must be in the range 0.0-1.0 exclusive.".to_string(),
		});
	}

	Ok(())
}

fn validate_dedup(dedup: &Dedup) -> Result<()> {
	if !(dedup.threshold > 0.0 && dedup.threshold <= 1.0) {
		return Err(Error::Validation {
			message: "dedup.threshold must be in (0.0, 1.0].".to_string(),
		});
	}
	if !dedup.review_band.is_finite() || dedup.review_band < 0.0 {
		return Err(Error::Validation {
			message: "dedup.review_band must be zero or greater.".to_string(),
		});
	}
	if dedup.candidate_k == 0 {
		return Err(Error::Validation {
			message: "dedup.candidate_k must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_retrieval(retrieval: &Retrieval) -> Result<()> {
	for (label, weight) in
		[("dense_weight", retrieval.dense_weight), ("sparse_weight", retrieval.sparse_weight)]
	{
		if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
			return Err(Error::Validation {
				message: format!("retrieval.{label} must be in the range 0.0-1.0."),
			});
		}
	}

	if retrieval.dense_weight + retrieval.sparse_weight <= 0.0 {
		return Err(Error::Validation {
			message: "retrieval weights must not both be zero.".to_string(),
		});
	}
	if retrieval.candidate_n == 0 {
		return Err(Error::Validation {
			message: "retrieval.candidate_n must be greater than zero.".to_string(),
		});
	}
	if retrieval.top_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_k must be greater than zero.".to_string(),
		});
	}
	if retrieval.rrf_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.rrf_k must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_tables(tables: &Tables) -> Result<()> {
	if tables.row_cap == 0 {
		return Err(Error::Validation {
			message: "tables.row_cap must be greater than zero.".to_string(),
		});
	}
	if tables.statement_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "tables.statement_timeout_ms must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.chunking.tokenizer_repo.as_deref().map(|repo| repo.trim().is_empty()).unwrap_or(false) {
		cfg.chunking.tokenizer_repo = None;
	}
	if cfg
		.security
		.telemetry_token
		.as_deref()
		.map(|token| token.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.security.telemetry_token = None;
	}
	if cfg
		.storage
		.sparse
		.path
		.as_deref()
		.map(|path| path.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.storage.sparse.path = None;
	}
}

impl Config {
	/// Resolve the effective settings for one tenant by layering its
	/// overrides on the global sections.
	pub fn tenant(&self, tenant_id: &str) -> TenantConfig {
		let overrides = self.tenants.iter().find(|t| t.tenant_id == tenant_id);
		let mut dedup = self.dedup.clone();
		let mut retrieval = self.retrieval.clone();
		let mut tables = self.tables.clone();
		let mut embedding_model = None;

		if let Some(overrides) = overrides {
			if let Some(threshold) = overrides.dedup_threshold {
				dedup.threshold = threshold;
			}
			if let Some(weight) = overrides.dense_weight {
				retrieval.dense_weight = weight;
			}
			if let Some(weight) = overrides.sparse_weight {
				retrieval.sparse_weight = weight;
			}
			if let Some(strategy) = overrides.fusion_strategy {
				retrieval.strategy = strategy;
			}
			if let Some(top_k) = overrides.top_k {
				retrieval.top_k = top_k;
			}
			if let Some(row_cap) = overrides.row_cap {
				tables.row_cap = row_cap;
			}

			embedding_model = overrides.embedding_model.clone();
		}

		TenantConfig {
			tenant_id: tenant_id.to_string(),
			chunking: self.chunking.clone(),
			dedup,
			retrieval,
			tables,
			embedding_model,
		}
	}
}
