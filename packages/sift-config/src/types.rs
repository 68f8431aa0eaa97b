use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub chunking: Chunking,
	#[serde(default)]
	pub dedup: Dedup,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub tables: Tables,
	#[serde(default)]
	pub ingest: Ingest,
	#[serde(default)]
	pub security: Security,
	#[serde(default)]
	pub tenants: Vec<TenantOverride>,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub sqlite: Sqlite,
	pub vector: Vector,
	#[serde(default)]
	pub sparse: Sparse,
}

#[derive(Debug, Deserialize)]
pub struct Sqlite {
	pub path: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Vector {
	pub backend: VectorBackend,
	pub collection_prefix: String,
	pub qdrant: Option<Qdrant>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
	Memory,
	Qdrant,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Sparse {
	/// Empty keeps the index in RAM; a path persists it on disk.
	pub path: Option<String>,
	pub heap_bytes: usize,
}
impl Default for Sparse {
	fn default() -> Self {
		Self { path: None, heap_bytes: 50_000_000 }
	}
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	/// Ordered chain; the first entry is the primary provider.
	pub embedding: Vec<EmbeddingProviderConfig>,
	#[serde(default)]
	pub retry: Retry,
	#[serde(default = "default_embed_concurrency")]
	pub max_concurrency: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Retry {
	pub max_attempts: u32,
	pub base_backoff_ms: u64,
	pub max_backoff_ms: u64,
}
impl Default for Retry {
	fn default() -> Self {
		Self { max_attempts: 3, base_backoff_ms: 500, max_backoff_ms: 5_000 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Chunking {
	pub min_tokens: u32,
	pub max_tokens: u32,
	pub overlap_ratio: f32,
	pub tokenizer_repo: Option<String>,
}
impl Default for Chunking {
	fn default() -> Self {
		Self { min_tokens: 300, max_tokens: 500, overlap_ratio: 0.15, tokenizer_repo: None }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Dedup {
	pub threshold: f32,
	pub review_band: f32,
	pub candidate_k: u32,
}
impl Default for Dedup {
	fn default() -> Self {
		Self { threshold: 0.92, review_band: 0.05, candidate_k: 10 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub strategy: FusionStrategy,
	pub dense_weight: f32,
	pub sparse_weight: f32,
	pub candidate_n: u32,
	pub top_k: u32,
	pub rrf_k: u32,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			strategy: FusionStrategy::Weighted,
			dense_weight: 0.5,
			sparse_weight: 0.5,
			candidate_n: 50,
			top_k: 5,
			rrf_k: 60,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
	Weighted,
	Rrf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Tables {
	pub row_cap: u32,
	pub statement_timeout_ms: u64,
}
impl Default for Tables {
	fn default() -> Self {
		Self { row_cap: 500, statement_timeout_ms: 2_000 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Ingest {
	pub worker_pool: u32,
	pub batch_size: u32,
}
impl Default for Ingest {
	fn default() -> Self {
		Self { worker_pool: 4, batch_size: 32 }
	}
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Security {
	pub telemetry_token: Option<String>,
}

/// Per-tenant tuning merged over the global sections by [`Config::tenant`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TenantOverride {
	pub tenant_id: String,
	pub dedup_threshold: Option<f32>,
	pub dense_weight: Option<f32>,
	pub sparse_weight: Option<f32>,
	pub fusion_strategy: Option<FusionStrategy>,
	pub top_k: Option<u32>,
	pub row_cap: Option<u32>,
	pub embedding_model: Option<String>,
}

/// Immutable, fully resolved settings for one tenant. Built once per call so
/// concurrent tenants never observe each other's settings mid-change.
#[derive(Clone, Debug)]
pub struct TenantConfig {
	pub tenant_id: String,
	pub chunking: Chunking,
	pub dedup: Dedup,
	pub retrieval: Retrieval,
	pub tables: Tables,
	pub embedding_model: Option<String>,
}

fn default_embed_concurrency() -> u32 {
	4
}
