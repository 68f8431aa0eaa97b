mod error;
mod providers;

pub use error::{Error, Result};
pub use providers::{DownEmbedding, HashEmbedding, PresetEmbedding, hash_vector};

use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use serde_json::Map;
use sqlx::SqlitePool;

use sift_chunking::HeuristicCounter;
use sift_config::{
	Chunking, Config, Dedup, EmbeddingProviderConfig, Ingest, Providers, Retrieval, Retry,
	Security, Service as ServiceSection, Sparse, Sqlite, Storage, Tables, TenantOverride, Vector,
	VectorBackend,
};
use sift_index::{
	BoxFuture, DenseIndex, MemoryDenseIndex, ScoredChunk, SearchFilter, SparseIndex,
	TantivySparseIndex, VectorPoint,
};
use sift_providers::{Broker, EmbeddingProvider};
use sift_service::Service;
use sift_storage::db::Db;

pub const TELEMETRY_TOKEN: &str = "sift-test-token";

/// A fully wired service over shared in-memory backends, so acceptance
/// suites run hermetically and tests can assert against the raw stores.
pub struct Suite {
	pub service: Arc<Service>,
	pub dense: Arc<MemoryDenseIndex>,
	pub sparse: Arc<TantivySparseIndex>,
}
impl Suite {
	pub fn pool(&self) -> &SqlitePool {
		&self.service.db.pool
	}
}

pub struct SuiteBuilder {
	dim: u32,
	model: String,
	provider: Arc<dyn EmbeddingProvider>,
	telemetry_token: Option<String>,
	tenants: Vec<TenantOverride>,
	fail_upserts: usize,
	shared_pool: Option<SqlitePool>,
	shared_dense: Option<Arc<MemoryDenseIndex>>,
	shared_sparse: Option<Arc<TantivySparseIndex>>,
}
impl SuiteBuilder {
	pub fn new() -> Self {
		Self {
			dim: 8,
			model: "stub-embed".to_string(),
			provider: Arc::new(HashEmbedding),
			telemetry_token: Some(TELEMETRY_TOKEN.to_string()),
			tenants: Vec::new(),
			fail_upserts: 0,
			shared_pool: None,
			shared_dense: None,
			shared_sparse: None,
		}
	}

	pub fn dim(mut self, dim: u32) -> Self {
		self.dim = dim;

		self
	}

	pub fn model(mut self, model: &str) -> Self {
		self.model = model.to_string();

		self
	}

	pub fn provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
		self.provider = provider;

		self
	}

	pub fn telemetry_token(mut self, token: Option<&str>) -> Self {
		self.telemetry_token = token.map(ToString::to_string);

		self
	}

	pub fn tenant(mut self, tenant: TenantOverride) -> Self {
		self.tenants.push(tenant);

		self
	}

	/// The first `count` dense upserts fail, exercising the pending-index
	/// reconciliation path.
	pub fn fail_upserts(mut self, count: usize) -> Self {
		self.fail_upserts = count;

		self
	}

	/// Reuse another suite's metadata store. Combined with fresh indexes this
	/// simulates a wiped vector store in front of intact durable state.
	pub fn share_storage(mut self, suite: &Suite) -> Self {
		self.shared_pool = Some(suite.pool().clone());

		self
	}

	pub fn share_indexes(mut self, suite: &Suite) -> Self {
		self.shared_dense = Some(suite.dense.clone());
		self.shared_sparse = Some(suite.sparse.clone());

		self
	}

	pub async fn build(self) -> Result<Suite> {
		let cfg = test_config(
			self.dim,
			&self.model,
			self.telemetry_token.as_deref(),
			self.tenants,
		);
		let db = match self.shared_pool {
			Some(pool) => Db { pool },
			None => {
				let db = Db::connect_in_memory().await?;

				db.ensure_schema().await?;

				db
			},
		};
		let dense = self.shared_dense.unwrap_or_else(|| Arc::new(MemoryDenseIndex::new()));
		let sparse = match self.shared_sparse {
			Some(sparse) => sparse,
			None => Arc::new(TantivySparseIndex::open_in_ram()?),
		};
		let dense_for_service: Arc<dyn DenseIndex> = if self.fail_upserts > 0 {
			Arc::new(FlakyDenseIndex {
				inner: dense.clone(),
				remaining_failures: AtomicUsize::new(self.fail_upserts),
			})
		} else {
			dense.clone()
		};
		let sparse_for_service: Arc<dyn SparseIndex> = sparse.clone();
		let broker = Broker::new(&cfg.providers, self.provider);
		let service = Service::new(
			cfg,
			db,
			dense_for_service,
			sparse_for_service,
			broker,
			Arc::new(HeuristicCounter),
		);

		Ok(Suite { service: Arc::new(service), dense, sparse })
	}
}
impl Default for SuiteBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn test_config(
	dim: u32,
	model: &str,
	telemetry_token: Option<&str>,
	tenants: Vec<TenantOverride>,
) -> Config {
	Config {
		service: ServiceSection {
			http_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
		},
		storage: Storage {
			sqlite: Sqlite { path: ":memory:".to_string(), pool_max_conns: 1 },
			vector: Vector {
				backend: VectorBackend::Memory,
				collection_prefix: "sift".to_string(),
				qdrant: None,
			},
			sparse: Sparse::default(),
		},
		providers: Providers {
			embedding: vec![EmbeddingProviderConfig {
				provider_id: "stub".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/embeddings".to_string(),
				model: model.to_string(),
				dimensions: dim,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			}],
			retry: Retry { max_attempts: 2, base_backoff_ms: 1, max_backoff_ms: 2 },
			max_concurrency: 4,
		},
		chunking: Chunking::default(),
		dedup: Dedup::default(),
		retrieval: Retrieval::default(),
		tables: Tables::default(),
		ingest: Ingest::default(),
		security: Security { telemetry_token: telemetry_token.map(ToString::to_string) },
		tenants,
	}
}

/// Fails the first N upserts with an internal error, then behaves like the
/// wrapped in-memory index. Reads are never affected.
struct FlakyDenseIndex {
	inner: Arc<MemoryDenseIndex>,
	remaining_failures: AtomicUsize,
}
impl DenseIndex for FlakyDenseIndex {
	fn ensure_namespace<'a>(&'a self, tenant: &'a str) -> BoxFuture<'a, sift_index::Result<()>> {
		self.inner.ensure_namespace(tenant)
	}

	fn upsert<'a>(
		&'a self,
		tenant: &'a str,
		points: Vec<VectorPoint>,
	) -> BoxFuture<'a, sift_index::Result<()>> {
		Box::pin(async move {
			let remaining = self.remaining_failures.load(Ordering::SeqCst);

			if remaining > 0 {
				self.remaining_failures.store(remaining - 1, Ordering::SeqCst);

				return Err(sift_index::Error::Internal(
					"Injected upsert failure.".to_string(),
				));
			}

			self.inner.upsert(tenant, points).await
		})
	}

	fn delete<'a>(
		&'a self,
		tenant: &'a str,
		chunk_ids: &'a [uuid::Uuid],
	) -> BoxFuture<'a, sift_index::Result<()>> {
		self.inner.delete(tenant, chunk_ids)
	}

	fn search<'a>(
		&'a self,
		tenant: &'a str,
		query: &'a [f32],
		filter: &'a SearchFilter,
		k: u32,
	) -> BoxFuture<'a, sift_index::Result<Vec<ScoredChunk>>> {
		self.inner.search(tenant, query, filter, k)
	}
}
