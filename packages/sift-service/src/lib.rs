pub mod admin;
pub mod dedup;
pub mod ingest;
pub mod retrieve;
pub mod table_query;
pub mod tables;

mod bootstrap;
mod error;

pub use admin::{
	RebuildReport, ReconcileReport, ReembedReport, RunDetail, RunEventView, RunListPage,
	RunListRequest, RunSummary,
};
pub use error::{Error, Result};
pub use ingest::{DocumentMetadata, SubmitDocumentRequest, SubmitOutcome};
pub use retrieve::{RetrievalCandidate, RetrieveRequest, RetrieveResponse};
pub use table_query::{
	Aggregate, CompareOp, Predicate, QueryIntent, TableQueryRequest, TableQueryResponse,
};
pub use tables::{RegisterTableRequest, TableReport};

use std::{
	collections::{HashMap, HashSet},
	sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use uuid::Uuid;

use sift_chunking::{ChunkingOptions, TokenCounter};
use sift_config::{Config, TenantConfig};
use sift_index::{DenseIndex, SparseIndex};
use sift_providers::Broker;
use sift_storage::db::Db;

pub struct Service {
	pub cfg: Config,
	pub db: Db,
	pub dense: Arc<dyn DenseIndex>,
	pub sparse: Arc<dyn SparseIndex>,
	pub broker: Broker,
	token_counter: Arc<dyn TokenCounter>,
	worker_pool: Arc<Semaphore>,
	tenant_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
	cancelled_runs: Mutex<HashSet<Uuid>>,
}
impl Service {
	pub fn new(
		cfg: Config,
		db: Db,
		dense: Arc<dyn DenseIndex>,
		sparse: Arc<dyn SparseIndex>,
		broker: Broker,
		token_counter: Arc<dyn TokenCounter>,
	) -> Self {
		let worker_pool = Arc::new(Semaphore::new(cfg.ingest.worker_pool as usize));

		Self {
			cfg,
			db,
			dense,
			sparse,
			broker,
			token_counter,
			worker_pool,
			tenant_locks: Mutex::new(HashMap::new()),
			cancelled_runs: Mutex::new(HashSet::new()),
		}
	}

	/// Request cancellation of an in-flight run. The current stage finishes
	/// naturally; no new stage starts afterwards.
	pub fn cancel_run(&self, run_id: Uuid) {
		let mut cancelled = self.cancelled_runs.lock().unwrap_or_else(|err| err.into_inner());

		cancelled.insert(run_id);
	}

	pub(crate) fn take_cancellation(&self, run_id: Uuid) -> bool {
		let mut cancelled = self.cancelled_runs.lock().unwrap_or_else(|err| err.into_inner());

		cancelled.remove(&run_id)
	}

	pub(crate) fn is_cancelled(&self, run_id: Uuid) -> bool {
		let cancelled = self.cancelled_runs.lock().unwrap_or_else(|err| err.into_inner());

		cancelled.contains(&run_id)
	}

	/// Cluster mutations for one tenant are serialized behind this lock
	/// (single-writer discipline; two concurrent ingests must not create
	/// duplicate clusters for the same content).
	pub(crate) fn tenant_lock(&self, tenant_id: &str) -> Arc<AsyncMutex<()>> {
		let mut locks = self.tenant_locks.lock().unwrap_or_else(|err| err.into_inner());

		locks.entry(tenant_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	pub(crate) fn worker_pool(&self) -> Arc<Semaphore> {
		self.worker_pool.clone()
	}

	pub(crate) fn token_counter(&self) -> &dyn TokenCounter {
		self.token_counter.as_ref()
	}

	pub(crate) fn chunking_options(&self, tenant_cfg: &TenantConfig) -> ChunkingOptions {
		let chunking = &tenant_cfg.chunking;
		let overlap_tokens = (chunking.max_tokens as f32 * chunking.overlap_ratio) as u32;

		ChunkingOptions {
			min_tokens: chunking.min_tokens,
			max_tokens: chunking.max_tokens,
			overlap_tokens,
		}
	}
}
