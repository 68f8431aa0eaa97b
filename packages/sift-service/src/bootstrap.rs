use std::{path::Path, sync::Arc};

use crate::{Error, Result, Service};
use sift_chunking::{HeuristicCounter, TokenCounter};
use sift_config::{Config, VectorBackend};
use sift_index::{DenseIndex, MemoryDenseIndex, QdrantDenseIndex, SparseIndex, TantivySparseIndex};
use sift_providers::Broker;
use sift_storage::db::Db;

impl Service {
	/// Wire the full stack from a validated config: durable store, retrieval
	/// backends, embedding broker and token counter. Shared by the HTTP
	/// server and the maintenance worker.
	pub async fn connect(cfg: Config) -> Result<Self> {
		let db = if cfg.storage.sqlite.path == ":memory:" {
			Db::connect_in_memory().await?
		} else {
			Db::connect(&cfg.storage.sqlite).await?
		};

		db.ensure_schema().await?;

		let broker = Broker::http(&cfg.providers);
		let dense: Arc<dyn DenseIndex> = match cfg.storage.vector.backend {
			VectorBackend::Memory => Arc::new(MemoryDenseIndex::new()),
			VectorBackend::Qdrant => {
				let qdrant = cfg.storage.vector.qdrant.as_ref().ok_or_else(|| Error::Init {
					message: "Qdrant backend selected without a qdrant section.".to_string(),
				})?;

				Arc::new(QdrantDenseIndex::new(
					qdrant,
					&cfg.storage.vector.collection_prefix,
					broker.dimensions(),
				)?)
			},
		};
		let sparse: Arc<dyn SparseIndex> = match cfg.storage.sparse.path.as_deref() {
			Some(path) => Arc::new(TantivySparseIndex::open(Path::new(path))?),
			None => Arc::new(TantivySparseIndex::open_in_ram()?),
		};
		let token_counter: Arc<dyn TokenCounter> = match cfg.chunking.tokenizer_repo.as_deref() {
			Some(repo) => Arc::new(sift_chunking::load_tokenizer(repo).map_err(|err| {
				Error::Init { message: format!("Failed to load tokenizer {repo}: {err}") }
			})?),
			None => Arc::new(HeuristicCounter),
		};

		Ok(Self::new(cfg, db, dense, sparse, broker, token_counter))
	}
}
