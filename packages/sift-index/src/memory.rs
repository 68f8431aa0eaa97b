use std::{cmp::Ordering, sync::RwLock};

use ahash::AHashMap;
use uuid::Uuid;

use crate::{
	BoxFuture, DenseIndex, Result, ScoredChunk, SearchFilter, VectorPoint, cosine_sim,
};

/// Embedded dense backend: per-tenant maps, brute-force cosine ranking with
/// the same pre-filter semantics as the Qdrant backend. Read-your-write,
/// which is stronger than the trait contract requires.
#[derive(Default)]
pub struct MemoryDenseIndex {
	tenants: RwLock<AHashMap<String, AHashMap<Uuid, VectorPoint>>>,
}
impl MemoryDenseIndex {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn point_count(&self, tenant: &str) -> usize {
		let tenants = self.tenants.read().unwrap_or_else(|err| err.into_inner());

		tenants.get(tenant).map(|points| points.len()).unwrap_or(0)
	}
}

impl DenseIndex for MemoryDenseIndex {
	fn ensure_namespace<'a>(&'a self, tenant: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut tenants = self.tenants.write().unwrap_or_else(|err| err.into_inner());

			tenants.entry(tenant.to_string()).or_default();

			Ok(())
		})
	}

	fn upsert<'a>(
		&'a self,
		tenant: &'a str,
		points: Vec<VectorPoint>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut tenants = self.tenants.write().unwrap_or_else(|err| err.into_inner());
			let namespace = tenants.entry(tenant.to_string()).or_default();

			for point in points {
				namespace.insert(point.chunk_id, point);
			}

			Ok(())
		})
	}

	fn delete<'a>(&'a self, tenant: &'a str, chunk_ids: &'a [Uuid]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut tenants = self.tenants.write().unwrap_or_else(|err| err.into_inner());

			if let Some(namespace) = tenants.get_mut(tenant) {
				for chunk_id in chunk_ids {
					namespace.remove(chunk_id);
				}
			}

			Ok(())
		})
	}

	fn search<'a>(
		&'a self,
		tenant: &'a str,
		query: &'a [f32],
		filter: &'a SearchFilter,
		k: u32,
	) -> BoxFuture<'a, Result<Vec<ScoredChunk>>> {
		Box::pin(async move {
			let tenants = self.tenants.read().unwrap_or_else(|err| err.into_inner());
			let Some(namespace) = tenants.get(tenant) else {
				return Ok(Vec::new());
			};
			let mut scored: Vec<ScoredChunk> = namespace
				.values()
				.filter(|point| filter.matches(&point.payload))
				.map(|point| ScoredChunk {
					chunk_id: point.chunk_id,
					score: cosine_sim(query, &point.vector),
					payload: point.payload.clone(),
				})
				.collect();

			scored.sort_by(|a, b| {
				b.score
					.partial_cmp(&a.score)
					.unwrap_or(Ordering::Equal)
					.then_with(|| a.chunk_id.cmp(&b.chunk_id))
			});
			scored.truncate(k as usize);

			Ok(scored)
		})
	}
}
