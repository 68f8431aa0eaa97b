use std::collections::HashMap;

use qdrant_client::{
	Qdrant,
	client::Payload,
	qdrant::{
		Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointId,
		PointStruct, PointsIdsList, Query, QueryPointsBuilder, UpsertPointsBuilder, Value,
		VectorParamsBuilder, point_id::PointIdOptions, value::Kind,
	},
};
use uuid::Uuid;

use crate::{
	BoxFuture, DenseIndex, Error, PointPayload, Result, ScoredChunk, SearchFilter, VectorPoint,
};
use sift_domain::Visibility;

/// Production dense backend: one Qdrant collection per tenant, named
/// `{prefix}_{tenant}`, cosine distance. The collection name is derived from
/// the mandatory tenant parameter on every call.
pub struct QdrantDenseIndex {
	client: Qdrant,
	prefix: String,
	vector_dim: u32,
}
impl QdrantDenseIndex {
	pub fn new(cfg: &sift_config::Qdrant, prefix: &str, vector_dim: u32) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, prefix: prefix.to_string(), vector_dim })
	}

	fn collection_name(&self, tenant: &str) -> String {
		format!("{}_{tenant}", self.prefix)
	}
}

impl DenseIndex for QdrantDenseIndex {
	fn ensure_namespace<'a>(&'a self, tenant: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let collection = self.collection_name(tenant);

			if self.client.collection_exists(collection.clone()).await? {
				return Ok(());
			}

			let builder = CreateCollectionBuilder::new(collection.clone()).vectors_config(
				VectorParamsBuilder::new(self.vector_dim as u64, Distance::Cosine),
			);

			self.client.create_collection(builder).await?;

			tracing::info!(collection = %collection, vector_dim = self.vector_dim, "Created tenant collection.");

			Ok(())
		})
	}

	fn upsert<'a>(
		&'a self,
		tenant: &'a str,
		points: Vec<VectorPoint>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if points.is_empty() {
				return Ok(());
			}

			let mut structs = Vec::with_capacity(points.len());

			for point in points {
				if point.vector.len() != self.vector_dim as usize {
					return Err(Error::InvalidArgument(format!(
						"Vector dimension {} does not match configured {}.",
						point.vector.len(),
						self.vector_dim
					)));
				}

				structs.push(PointStruct::new(
					point.chunk_id.to_string(),
					point.vector,
					encode_payload(&point.payload),
				));
			}

			let upsert = UpsertPointsBuilder::new(self.collection_name(tenant), structs).wait(true);

			self.client.upsert_points(upsert).await?;

			Ok(())
		})
	}

	fn delete<'a>(&'a self, tenant: &'a str, chunk_ids: &'a [Uuid]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if chunk_ids.is_empty() {
				return Ok(());
			}

			let ids: Vec<PointId> =
				chunk_ids.iter().map(|chunk_id| PointId::from(chunk_id.to_string())).collect();
			let delete = DeletePointsBuilder::new(self.collection_name(tenant))
				.points(PointsIdsList { ids })
				.wait(true);

			self.client.delete_points(delete).await?;

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
			let mut builder = QueryPointsBuilder::new(self.collection_name(tenant))
				.query(Query::new_nearest(query.to_vec()))
				.limit(k as u64)
				.with_payload(true);

			if let Some(conditions) = encode_filter(filter) {
				builder = builder.filter(conditions);
			}

			let response = self.client.query(builder).await?;
			let mut out = Vec::with_capacity(response.result.len());

			for point in response.result {
				let Some(chunk_id) = point.id.as_ref().and_then(point_id_to_uuid) else {
					tracing::warn!("Scored point is missing a uuid id.");

					continue;
				};
				let Some(payload) = decode_payload(&point.payload) else {
					tracing::warn!(chunk_id = %chunk_id, "Scored point has an incomplete payload.");

					continue;
				};

				out.push(ScoredChunk { chunk_id, score: point.score, payload });
			}

			Ok(out)
		})
	}
}

fn encode_payload(payload: &PointPayload) -> Payload {
	let mut map = HashMap::new();

	map.insert("document_id".to_string(), Value::from(payload.document_id.to_string()));
	map.insert("ordinal".to_string(), Value::from(payload.ordinal as i64));
	map.insert("visibility".to_string(), Value::from(payload.visibility.as_str().to_string()));
	map.insert("source_type".to_string(), Value::from(payload.source_type.clone()));
	map.insert(
		"tags".to_string(),
		Value::from(serde_json::Value::from(payload.tags.clone())),
	);
	map.insert("representative".to_string(), Value::from(payload.representative));
	map.insert(
		"embedding_version".to_string(),
		Value::from(payload.embedding_version.clone()),
	);

	Payload::from(map)
}

fn encode_filter(filter: &SearchFilter) -> Option<Filter> {
	let mut must = Vec::new();

	if let Some(allowed) = filter.visibility.as_ref() {
		let scopes: Vec<String> = allowed.iter().map(|scope| scope.as_str().to_string()).collect();

		must.push(Condition::matches("visibility", scopes));
	}

	for tag in &filter.tags {
		must.push(Condition::matches("tags", tag.clone()));
	}

	if !filter.source_types.is_empty() {
		must.push(Condition::matches("source_type", filter.source_types.clone()));
	}
	if filter.representatives_only {
		must.push(Condition::matches("representative", true));
	}

	if must.is_empty() { None } else { Some(Filter::must(must)) }
}

fn decode_payload(payload: &HashMap<String, Value>) -> Option<PointPayload> {
	let document_id = payload_string(payload, "document_id")
		.and_then(|raw| Uuid::parse_str(raw.as_str()).ok())?;
	let ordinal = payload_i64(payload, "ordinal")? as i32;
	let visibility =
		payload_string(payload, "visibility").and_then(|raw| Visibility::parse(raw.as_str()))?;
	let source_type = payload_string(payload, "source_type")?;
	let tags = payload_string_list(payload, "tags").unwrap_or_default();
	let representative = payload_bool(payload, "representative").unwrap_or(false);
	let embedding_version = payload_string(payload, "embedding_version")?;

	Some(PointPayload {
		document_id,
		ordinal,
		visibility,
		source_type,
		tags,
		representative,
		embedding_version,
	})
}

fn point_id_to_uuid(point_id: &PointId) -> Option<Uuid> {
	match &point_id.point_id_options {
		Some(PointIdOptions::Uuid(id)) => Uuid::parse_str(id).ok(),
		_ => None,
	}
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	match &payload.get(key)?.kind {
		Some(Kind::StringValue(text)) => Some(text.to_string()),
		_ => None,
	}
}

fn payload_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
	match &payload.get(key)?.kind {
		Some(Kind::IntegerValue(value)) => Some(*value),
		_ => None,
	}
}

fn payload_bool(payload: &HashMap<String, Value>, key: &str) -> Option<bool> {
	match &payload.get(key)?.kind {
		Some(Kind::BoolValue(value)) => Some(*value),
		_ => None,
	}
}

fn payload_string_list(payload: &HashMap<String, Value>, key: &str) -> Option<Vec<String>> {
	match &payload.get(key)?.kind {
		Some(Kind::ListValue(list)) => Some(
			list.values
				.iter()
				.filter_map(|value| match &value.kind {
					Some(Kind::StringValue(text)) => Some(text.to_string()),
					_ => None,
				})
				.collect(),
		),
		_ => None,
	}
}
