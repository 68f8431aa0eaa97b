use std::collections::HashMap;

use sift_config::EmbeddingProviderConfig;
use sift_providers::{BoxFuture, EmbeddingProvider, Error, Result};

/// Deterministic bag-of-words embedding. Identical text always maps to the
/// identical unit vector, and shared words raise cosine similarity, so
/// round-trip retrieval assertions hold without a live provider.
pub struct HashEmbedding;
impl EmbeddingProvider for HashEmbedding {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			Ok(texts.iter().map(|text| hash_vector(text, cfg.dimensions as usize)).collect())
		})
	}
}

pub fn hash_vector(text: &str, dim: usize) -> Vec<f32> {
	let mut out = vec![0.0_f32; dim];

	for word in text.split_whitespace() {
		let cleaned: String = word
			.chars()
			.filter(char::is_ascii_alphanumeric)
			.map(|c| c.to_ascii_lowercase())
			.collect();

		if cleaned.is_empty() {
			continue;
		}

		let digest = blake3::hash(cleaned.as_bytes());
		let bucket = u32::from_le_bytes(
			digest.as_bytes()[..4].try_into().expect("Digest has at least four bytes."),
		) as usize
			% dim;

		out[bucket] += 1.0;
	}

	let magnitude: f32 = out.iter().map(|value| value * value).sum::<f32>().sqrt();

	if magnitude < f32::EPSILON {
		out[0] = 1.0;
	} else {
		for value in &mut out {
			*value /= magnitude;
		}
	}

	out
}

/// Serves exactly the vectors a test registers, with an orthogonal-ish
/// fallback for unregistered text. Used to pin cosine similarities in
/// dedup-threshold and fusion assertions.
pub struct PresetEmbedding {
	vectors: HashMap<String, Vec<f32>>,
}
impl PresetEmbedding {
	pub fn new() -> Self {
		Self { vectors: HashMap::new() }
	}

	pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
		self.vectors.insert(text.to_string(), vector);

		self
	}
}
impl Default for PresetEmbedding {
	fn default() -> Self {
		Self::new()
	}
}
impl EmbeddingProvider for PresetEmbedding {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			let dim = cfg.dimensions as usize;

			Ok(texts
				.iter()
				.map(|text| {
					self.vectors.get(text).cloned().unwrap_or_else(|| {
						let mut fallback = vec![0.0_f32; dim];

						fallback[dim - 1] = 1.0;

						fallback
					})
				})
				.collect())
		})
	}
}

/// Every call fails with a transient upstream error; chain exhaustion then
/// surfaces as `ProviderUnavailable` and runs degrade to partial.
pub struct DownEmbedding;
impl EmbeddingProvider for DownEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		_texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			Err(Error::Upstream { message: "Embedding provider is down.".to_string() })
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cosine(a: &[f32], b: &[f32]) -> f32 {
		a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
	}

	#[test]
	fn identical_text_hashes_to_identical_unit_vectors() {
		let a = hash_vector("vacation days policy", 8);
		let b = hash_vector("vacation days policy", 8);

		assert_eq!(a, b);
		assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
	}

	#[test]
	fn shared_words_raise_similarity() {
		let query = hash_vector("vacation days", 32);
		let related = hash_vector("vacation days remaining", 32);
		let unrelated = hash_vector("quarterly financial report", 32);

		assert!(cosine(&query, &related) > cosine(&query, &unrelated));
	}

	#[test]
	fn blank_text_still_yields_a_unit_vector() {
		let vector = hash_vector("", 4);

		assert!((cosine(&vector, &vector) - 1.0).abs() < 1e-5);
	}
}
