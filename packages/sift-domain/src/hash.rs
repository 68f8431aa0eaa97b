/// Hex blake3 digest of raw document bytes. Stable across restarts; used as
/// the idempotency key for re-ingestion.
pub fn content_hash(bytes: &[u8]) -> String {
	blake3::hash(bytes).to_hex().to_string()
}

/// Hex blake3 digest of a chunk's own text, used by the exact dedup tier.
pub fn text_hash(text: &str) -> String {
	content_hash(text.as_bytes())
}
