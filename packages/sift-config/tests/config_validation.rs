use toml::Value;

use sift_config::{Config, Error, FusionStrategy};

const SAMPLE_CONFIG_TOML: &str = include_str!("fixtures/sample_config.toml");

fn parse(raw: &str) -> Config {
	toml::from_str(raw).expect("Failed to parse sample config.")
}

fn sample_with<F>(edit: F) -> String
where
	F: FnOnce(&mut toml::map::Map<String, Value>),
{
	let mut value: Value =
		toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.");
	let root = value.as_table_mut().expect("Sample config must be a table.");

	edit(root);

	toml::to_string(&value).expect("Failed to render sample config.")
}

#[test]
fn sample_config_validates() {
	let cfg = parse(SAMPLE_CONFIG_TOML);

	sift_config::validate(&cfg).expect("Sample config should validate.");
}

#[test]
fn empty_provider_chain_is_rejected() {
	let raw = sample_with(|root| {
		let providers = root
			.get_mut("providers")
			.and_then(Value::as_table_mut)
			.expect("Sample config must include [providers].");

		providers.insert("embedding".to_string(), Value::Array(Vec::new()));
	});
	let cfg = parse(&raw);

	assert!(matches!(sift_config::validate(&cfg), Err(Error::Validation { .. })));
}

#[test]
fn mismatched_provider_dimensions_are_rejected() {
	let raw = sample_with(|root| {
		let chain = root
			.get_mut("providers")
			.and_then(Value::as_table_mut)
			.and_then(|providers| providers.get_mut("embedding"))
			.and_then(Value::as_array_mut)
			.expect("Sample config must include providers.embedding.");
		let fallback = chain[1].as_table_mut().expect("Provider entry must be a table.");

		fallback.insert("dimensions".to_string(), Value::Integer(16));
	});
	let cfg = parse(&raw);

	assert!(matches!(sift_config::validate(&cfg), Err(Error::Validation { .. })));
}

#[test]
fn zero_row_cap_is_rejected() {
	let raw = sample_with(|root| {
		let tables = root
			.get_mut("tables")
			.and_then(Value::as_table_mut)
			.expect("Sample config must include [tables].");

		tables.insert("row_cap".to_string(), Value::Integer(0));
	});
	let cfg = parse(&raw);

	assert!(matches!(sift_config::validate(&cfg), Err(Error::Validation { .. })));
}

#[test]
fn overlap_ratio_of_one_is_rejected() {
	let raw = sample_with(|root| {
		let chunking = root
			.get_mut("chunking")
			.and_then(Value::as_table_mut)
			.expect("Sample config must include [chunking].");

		chunking.insert("overlap_ratio".to_string(), Value::Float(1.0));
	});
	let cfg = parse(&raw);

	assert!(matches!(sift_config::validate(&cfg), Err(Error::Validation { .. })));
}

#[test]
fn tenant_overrides_layer_over_globals() {
	let cfg = parse(SAMPLE_CONFIG_TOML);
	let acme = cfg.tenant("acme");
	let other = cfg.tenant("globex");

	assert_eq!(acme.dedup.threshold, 0.95);
	assert_eq!(acme.retrieval.dense_weight, 0.6);
	assert_eq!(acme.retrieval.sparse_weight, 0.4);
	assert_eq!(acme.tables.row_cap, 200);
	assert_eq!(acme.retrieval.strategy, FusionStrategy::Weighted);

	assert_eq!(other.dedup.threshold, 0.92);
	assert_eq!(other.retrieval.dense_weight, 0.5);
	assert_eq!(other.tables.row_cap, 500);
}

#[test]
fn defaults_fill_missing_tuning_sections() {
	let raw = sample_with(|root| {
		root.remove("chunking");
		root.remove("dedup");
		root.remove("retrieval");
		root.remove("tables");
		root.remove("ingest");
		root.remove("security");
	});
	let cfg = parse(&raw);

	sift_config::validate(&cfg).expect("Defaults should validate.");

	assert_eq!(cfg.dedup.threshold, 0.92);
	assert_eq!(cfg.retrieval.top_k, 5);
	assert_eq!(cfg.tables.row_cap, 500);
	assert!(cfg.security.telemetry_token.is_none());
}
