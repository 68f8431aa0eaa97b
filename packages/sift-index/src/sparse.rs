use std::{path::Path, sync::Mutex};

use tantivy::{
	Index, IndexReader, IndexWriter, TantivyDocument, Term,
	collector::TopDocs,
	doc,
	query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
	schema::{
		Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions, Value,
	},
	tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
};
use uuid::Uuid;

use crate::{Error, Result, SearchFilter};

const WRITER_MEMORY_BUDGET: usize = 50_000_000;

/// One chunk as the sparse index sees it.
#[derive(Clone, Debug)]
pub struct SparseDoc {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	pub text: String,
	pub visibility: sift_domain::Visibility,
	pub source_type: String,
	pub tags: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct SparseHit {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	pub score: f32,
}

/// Keyword/BM25 collaborator interface of the hybrid engine. The tenant is a
/// mandatory parameter, enforced as a term filter on every query.
pub trait SparseIndex
where
	Self: Send + Sync,
{
	fn upsert(&self, tenant: &str, docs: &[SparseDoc]) -> Result<()>;

	fn delete(&self, tenant: &str, chunk_ids: &[Uuid]) -> Result<()>;

	fn search(
		&self,
		tenant: &str,
		query: &str,
		filter: &SearchFilter,
		n: u32,
	) -> Result<Vec<SparseHit>>;
}

#[derive(Clone, Copy)]
struct Fields {
	chunk_id: Field,
	document_id: Field,
	tenant: Field,
	visibility: Field,
	source_type: Field,
	tags: Field,
	body: Field,
}

/// Embedded BM25 index over chunk text. English stemming, lowercased terms,
/// tenant and metadata kept as raw terms for filtering.
pub struct TantivySparseIndex {
	index: Index,
	reader: IndexReader,
	writer: Mutex<IndexWriter>,
	fields: Fields,
}
impl TantivySparseIndex {
	pub fn open_in_ram() -> Result<Self> {
		let (schema, fields) = build_schema();
		let index = Index::create_in_ram(schema);

		Self::finish(index, fields)
	}

	pub fn open(dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(dir)
			.map_err(|err| Error::Internal(format!("Failed to create sparse index dir: {err}.")))?;

		let (schema, fields) = build_schema();
		let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
			.map_err(|err| tantivy::TantivyError::SystemError(err.to_string()))?;
		let index = if Index::exists(&mmap_dir)
			.map_err(|err| tantivy::TantivyError::SystemError(err.to_string()))?
		{
			Index::open(mmap_dir)?
		} else {
			Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
		};

		Self::finish(index, fields)
	}

	fn finish(index: Index, fields: Fields) -> Result<Self> {
		register_tokenizers(&index);

		let writer = index.writer(WRITER_MEMORY_BUDGET)?;
		let reader = index.reader()?;

		Ok(Self { index, reader, writer: Mutex::new(writer), fields })
	}
}

fn build_schema() -> (Schema, Fields) {
	let mut builder = Schema::builder();
	let chunk_id = builder.add_text_field("chunk_id", STRING | STORED);
	let document_id = builder.add_text_field("document_id", STRING | STORED);
	let tenant = builder.add_text_field("tenant", STRING);
	let visibility = builder.add_text_field("visibility", STRING);
	let source_type = builder.add_text_field("source_type", STRING);
	let tags = builder.add_text_field("tags", STRING);
	let body_opts = TextOptions::default().set_indexing_options(
		TextFieldIndexing::default()
			.set_tokenizer("en_stem")
			.set_index_option(IndexRecordOption::WithFreqsAndPositions),
	);
	let body = builder.add_text_field("body", body_opts);
	let schema = builder.build();
	let fields = Fields { chunk_id, document_id, tenant, visibility, source_type, tags, body };

	(schema, fields)
}

fn register_tokenizers(index: &Index) {
	let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(RemoveLongFilter::limit(40))
		.filter(LowerCaser)
		.filter(Stemmer::new(tantivy::tokenizer::Language::English))
		.build();

	index.tokenizers().register("en_stem", en_stem);
}

impl SparseIndex for TantivySparseIndex {
	fn upsert(&self, tenant: &str, docs: &[SparseDoc]) -> Result<()> {
		if docs.is_empty() {
			return Ok(());
		}

		let f = self.fields;
		let mut writer = self.writer.lock().unwrap_or_else(|err| err.into_inner());

		for entry in docs {
			let id_term = Term::from_field_text(f.chunk_id, &entry.chunk_id.to_string());

			writer.delete_term(id_term);

			let mut document = doc!(
				f.chunk_id => entry.chunk_id.to_string(),
				f.document_id => entry.document_id.to_string(),
				f.tenant => tenant,
				f.visibility => entry.visibility.as_str(),
				f.source_type => entry.source_type.as_str(),
				f.body => entry.text.as_str(),
			);

			for tag in &entry.tags {
				document.add_text(f.tags, tag);
			}

			writer.add_document(document)?;
		}

		writer.commit()?;

		Ok(())
	}

	fn delete(&self, tenant: &str, chunk_ids: &[Uuid]) -> Result<()> {
		// Chunk ids are uuids, already unique across tenants; the tenant
		// parameter keeps the call signature namespaced.
		let _ = tenant;

		if chunk_ids.is_empty() {
			return Ok(());
		}

		let f = self.fields;
		let mut writer = self.writer.lock().unwrap_or_else(|err| err.into_inner());

		for chunk_id in chunk_ids {
			writer.delete_term(Term::from_field_text(f.chunk_id, &chunk_id.to_string()));
		}

		writer.commit()?;

		Ok(())
	}

	fn search(
		&self,
		tenant: &str,
		query: &str,
		filter: &SearchFilter,
		n: u32,
	) -> Result<Vec<SparseHit>> {
		let f = self.fields;

		self.reader.reload()?;

		let searcher = self.reader.searcher();
		let parser = QueryParser::for_index(&self.index, vec![f.body]);
		let (body_query, _errors) = parser.parse_query_lenient(query);
		let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![
			(Occur::Must, body_query),
			(
				Occur::Must,
				Box::new(TermQuery::new(
					Term::from_field_text(f.tenant, tenant),
					IndexRecordOption::Basic,
				)),
			),
		];

		if let Some(allowed) = filter.visibility.as_ref() {
			let scopes: Vec<(Occur, Box<dyn Query>)> = allowed
				.iter()
				.map(|scope| {
					let term = Term::from_field_text(f.visibility, scope.as_str());
					let query: Box<dyn Query> =
						Box::new(TermQuery::new(term, IndexRecordOption::Basic));

					(Occur::Should, query)
				})
				.collect();

			clauses.push((Occur::Must, Box::new(BooleanQuery::new(scopes))));
		}

		for tag in &filter.tags {
			clauses.push((
				Occur::Must,
				Box::new(TermQuery::new(
					Term::from_field_text(f.tags, tag),
					IndexRecordOption::Basic,
				)),
			));
		}

		if !filter.source_types.is_empty() {
			let kinds: Vec<(Occur, Box<dyn Query>)> = filter
				.source_types
				.iter()
				.map(|kind| {
					let term = Term::from_field_text(f.source_type, kind);
					let query: Box<dyn Query> =
						Box::new(TermQuery::new(term, IndexRecordOption::Basic));

					(Occur::Should, query)
				})
				.collect();

			clauses.push((Occur::Must, Box::new(BooleanQuery::new(kinds))));
		}

		let combined = BooleanQuery::new(clauses);
		let top_docs = searcher.search(&combined, &TopDocs::with_limit(n as usize))?;
		let mut out = Vec::with_capacity(top_docs.len());

		for (score, address) in top_docs {
			let document: TantivyDocument = searcher.doc(address)?;
			let chunk_id = extract_uuid(&document, f.chunk_id);
			let document_id = extract_uuid(&document, f.document_id);

			if let (Some(chunk_id), Some(document_id)) = (chunk_id, document_id) {
				out.push(SparseHit { chunk_id, document_id, score });
			}
		}

		Ok(out)
	}
}

fn extract_uuid(document: &TantivyDocument, field: Field) -> Option<Uuid> {
	document.get_first(field).and_then(|value| value.as_str()).and_then(|raw| Uuid::parse_str(raw).ok())
}
