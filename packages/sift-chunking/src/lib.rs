pub use tokenizers::Tokenizer;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

pub type TokenizerError = tokenizers::Error;

#[derive(Clone, Debug)]
pub struct ChunkingOptions {
	pub min_tokens: u32,
	pub max_tokens: u32,
	pub overlap_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct DraftChunk {
	pub ordinal: i32,
	pub text: String,
	pub token_count: u32,
	pub content_hash: String,
}

/// Token counting is pluggable so the splitter works with a real tokenizer
/// in production and a deterministic heuristic in embedded setups.
pub trait TokenCounter
where
	Self: Send + Sync,
{
	fn count(&self, text: &str) -> usize;
}

/// Approximates subword tokenization: every word contributes one token per
/// four characters, minimum one. Used when no tokenizer repo is configured.
pub struct HeuristicCounter;
impl TokenCounter for HeuristicCounter {
	fn count(&self, text: &str) -> usize {
		text.unicode_words().map(|word| word.chars().count().div_ceil(4).max(1)).sum()
	}
}

impl TokenCounter for Tokenizer {
	fn count(&self, text: &str) -> usize {
		match self.encode(text, false) {
			Ok(encoding) => encoding.len(),
			Err(err) => {
				tracing::error!(error = %err, "Tokenizer failed to encode text.");

				0
			},
		}
	}
}

pub fn load_tokenizer(repo: &str) -> Result<Tokenizer, TokenizerError> {
	Tokenizer::from_pretrained(repo, None)
}

/// NFC-normalize and canonicalize line endings before splitting.
pub fn normalize(text: &str) -> String {
	text.replace("\r\n", "\n").replace('\r', "\n").nfc().collect()
}

/// Split normalized text into bounded chunks: paragraph boundaries first,
/// then sentences, then words, with a fixed-stride window as the last
/// resort for unbroken runs. Non-blank input always yields at least one
/// chunk.
pub fn split_text(text: &str, opts: &ChunkingOptions, counter: &dyn TokenCounter) -> Vec<DraftChunk> {
	let mut texts = Vec::new();

	pack_level(text, Level::Paragraph, opts, counter, &mut texts);

	let mut chunks = Vec::with_capacity(texts.len());

	for text in texts {
		let trimmed = text.trim();

		if trimmed.is_empty() {
			continue;
		}

		chunks.push(DraftChunk {
			ordinal: chunks.len() as i32,
			text: trimmed.to_string(),
			token_count: counter.count(trimmed) as u32,
			content_hash: sift_domain::hash::text_hash(trimmed),
		});
	}

	chunks
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Level {
	Paragraph,
	Sentence,
	Word,
}
impl Level {
	fn finer(self) -> Option<Self> {
		match self {
			Self::Paragraph => Some(Self::Sentence),
			Self::Sentence => Some(Self::Word),
			Self::Word => None,
		}
	}
}

fn segments(text: &str, level: Level) -> Vec<&str> {
	match level {
		Level::Paragraph => {
			// Segments keep their trailing separator so concatenation
			// reproduces the input byte for byte.
			let mut out = Vec::new();
			let mut start = 0_usize;

			for (idx, _) in text.match_indices("\n\n") {
				if idx + 2 > start {
					out.push(&text[start..idx + 2]);
				}

				start = idx + 2;
			}
			if start < text.len() {
				out.push(&text[start..]);
			}

			out
		},
		Level::Sentence => text.split_sentence_bounds().collect(),
		Level::Word => text.split_word_bounds().collect(),
	}
}

fn pack_level(
	text: &str,
	level: Level,
	opts: &ChunkingOptions,
	counter: &dyn TokenCounter,
	out: &mut Vec<String>,
) {
	let max = opts.max_tokens as usize;
	let mut current = String::new();

	for segment in segments(text, level) {
		if segment.trim().is_empty() {
			current.push_str(segment);

			continue;
		}

		let candidate_count = counter.count(&format!("{current}{segment}"));

		if candidate_count > max && !current.trim().is_empty() {
			flush(&mut current, opts, counter, out);
		}

		if counter.count(segment) > max {
			flush(&mut current, opts, counter, out);
			// The oversized segment is not adjacent to the overlap tail once
			// it is split on its own, so drop the tail.
			current.clear();

			match level.finer() {
				Some(finer) => pack_level(segment, finer, opts, counter, out),
				None => window_split(segment, opts, counter, out),
			}

			continue;
		}

		current.push_str(segment);
	}

	flush(&mut current, opts, counter, out);
}

fn flush(
	current: &mut String,
	opts: &ChunkingOptions,
	counter: &dyn TokenCounter,
	out: &mut Vec<String>,
) {
	if current.trim().is_empty() {
		current.clear();

		return;
	}

	let finished = std::mem::take(current);
	let tail = overlap_tail(&finished, opts.overlap_tokens, counter);

	out.push(finished);

	*current = tail;
}

/// Trailing words of a finished chunk carried into the next one so no
/// information is lost at a boundary.
fn overlap_tail(text: &str, overlap_tokens: u32, counter: &dyn TokenCounter) -> String {
	if overlap_tokens == 0 {
		return String::new();
	}

	let words: Vec<&str> = text.split_word_bounds().collect();
	let mut start = words.len();
	let mut taken = String::new();

	while start > 0 {
		let candidate: String = words[start - 1..].concat();

		if counter.count(&candidate) > overlap_tokens as usize {
			break;
		}

		taken = candidate;
		start -= 1;
	}

	taken
}

/// Fixed-stride window over an unbroken run that no boundary splitter can
/// reduce. The stride is derived from the run's observed chars-per-token so
/// every window stays within the token budget.
fn window_split(
	text: &str,
	opts: &ChunkingOptions,
	counter: &dyn TokenCounter,
	out: &mut Vec<String>,
) {
	let graphemes: Vec<&str> = text.graphemes(true).collect();

	if graphemes.is_empty() {
		return;
	}

	let total_tokens = counter.count(text).max(1);
	let chars_per_token = (graphemes.len() as f32 / total_tokens as f32).max(1.0);
	let window = ((opts.max_tokens as f32 * chars_per_token) as usize).max(1);
	let overlap = ((opts.overlap_tokens as f32 * chars_per_token) as usize).min(window - 1);
	let stride = (window - overlap).max(1);
	let mut start = 0_usize;

	while start < graphemes.len() {
		let end = (start + window).min(graphemes.len());

		out.push(graphemes[start..end].concat());

		if end == graphemes.len() {
			break;
		}

		start += stride;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn opts(max_tokens: u32, overlap_tokens: u32) -> ChunkingOptions {
		ChunkingOptions { min_tokens: max_tokens / 2, max_tokens, overlap_tokens }
	}

	#[test]
	fn normalize_canonicalizes_line_endings() {
		assert_eq!(normalize("a\r\nb\rc"), "a\nb\nc");
	}

	#[test]
	fn short_input_yields_single_chunk() {
		let chunks = split_text("One short paragraph.", &opts(100, 10), &HeuristicCounter);

		assert_eq!(chunks.len(), 1);
		assert_eq!(chunks[0].ordinal, 0);
		assert_eq!(chunks[0].text, "One short paragraph.");
	}

	#[test]
	fn paragraphs_pack_within_token_budget() {
		let text = (0..40)
			.map(|idx| format!("Paragraph number {idx} talks about retrieval quality."))
			.collect::<Vec<_>>()
			.join("\n\n");
		let options = opts(30, 4);
		let chunks = split_text(&text, &options, &HeuristicCounter);

		assert!(chunks.len() > 1);

		for chunk in &chunks {
			assert!(chunk.token_count as usize <= options.max_tokens as usize);
		}

		for (idx, chunk) in chunks.iter().enumerate() {
			assert_eq!(chunk.ordinal, idx as i32);
		}
	}

	#[test]
	fn oversized_sentence_falls_through_to_words() {
		let sentence =
			(0..200).map(|idx| format!("word{idx}")).collect::<Vec<_>>().join(" ") + ".";
		let options = opts(20, 2);
		let chunks = split_text(&sentence, &options, &HeuristicCounter);

		assert!(chunks.len() > 1);

		for chunk in &chunks {
			assert!(chunk.token_count <= options.max_tokens);
		}
	}

	#[test]
	fn unbroken_run_uses_window_fallback_without_dropping_text() {
		let run = "x".repeat(4_000);
		let options = opts(50, 5);
		let chunks = split_text(&run, &options, &HeuristicCounter);

		assert!(chunks.len() > 1);

		// Windows overlap, so the total coverage meets or exceeds the run.
		let covered: usize = chunks.iter().map(|chunk| chunk.text.len()).sum();

		assert!(covered >= run.len());
		assert!(chunks.iter().all(|chunk| chunk.text.chars().all(|c| c == 'x')));
	}

	#[test]
	fn consecutive_chunks_share_an_overlap_tail() {
		let text = (0..80)
			.map(|idx| format!("Sentence number {idx} is here."))
			.collect::<Vec<_>>()
			.join(" ");
		let chunks = split_text(&text, &opts(25, 5), &HeuristicCounter);

		assert!(chunks.len() > 1);

		let first_tail: String =
			chunks[0].text.split_whitespace().rev().take(2).collect::<Vec<_>>().join(" ");

		assert!(!first_tail.is_empty());
		// The second chunk starts with material repeated from the first.
		let last_word = chunks[0].text.split_whitespace().last().unwrap();

		assert!(chunks[1].text.contains(last_word));
	}

	#[test]
	fn blank_input_yields_no_chunks() {
		assert!(split_text("", &opts(100, 10), &HeuristicCounter).is_empty());
		assert!(split_text("   \n\n  ", &opts(100, 10), &HeuristicCounter).is_empty());
	}

	#[test]
	fn chunk_hashes_are_stable() {
		let chunks = split_text("Stable text.", &opts(100, 0), &HeuristicCounter);
		let again = split_text("Stable text.", &opts(100, 0), &HeuristicCounter);

		assert_eq!(chunks[0].content_hash, again[0].content_hash);
	}
}
