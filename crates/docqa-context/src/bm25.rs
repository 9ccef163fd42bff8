//! BM25 keyword search over catalog chunks.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// BM25 parameters
const K1: f32 = 1.5; // Term frequency saturation parameter
const B: f32 = 0.75; // Length normalization parameter

/// Characters that are neither word characters nor whitespace.
static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\w\s]").unwrap_or_else(|error| unreachable!("static regex: {error}"))
});

/// Split text into lowercase terms longer than two characters.
///
/// Punctuation is removed rather than treated as a separator, so
/// `"don't"` becomes `"dont"`.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    PUNCTUATION
        .replace_all(&lower, "")
        .split_whitespace()
        .filter(|term| term.chars().count() > 2)
        .map(str::to_owned)
        .collect()
}

/// Chunk in the BM25 index
#[derive(Debug, Clone)]
struct IndexedChunk {
    id: String,
    terms: HashMap<String, usize>, // term -> frequency
    length: usize,                 // total terms in chunk
}

/// BM25 search index.
///
/// Statistics describe one corpus snapshot; the catalog rebuilds the index
/// whenever chunk membership changes.
#[derive(Debug, Clone, Default)]
pub struct BM25Index {
    chunks: Vec<IndexedChunk>,
    avg_doc_length: f32,
    doc_freq: HashMap<String, usize>,
    idf_cache: HashMap<String, f32>, // term -> IDF score
}

impl BM25Index {
    /// Create a new empty BM25 index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a finalized index from `(chunk id, content)` pairs.
    pub fn build<'chunk, I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = (&'chunk str, &'chunk str)>,
    {
        let mut index = Self::new();
        for (id, content) in chunks {
            index.add_document(id, content);
        }
        index.finalize();
        index
    }

    /// Add a chunk to the index
    pub fn add_document(&mut self, id: &str, content: &str) {
        let terms = tokenize(content);
        let length = terms.len();

        self.chunks.push(IndexedChunk {
            id: id.to_owned(),
            terms: Self::count_terms(&terms),
            length,
        });

        // Invalidate statistics when adding chunks
        self.idf_cache.clear();
        self.doc_freq.clear();
    }

    /// Finalize the index (compute corpus statistics and IDF scores)
    pub fn finalize(&mut self) {
        self.idf_cache.clear();
        self.doc_freq.clear();
        if self.chunks.is_empty() {
            self.avg_doc_length = 0.0;
            return;
        }

        let total_length: usize = self.chunks.iter().map(|chunk| chunk.length).sum();
        self.avg_doc_length = total_length as f32 / self.chunks.len() as f32;

        for chunk in &self.chunks {
            for term in chunk.terms.keys() {
                *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }

        let num_docs = self.chunks.len() as f32;
        for (term, df) in &self.doc_freq {
            let df = *df as f32;
            let idf = ((num_docs - df + 0.5) / (df + 0.5)).ln_1p();
            self.idf_cache.insert(term.clone(), idf);
        }
    }

    /// Search for chunks matching the query.
    ///
    /// Chunks without any query term are left out entirely.
    #[must_use]
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        let query_terms = tokenize(query);
        let mut scores: Vec<(String, f32)> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let score = self.score_chunk(chunk, &query_terms);
                (score > 0.0).then(|| (chunk.id.clone(), score))
            })
            .collect();

        scores.sort_by(|first, second| second.1.partial_cmp(&first.1).unwrap_or(Ordering::Equal));
        scores.truncate(top_k);

        scores
    }

    /// Score a chunk against query terms using BM25
    fn score_chunk(&self, chunk: &IndexedChunk, query_terms: &[String]) -> f32 {
        let avg_doc_length = if self.avg_doc_length > 0.0 {
            self.avg_doc_length
        } else {
            1.0
        };
        let doc_len_norm = chunk.length as f32 / avg_doc_length;

        let mut score = 0.0;
        for term in query_terms {
            let tf = *chunk.terms.get(term).unwrap_or(&0) as f32;
            if tf == 0.0 {
                continue;
            }

            let idf = self.idf_cache.get(term).copied().unwrap_or(0.0);
            let numerator = tf * (K1 + 1.0);
            let denominator = K1.mul_add(B.mul_add(doc_len_norm, 1.0 - B), tf);

            score += idf * (numerator / denominator);
        }
        score
    }

    /// Count term frequencies
    fn count_terms(terms: &[String]) -> HashMap<String, usize> {
        let mut freq = HashMap::new();
        for term in terms {
            *freq.entry(term.clone()).or_insert(0) += 1;
        }
        freq
    }

    /// Number of chunks containing `term` at least once.
    #[must_use]
    pub fn doc_frequency(&self, term: &str) -> usize {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    /// Average token count per chunk.
    #[must_use]
    pub fn avg_doc_length(&self) -> f32 {
        self.avg_doc_length
    }

    /// Get the number of chunks in the index
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if the index is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
