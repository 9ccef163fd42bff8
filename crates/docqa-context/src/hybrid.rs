//! Hybrid ranking: cosine similarity blended with a light keyword overlap score.
//!
//! The keyword measure here is deliberately separate from [`crate::BM25Index`]:
//! it is bounded to `[0, 1]` so it can be mixed with cosine similarity using
//! fixed weights.

use std::cmp::Ordering;
use std::sync::Arc;

use docqa_core::{Chunk, Result, SearchResult};

use crate::bm25::tokenize;
use crate::vector::VectorIndex;

/// Weight of the semantic signal in the combined score.
pub const VECTOR_WEIGHT: f32 = 0.6;
/// Weight of the keyword signal in the combined score.
pub const KEYWORD_WEIGHT: f32 = 0.4;

/// Explanation used when no other clause applies.
const FALLBACK_EXPLANATION: &str = "related content";
/// Matched terms quoted in an explanation.
const MAX_EXPLAINED_TERMS: usize = 2;

/// Keyword overlap between a query and one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMatch {
    /// Overlap score in `[0, 1]`
    pub score: f32,
    /// Distinct query terms found in the chunk, in query order
    pub matched_terms: Vec<String>,
}

/// Score how many query terms occur in `content`, and how often.
///
/// Each term found contributes `ln(1 + occurrences)`; the result averages
/// that over the query terms and mixes it evenly with the fraction of terms
/// that matched at all.
pub fn keyword_score(query_terms: &[String], content: &str) -> KeywordMatch {
    let haystack = content.to_lowercase();
    let mut accumulated = 0.0_f32;
    let mut matched = 0_usize;
    let mut matched_terms: Vec<String> = Vec::new();

    for term in query_terms.iter().filter(|term| term.chars().count() >= 3) {
        let occurrences = haystack.matches(term.as_str()).count();
        if occurrences == 0 {
            continue;
        }
        accumulated += (occurrences as f32).ln_1p();
        matched += 1;
        if !matched_terms.contains(term) {
            matched_terms.push(term.clone());
        }
    }

    let term_count = query_terms.len();
    let fraction_matched = if term_count == 0 {
        0.0
    } else {
        matched as f32 / term_count as f32
    };
    let averaged = accumulated / term_count.max(1) as f32;
    let score = averaged
        .mul_add(0.5, fraction_matched * 0.5)
        .min(1.0)
        .clamp(0.0, 1.0);

    KeywordMatch {
        score,
        matched_terms,
    }
}

/// `0.6 * vector_score + 0.4 * keyword_score`.
pub fn combined_score(vector_score: f32, keyword_score: f32) -> f32 {
    VECTOR_WEIGHT.mul_add(vector_score, KEYWORD_WEIGHT * keyword_score)
}

/// Human readable rationale for one result.
pub fn explain(vector_score: f32, keyword: &KeywordMatch) -> String {
    let mut clauses: Vec<String> = Vec::new();

    if vector_score > 0.8 {
        clauses.push("very high semantic match".to_owned());
    } else if vector_score > 0.6 {
        clauses.push("good semantic match".to_owned());
    } else if vector_score > 0.4 {
        clauses.push("moderate semantic match".to_owned());
    }

    if keyword.score > 0.5 && !keyword.matched_terms.is_empty() {
        let terms: Vec<&str> = keyword
            .matched_terms
            .iter()
            .take(MAX_EXPLAINED_TERMS)
            .map(String::as_str)
            .collect();
        clauses.push(format!("keywords: {}", terms.join(", ")));
    }

    if clauses.is_empty() {
        FALLBACK_EXPLANATION.to_owned()
    } else {
        clauses.join("; ")
    }
}

/// Score every chunk and return the best `top_k`.
///
/// This is an exact full scan: every chunk is scored, then the results are
/// sorted by combined score (ties keep corpus order) and truncated.
///
/// # Errors
/// Returns a dimension mismatch error if `query_embedding` does not match
/// the indexed embeddings
pub fn rank(
    query: &str,
    query_embedding: &[f32],
    chunks: &[Arc<Chunk>],
    vectors: &VectorIndex,
    top_k: usize,
) -> Result<Vec<SearchResult>> {
    if chunks.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    let query_terms = tokenize(query);
    let vector_scores = vectors.score_all(query_embedding)?;

    let mut results: Vec<SearchResult> = chunks
        .iter()
        .zip(vector_scores)
        .map(|(chunk, vector_score)| {
            let keyword = keyword_score(&query_terms, &chunk.content);
            SearchResult {
                chunk: Arc::clone(chunk),
                combined_score: combined_score(vector_score, keyword.score),
                vector_score,
                keyword_score: keyword.score,
                explanation: explain(vector_score, &keyword),
            }
        })
        .collect();

    results.sort_by(|first, second| {
        second
            .combined_score
            .partial_cmp(&first.combined_score)
            .unwrap_or(Ordering::Equal)
    });
    results.truncate(top_k);

    Ok(results)
}
