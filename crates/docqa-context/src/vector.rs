//! Cosine similarity scoring against chunk embeddings.

use std::sync::Arc;

use docqa_core::{Chunk, Error, Result};

/// Euclidean norm of a vector.
pub fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

/// Calculate cosine similarity between two vectors.
///
/// Returns a value in `[-1, 1]`; a zero vector on either side scores `0.0`.
///
/// # Errors
/// Returns a dimension mismatch error if the vectors differ in length
pub fn cosine_similarity(vector_a: &[f32], vector_b: &[f32]) -> Result<f32> {
    cosine_with_norms(vector_a, norm(vector_a), vector_b, norm(vector_b))
}

/// Cosine similarity with both norms already known.
fn cosine_with_norms(vector_a: &[f32], norm_a: f32, vector_b: &[f32], norm_b: f32) -> Result<f32> {
    if vector_a.len() != vector_b.len() {
        return Err(Error::dimension_mismatch(vector_a.len(), vector_b.len()));
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let dot_product: f32 = vector_a
        .iter()
        .zip(vector_b.iter())
        .map(|(x, y)| x * y)
        .sum();

    Ok((dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Chunk embeddings with their norms precomputed.
///
/// Embeddings never change after ingestion, so each norm is computed once
/// per catalog snapshot instead of once per query.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    chunks: Vec<Arc<Chunk>>,
    norms: Vec<f32>,
}

impl VectorIndex {
    /// Build an index over `chunks`, keeping their order.
    pub fn build(chunks: &[Arc<Chunk>]) -> Self {
        let norms = chunks.iter().map(|chunk| norm(&chunk.embedding)).collect();
        Self {
            chunks: chunks.to_vec(),
            norms,
        }
    }

    /// Cosine similarity of `query` against every embedding, in index order.
    ///
    /// # Errors
    /// Returns a dimension mismatch error if `query` has a different length
    /// than the indexed embeddings
    pub fn score_all(&self, query: &[f32]) -> Result<Vec<f32>> {
        let query_norm = norm(query);
        self.chunks
            .iter()
            .zip(&self.norms)
            .map(|(chunk, chunk_norm)| {
                cosine_with_norms(&chunk.embedding, *chunk_norm, query, query_norm)
            })
            .collect()
    }

    /// Get number of stored embeddings
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::ValidationError;

    #[test]
    fn identical_vectors_score_one() {
        let vector = [0.3, -1.2, 4.5, 0.01];
        let score = cosine_similarity(&vector, &vector).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_is_symmetric() {
        let first = [1.0, 2.0, 3.0];
        let second = [-0.5, 4.0, 0.25];
        assert_eq!(
            cosine_similarity(&first, &second).unwrap(),
            cosine_similarity(&second, &first).unwrap()
        );
    }

    #[test]
    fn orthogonal_and_opposite_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap().abs() < f32::EPSILON);
    }

    #[test]
    fn dimension_mismatch_fails_fast() {
        let error = cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            error,
            Error::Validation(ValidationError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn index_scores_match_direct_computation() {
        let stored = [vec![1.0, 0.0, 0.0], vec![0.5, 0.5, 0.0], vec![0.0, 0.0, 2.0]];
        let chunks: Vec<Arc<Chunk>> = stored
            .iter()
            .enumerate()
            .map(|(chunk_index, embedding)| {
                Arc::new(Chunk {
                    id: format!("doc:{chunk_index}"),
                    document_id: "doc".to_owned(),
                    document_title: "Doc".to_owned(),
                    content: String::new(),
                    embedding: embedding.clone(),
                    chunk_index,
                })
            })
            .collect();
        let index = VectorIndex::build(&chunks);
        let query = [1.0, 0.2, 0.0];

        let scores = index.score_all(&query).unwrap();
        assert_eq!(scores.len(), 3);
        for (score, embedding) in scores.iter().zip(&stored) {
            let direct = cosine_similarity(&query, embedding).unwrap();
            assert!((score - direct).abs() < 1e-6);
        }
        assert!(index.score_all(&[1.0]).is_err());
    }
}
