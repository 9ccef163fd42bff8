//! Retrieval core: chunking, BM25 and vector scoring, hybrid ranking and the
//! document catalog.
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::float_cmp,
        reason = "Test allows"
    )
)]

/// BM25 keyword index and tokenizer
pub mod bm25;
pub mod catalog;
pub mod chunking;
pub mod hybrid;
pub mod persistence;
pub mod pipeline;
/// Cosine similarity and the per-snapshot norm cache
pub mod vector;

pub use bm25::{BM25Index, tokenize};
pub use catalog::{Catalog, CatalogStats};
pub use chunking::{DEFAULT_MAX_CHUNK_SIZE, DEFAULT_OVERLAP_SIZE, chunk_text};
pub use hybrid::{KEYWORD_WEIGHT, KeywordMatch, VECTOR_WEIGHT, explain, keyword_score};
pub use persistence::{MemoryStore, SnapshotStore};
pub use pipeline::RetrievalService;
pub use vector::{VectorIndex, cosine_similarity};
