//! Core types and traits for the docqa retrieval engine.
//!
//! This crate provides the document model, error handling, configuration and
//! the collaborator traits (embedding, generation, extraction, persistence)
//! shared by every other docqa crate.
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        reason = "Test allows"
    )
)]

/// Configuration loading and defaults.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Synchronization helpers for poisoned locks.
pub mod sync;
/// Collaborator trait definitions.
pub mod traits;
/// Core data types for documents, chunks and search results.
pub mod types;

pub use config::{ChunkingConfig, DocqaConfig, ModelsConfig, RetrievalConfig, StorageConfig};
pub use error::{Error, Result, ValidationError};
pub use sync::{IgnoreLock, IgnoreRwLock};
pub use traits::{
    DocumentStore, EmbeddingProvider, FileExtractor, GenerationProvider, GenerationRequest,
    TokenStream,
};
pub use types::{
    Chunk, Document, Embedding, FileType, IngestReport, QueryResponse, SearchResult,
};
