use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A single embedding vector
pub type Embedding = Vec<f32>;

/// Coarse classification of an ingested source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Plain UTF-8 text (`.txt`, `.log`)
    Text,
    /// Markdown prose
    Markdown,
    /// Comma separated values
    Csv,
    /// JSON document
    Json,
    /// PDF document (recognized, but extraction is handled elsewhere)
    Pdf,
    /// Anything the extractor does not recognize
    Unknown,
}

impl FileType {
    /// Stable label used in persisted snapshots and CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Pdf => "pdf",
            Self::Unknown => "unknown",
        }
    }

    /// Inverse of [`FileType::as_str`]; unrecognized labels map to `Unknown`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            "text" => Self::Text,
            "markdown" => Self::Markdown,
            "csv" => Self::Csv,
            "json" => Self::Json,
            "pdf" => Self::Pdf,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retrievable unit of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Chunk identifier (`<document id>:<chunk index>`)
    pub id: String,
    /// Owning document
    pub document_id: String,
    /// Title of the owning document, denormalized for citations
    pub document_title: String,
    /// Normalized chunk text
    pub content: String,
    /// Embedding of `content`
    pub embedding: Embedding,
    /// Position within the parent document
    pub chunk_index: usize,
}

/// An ingested document together with its chunks.
///
/// Documents are never edited in place: re-ingesting replaces the whole
/// entry, and deletion removes every chunk at once.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Unique identifier generated at ingestion
    pub id: String,
    /// Human readable title
    pub title: String,
    /// Extracted text before normalization
    pub raw_content: String,
    /// Source classification
    pub file_type: FileType,
    /// Ingestion timestamp
    pub uploaded_at: DateTime<Utc>,
    /// Chunks in document order
    pub chunks: Vec<Arc<Chunk>>,
}

impl Document {
    /// Embedding dimension of this document, if it has any chunks.
    pub fn dimension(&self) -> Option<usize> {
        self.chunks.first().map(|chunk| chunk.embedding.len())
    }
}

/// One ranked hit from a hybrid search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The matching chunk (shared with the catalog snapshot)
    pub chunk: Arc<Chunk>,
    /// `0.6 * vector_score + 0.4 * keyword_score`
    pub combined_score: f32,
    /// Cosine similarity against the query embedding
    pub vector_score: f32,
    /// Lightweight lexical overlap score in `[0, 1]`
    pub keyword_score: f32,
    /// Human readable ranking rationale
    pub explanation: String,
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Identifier of the committed document
    pub document_id: String,
    /// Number of chunks committed
    pub chunk_count: usize,
}

/// Retrieval answer for a user message.
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    /// Ranked matches, best first
    pub results: Vec<SearchResult>,
    /// Whether the catalog held any document at query time
    pub has_documents: bool,
}
