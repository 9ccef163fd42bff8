//! Ingestion and retrieval on top of the catalog.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use docqa_core::{
    Chunk, ChunkingConfig, Document, EmbeddingProvider, Error, FileExtractor, FileType,
    IngestReport, QueryResponse, Result, ValidationError,
};

use crate::catalog::{Catalog, CatalogStats};
use crate::chunking::chunk_text;

/// Turns text into committed documents and answers retrieval queries.
///
/// Validation, chunking and embedding all happen before the catalog is
/// touched, so any failure leaves it exactly as it was.
pub struct RetrievalService<E> {
    catalog: Arc<Catalog>,
    embedder: Arc<E>,
    chunking: ChunkingConfig,
    top_k: usize,
}

impl<E: EmbeddingProvider> RetrievalService<E> {
    /// Create a service over an existing catalog
    pub fn new(catalog: Arc<Catalog>, embedder: Arc<E>, chunking: ChunkingConfig, top_k: usize) -> Self {
        Self {
            catalog,
            embedder,
            chunking,
            top_k,
        }
    }

    /// Shared catalog
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Embedding provider used for chunks and queries
    pub fn embedder(&self) -> &Arc<E> {
        &self.embedder
    }

    /// Chunk, embed and commit `text` as a new document.
    ///
    /// # Errors
    /// - validation error when the text is blank or produces more than
    ///   `max_chunks` chunks
    /// - embedding error when the provider fails or returns the wrong
    ///   number of vectors
    /// - dimension mismatch when the vectors do not fit the catalog
    pub async fn ingest(&self, text: &str, title: &str, file_type: FileType) -> Result<IngestReport> {
        self.catalog.initialize().await?;

        if text.trim().is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }

        let pieces = chunk_text(text, self.chunking.max_chunk_size, self.chunking.overlap_size);
        if pieces.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        if pieces.len() > self.chunking.max_chunks {
            return Err(ValidationError::TooManyChunks {
                count: pieces.len(),
                limit: self.chunking.max_chunks,
            }
            .into());
        }

        debug!("Embedding {} chunks for '{title}'", pieces.len());
        let embeddings = self.embedder.embed_batch(pieces.clone()).await?;
        if embeddings.len() != pieces.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                pieces.len(),
                embeddings.len()
            )));
        }

        let document_id = Uuid::new_v4().to_string();
        let chunks: Vec<Arc<Chunk>> = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (content, embedding))| {
                Arc::new(Chunk {
                    id: format!("{document_id}:{chunk_index}"),
                    document_id: document_id.clone(),
                    document_title: title.to_owned(),
                    content,
                    embedding,
                    chunk_index,
                })
            })
            .collect();
        let chunk_count = chunks.len();

        self.catalog
            .add(Document {
                id: document_id.clone(),
                title: title.to_owned(),
                raw_content: text.to_owned(),
                file_type,
                uploaded_at: Utc::now(),
                chunks,
            })
            .await?;

        info!("Ingested '{title}' as {document_id} ({chunk_count} chunks, {file_type})");
        Ok(IngestReport {
            document_id,
            chunk_count,
        })
    }

    /// Extract `path` with `extractor` and ingest the result.
    ///
    /// The title defaults to the file name.
    ///
    /// # Errors
    /// Returns extraction errors before any embedding call, then anything
    /// [`RetrievalService::ingest`] can return
    pub async fn ingest_file(
        &self,
        extractor: &dyn FileExtractor,
        path: &Path,
        title: Option<&str>,
    ) -> Result<IngestReport> {
        let file_type = extractor.classify(path);
        let text = extractor.parse(path)?;
        let title = title.map_or_else(
            || {
                path.file_name()
                    .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
            },
            str::to_owned,
        );
        self.ingest(&text, &title, file_type).await
    }

    /// Embed `message` and run a hybrid search with the configured `top_k`.
    ///
    /// An empty catalog answers immediately without calling the embedder.
    ///
    /// # Errors
    /// Returns embedding errors, or a dimension mismatch if the query vector
    /// does not fit the catalog
    pub async fn search(&self, message: &str) -> Result<QueryResponse> {
        self.search_top_k(message, self.top_k).await
    }

    /// Like [`RetrievalService::search`] with an explicit result count.
    ///
    /// # Errors
    /// See [`RetrievalService::search`]
    pub async fn search_top_k(&self, message: &str, top_k: usize) -> Result<QueryResponse> {
        self.catalog.initialize().await?;
        if !self.catalog.has_documents() {
            return Ok(QueryResponse::default());
        }

        let query_embedding = self.embedder.embed(message).await?;
        let response = self.catalog.query(message, &query_embedding, top_k)?;
        debug!(
            "Query matched {} chunks (top_k {top_k})",
            response.results.len()
        );
        Ok(response)
    }

    /// BM25 keyword search that needs no embedding call.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be initialized
    pub async fn keyword_search(&self, query: &str, top_k: usize) -> Result<Vec<(Arc<Chunk>, f32)>> {
        self.catalog.initialize().await?;
        Ok(self.catalog.keyword_search(query, top_k))
    }

    /// Delete a document by id.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be initialized
    pub async fn delete(&self, document_id: &str) -> Result<bool> {
        self.catalog.delete(document_id).await
    }

    /// All documents in insertion order.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be initialized
    pub async fn list(&self) -> Result<Vec<Arc<Document>>> {
        self.catalog.initialize().await?;
        Ok(self.catalog.all_documents())
    }

    /// Catalog counts.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be initialized
    pub async fn stats(&self) -> Result<CatalogStats> {
        self.catalog.initialize().await?;
        Ok(self.catalog.stats())
    }
}
