//! In-memory document catalog with snapshot reads and a single writer.

use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{debug, info, warn};

use docqa_core::{
    Chunk, Document, DocumentStore, Error, IgnoreRwLock as _, QueryResponse, Result,
    SearchResult,
};

use crate::bm25::BM25Index;
use crate::hybrid;
use crate::vector::VectorIndex;

/// Immutable view of the catalog at one point in time.
///
/// Every mutation builds a new state and swaps it in whole, so the document
/// list and both indexes always describe the same chunk set.
#[derive(Debug, Default)]
struct CatalogState {
    documents: Vec<Arc<Document>>,
    chunks: Vec<Arc<Chunk>>,
    bm25: BM25Index,
    vectors: VectorIndex,
    dimension: Option<usize>,
}

impl CatalogState {
    /// `dimension` pins the embedding size; otherwise the first chunk decides.
    fn build(documents: Vec<Arc<Document>>, dimension: Option<usize>) -> Self {
        let chunks: Vec<Arc<Chunk>> = documents
            .iter()
            .flat_map(|document| document.chunks.iter().cloned())
            .collect();
        let bm25 = BM25Index::build(
            chunks
                .iter()
                .map(|chunk| (chunk.id.as_str(), chunk.content.as_str())),
        );
        let vectors = VectorIndex::build(&chunks);
        let dimension =
            dimension.or_else(|| documents.iter().find_map(|document| document.dimension()));

        Self {
            documents,
            chunks,
            bm25,
            vectors,
            dimension,
        }
    }

    fn search(&self, query: &str, query_embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(dimension) = self.dimension
            && dimension != query_embedding.len()
        {
            return Err(Error::dimension_mismatch(dimension, query_embedding.len()));
        }
        hybrid::rank(query, query_embedding, &self.chunks, &self.vectors, top_k)
    }

    /// Both fields of the answer come from this one state.
    fn query(&self, message: &str, query_embedding: &[f32], top_k: usize) -> Result<QueryResponse> {
        if self.documents.is_empty() {
            return Ok(QueryResponse::default());
        }
        Ok(QueryResponse {
            results: self.search(message, query_embedding, top_k)?,
            has_documents: true,
        })
    }
}

/// Counts describing the current catalog contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogStats {
    /// Number of documents
    pub documents: usize,
    /// Number of chunks across all documents
    pub chunks: usize,
    /// Embedding dimension in use, once known
    pub dimension: Option<usize>,
}

/// Document catalog shared by ingestion and query paths.
///
/// Reads clone the current snapshot `Arc` and never block on writers.
/// `add` and `delete` are serialized by an async writer lock that is held
/// across the persistence call.
pub struct Catalog {
    state: RwLock<Arc<CatalogState>>,
    writer: AsyncMutex<()>,
    store: Arc<dyn DocumentStore>,
    fixed_dimension: Option<usize>,
    initialized: OnceCell<()>,
}

impl Catalog {
    /// Create an empty, uninitialized catalog.
    ///
    /// `fixed_dimension` pins the embedding dimension; when `None` the first
    /// committed document decides it.
    pub fn new(store: Arc<dyn DocumentStore>, fixed_dimension: Option<usize>) -> Self {
        Self {
            state: RwLock::new(Arc::new(CatalogState {
                dimension: fixed_dimension,
                ..CatalogState::default()
            })),
            writer: AsyncMutex::new(()),
            store,
            fixed_dimension,
            initialized: OnceCell::new(),
        }
    }

    /// Load persisted documents exactly once.
    ///
    /// Later calls return immediately. If loading fails the catalog stays
    /// uninitialized and the next call tries again.
    ///
    /// # Errors
    /// Returns a persistence error if the stored snapshot is unreadable, or a
    /// validation error if its dimension conflicts with the configured one
    pub async fn initialize(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                let _guard = self.writer.lock().await;
                let documents = self.store.load_all().await?;
                self.validate_loaded(&documents)?;

                let document_count = documents.len();
                let state = CatalogState::build(
                    documents.into_iter().map(Arc::new).collect(),
                    self.fixed_dimension,
                );
                info!(
                    "Catalog initialized with {document_count} documents and {} chunks",
                    state.chunks.len()
                );
                self.swap(state);
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    /// Whether [`Catalog::initialize`] has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    fn validate_loaded(&self, documents: &[Document]) -> Result<()> {
        let mut expected = self.fixed_dimension;
        for document in documents {
            for chunk in &document.chunks {
                let actual = chunk.embedding.len();
                match expected {
                    Some(dimension) if dimension != actual => {
                        return Err(Error::dimension_mismatch(dimension, actual));
                    }
                    Some(_) => {}
                    None => expected = Some(actual),
                }
            }
        }
        Ok(())
    }

    /// Insert `document`, replacing any document with the same id.
    ///
    /// The new snapshot is visible to readers before persistence runs. A
    /// failed save is logged and does not undo the insert.
    ///
    /// # Errors
    /// Returns a dimension mismatch error if any chunk embedding differs from
    /// the catalog dimension (or from the rest of the document)
    pub async fn add(&self, document: Document) -> Result<()> {
        self.initialize().await?;
        let _guard = self.writer.lock().await;
        let current = self.snapshot();

        let expected = current.dimension.or_else(|| document.dimension());
        if let Some(expected) = expected
            && let Some(chunk) = document
                .chunks
                .iter()
                .find(|chunk| chunk.embedding.len() != expected)
        {
            return Err(Error::dimension_mismatch(expected, chunk.embedding.len()));
        }

        let document_id = document.id.clone();
        let chunk_count = document.chunks.len();
        let mut documents: Vec<Arc<Document>> = current
            .documents
            .iter()
            .filter(|existing| existing.id != document_id)
            .cloned()
            .collect();
        let replaced = documents.len() != current.documents.len();
        documents.push(Arc::new(document));

        self.swap(CatalogState::build(documents, expected));
        debug!(
            "Committed document {document_id} ({chunk_count} chunks, replaced: {replaced})"
        );

        self.persist().await;
        Ok(())
    }

    /// Remove a document and all its chunks. Returns `false` if the id is unknown.
    ///
    /// # Errors
    /// Returns an error only if lazy initialization fails
    pub async fn delete(&self, document_id: &str) -> Result<bool> {
        self.initialize().await?;
        let _guard = self.writer.lock().await;
        let current = self.snapshot();

        let documents: Vec<Arc<Document>> = current
            .documents
            .iter()
            .filter(|document| document.id != document_id)
            .cloned()
            .collect();
        if documents.len() == current.documents.len() {
            return Ok(false);
        }

        self.swap(CatalogState::build(documents, current.dimension));
        info!("Deleted document {document_id}");

        self.persist().await;
        Ok(true)
    }

    /// Documents in insertion order.
    pub fn all_documents(&self) -> Vec<Arc<Document>> {
        self.snapshot().documents.clone()
    }

    /// Every chunk, grouped by document in insertion order.
    pub fn all_chunks(&self) -> Vec<Arc<Chunk>> {
        self.snapshot().chunks.clone()
    }

    /// Look up one document.
    pub fn document(&self, document_id: &str) -> Option<Arc<Document>> {
        self.snapshot()
            .documents
            .iter()
            .find(|document| document.id == document_id)
            .cloned()
    }

    /// Whether the catalog holds at least one document.
    pub fn has_documents(&self) -> bool {
        !self.snapshot().documents.is_empty()
    }

    /// Embedding dimension in use, once known.
    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().dimension
    }

    /// Current document, chunk and dimension counts.
    pub fn stats(&self) -> CatalogStats {
        let state = self.snapshot();
        CatalogStats {
            documents: state.documents.len(),
            chunks: state.chunks.len(),
            dimension: state.dimension,
        }
    }

    /// Rank every chunk against `query` and `query_embedding`.
    ///
    /// An empty catalog yields no results regardless of the embedding.
    ///
    /// # Errors
    /// Returns a dimension mismatch error if the query embedding does not
    /// match the stored embeddings
    pub fn hybrid_search(
        &self,
        query: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.snapshot().search(query, query_embedding, top_k)
    }

    /// BM25 keyword search returning chunks with their scores.
    pub fn keyword_search(&self, query: &str, top_k: usize) -> Vec<(Arc<Chunk>, f32)> {
        let state = self.snapshot();
        state
            .bm25
            .search(query, top_k)
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                state
                    .chunks
                    .iter()
                    .find(|chunk| chunk.id == chunk_id)
                    .map(|chunk| (Arc::clone(chunk), score))
            })
            .collect()
    }

    /// Hybrid search plus whether any document existed at query time.
    ///
    /// # Errors
    /// Returns a dimension mismatch error if the query embedding does not
    /// match the stored embeddings
    pub fn query(&self, message: &str, query_embedding: &[f32], top_k: usize) -> Result<QueryResponse> {
        self.snapshot().query(message, query_embedding, top_k)
    }

    fn snapshot(&self) -> Arc<CatalogState> {
        Arc::clone(&self.state.read_ignore_poison())
    }

    fn swap(&self, state: CatalogState) {
        *self.state.write_ignore_poison() = Arc::new(state);
    }

    /// Save the current snapshot. Must be called with the writer lock held.
    async fn persist(&self) {
        let documents: Vec<Document> = self
            .snapshot()
            .documents
            .iter()
            .map(|document| Document::clone(document))
            .collect();
        if let Err(error) = self.store.save_all(&documents).await {
            warn!("Failed to persist catalog snapshot: {error}");
        }
    }
}
