use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::{Document, Embedding, FileType, Result};

/// Ordered stream of generated text fragments.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Trait for generating embeddings from text
pub trait EmbeddingProvider: Send + Sync {
    /// Ensure the embedding model is available
    ///
    /// # Errors
    /// Returns an error if the model is not available or cannot be loaded
    fn ensure_model_available(&self) -> impl Future<Output = Result<()>> + Send;

    /// Generate embedding for text
    ///
    /// # Errors
    /// Returns an error if embedding generation fails
    fn embed(&self, text: &str) -> impl Future<Output = Result<Embedding>> + Send;

    /// Embed multiple texts, preserving input order one-to-one.
    ///
    /// Implementations split the input at their own maximum batch size. The
    /// call either returns every embedding or fails as a whole.
    ///
    /// # Errors
    /// Returns an error if any embedding generation fails
    fn embed_batch(
        &self,
        texts: Vec<String>,
    ) -> impl Future<Output = Result<Vec<Embedding>>> + Send;
}

/// Prompt handed to a text-generation provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// System instruction
    pub system: String,
    /// User message, including any retrieved context
    pub user: String,
}

/// Trait for streaming text-generation services.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the unique identifier for this provider.
    fn name(&self) -> &'static str;

    /// Starts a streaming generation.
    ///
    /// `cancel` must be honored by the underlying call itself: once it is
    /// tripped the in-flight request is dropped and the stream ends with
    /// [`Error::Cancelled`](crate::Error::Cancelled).
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be started.
    async fn generate_stream(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream>;
}

/// Turns uploaded files into plain text.
pub trait FileExtractor: Send + Sync {
    /// Extract the text content of `path`.
    ///
    /// # Errors
    /// Returns an extraction error for unreadable or unsupported files.
    fn parse(&self, path: &Path) -> Result<String>;

    /// Classify `path` without reading it.
    fn classify(&self, path: &Path) -> FileType;
}

/// Durable storage for the document catalog.
///
/// Every save is a full snapshot overwrite, never an append.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Replace the stored snapshot with `documents`.
    ///
    /// # Errors
    /// Returns a persistence error if the snapshot cannot be written.
    async fn save_all(&self, documents: &[Document]) -> Result<()>;

    /// Load every stored document. A missing snapshot yields an empty vec.
    ///
    /// # Errors
    /// Returns a persistence error if the snapshot is unreadable or its
    /// schema does not match.
    async fn load_all(&self) -> Result<Vec<Document>>;
}
