//! Retrieval-augmented answers streamed through a session.

use std::sync::Arc;

use tracing::info;

use docqa_context::RetrievalService;
use docqa_core::{EmbeddingProvider, GenerationProvider, Result};

use crate::manager::{ResponseStream, SessionManager};
use crate::meta::{MetaBlock, encode_meta_prefix};
use crate::prompt::build_request;

/// Runs retrieval, builds the prompt and starts the generation session.
pub struct AnswerService<E> {
    retrieval: Arc<RetrievalService<E>>,
    generator: Arc<dyn GenerationProvider>,
    sessions: Arc<SessionManager>,
}

impl<E: EmbeddingProvider> AnswerService<E> {
    /// Create an answer service
    pub fn new(
        retrieval: Arc<RetrievalService<E>>,
        generator: Arc<dyn GenerationProvider>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            retrieval,
            generator,
            sessions,
        }
    }

    /// Session registry used for cancellation.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Answer `question` under `request_id`.
    ///
    /// The returned stream starts with the metadata preamble when retrieval
    /// found anything, followed by the generated tokens.
    ///
    /// # Errors
    /// Returns retrieval errors (embedding failure, dimension mismatch)
    /// before any session is registered
    pub async fn ask(&self, request_id: &str, question: &str) -> Result<ResponseStream> {
        let retrieval = self.retrieval.search(question).await?;
        let preamble = MetaBlock::from_results(&retrieval.results)
            .map(|meta| encode_meta_prefix(&meta))
            .transpose()?;
        info!(
            "Answering request {request_id} with {} excerpts",
            retrieval.results.len()
        );

        let request = build_request(question, &retrieval);
        Ok(self
            .sessions
            .stream(request_id, Arc::clone(&self.generator), request, preamble))
    }

    /// Cancel the session for `request_id`; `false` if it is not active.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.sessions.cancel(request_id)
    }
}
