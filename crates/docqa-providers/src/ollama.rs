//! Embedding client backed by a local Ollama service.

use std::fmt::Display;

use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::GenerateEmbeddingsRequest;
use tracing::{debug, info};

use docqa_core::{Embedding, EmbeddingProvider, Error, ModelsConfig, Result};

/// Ollama embedding client
pub struct OllamaEmbeddingClient {
    ollama: Ollama,
    model: String,
    batch_size: usize,
}

impl OllamaEmbeddingClient {
    /// Create a client from the model configuration.
    pub fn new(config: &ModelsConfig) -> Self {
        let (host, port) = config.host_and_port();
        Self {
            ollama: Ollama::new(host, port),
            model: config.embedding_model.clone(),
            batch_size: config.embedding_batch_size.max(1),
        }
    }

    /// Name of the embedding model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Maximum texts sent per request.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn map_error(&self, error: &impl Display) -> Error {
        let message = error.to_string();
        if message.contains("model") && message.contains("not found") {
            Error::Embedding(format!(
                "Embedding model '{}' not found. Run: ollama pull {}",
                self.model, self.model
            ))
        } else {
            Error::Embedding(format!("Embedding generation failed: {message}"))
        }
    }

    async fn embed_request(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        let expected = texts.len();
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), texts.into());
        let response = self
            .ollama
            .generate_embeddings(request)
            .await
            .map_err(|error| self.map_error(&error))?;

        if response.embeddings.len() != expected {
            return Err(Error::Embedding(format!(
                "Ollama returned {} embeddings for {expected} inputs",
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings)
    }
}

impl EmbeddingProvider for OllamaEmbeddingClient {
    async fn ensure_model_available(&self) -> Result<()> {
        let models = self.ollama.list_local_models().await.map_err(|error| {
            Error::Embedding(format!(
                "Failed to connect to Ollama: {error}.\n\nPlease ensure Ollama is installed and running:\n  - Install from: https://ollama.ai\n  - Start with: ollama serve"
            ))
        })?;

        if models.iter().any(|model| model.name.contains(&self.model)) {
            debug!("Embedding model '{}' is available", self.model);
            Ok(())
        } else {
            info!("Embedding model '{}' not found", self.model);
            Err(Error::Embedding(format!(
                "Embedding model '{}' is not installed. Run: ollama pull {}",
                self.model, self.model
            )))
        }
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_request(vec![text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("No embeddings returned".to_owned()))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let total = texts.len();
        let mut embeddings = Vec::with_capacity(total);
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.embed_request(batch.to_vec()).await?);
        }
        debug!(
            "Embedded {total} texts in {} requests",
            total.div_ceil(self.batch_size)
        );
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_uses_configured_model_and_batch_size() {
        let config = ModelsConfig {
            embedding_model: "all-minilm".to_owned(),
            embedding_batch_size: 0,
            ..ModelsConfig::default()
        };
        let client = OllamaEmbeddingClient::new(&config);
        assert_eq!(client.model(), "all-minilm");
        assert_eq!(client.batch_size(), 1);
    }

    #[test]
    fn missing_model_errors_are_rewritten() {
        let client = OllamaEmbeddingClient::new(&ModelsConfig::default());
        let error = client.map_error(&"model \"nomic-embed-text\" not found");
        assert!(error.to_string().contains("ollama pull nomic-embed-text"));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let client = OllamaEmbeddingClient::new(&ModelsConfig::default());
        assert!(client.embed_batch(Vec::new()).await.unwrap().is_empty());
    }
}
