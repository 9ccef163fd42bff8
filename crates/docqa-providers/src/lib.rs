//! Provider adapters for the embedding and generation services, plus file
//! extraction and test mocks.
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

/// Plain-text file extraction.
pub mod extract;
/// Streaming Ollama generation.
pub mod generation;
/// Mock embedding and generation providers.
pub mod mock;
/// Ollama embedding client.
pub mod ollama;

pub use extract::TextFileExtractor;
pub use generation::OllamaGenerator;
pub use mock::{MockEmbedder, MockGenerator};
pub use ollama::OllamaEmbeddingClient;
