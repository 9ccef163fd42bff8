//! Mock providers for testing ingestion and answer flows.
//!
//! Both mocks record their calls so tests can assert on how often the
//! remote services would have been hit.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash as _, Hasher as _};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::vec::IntoIter;

use async_trait::async_trait;
use futures::stream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use docqa_core::{
    Embedding, EmbeddingProvider, Error, GenerationProvider, GenerationRequest, IgnoreLock as _,
    Result, TokenStream,
};

/// Deterministic hash-based embedder.
#[derive(Clone)]
pub struct MockEmbedder {
    /// Dimension of generated vectors
    dimension: usize,
    /// Fixed vectors for specific texts
    overrides: Arc<Mutex<HashMap<String, Embedding>>>,
    /// Texts passed to `embed_batch`, in call order
    batch_history: Arc<Mutex<Vec<String>>>,
    /// Number of `embed_batch` calls
    batch_calls: Arc<AtomicUsize>,
    /// Texts passed to `embed`, in call order
    single_history: Arc<Mutex<Vec<String>>>,
    /// Error returned by the next call
    next_failure: Arc<Mutex<Option<String>>>,
}

impl MockEmbedder {
    /// Create an embedder producing `dimension`-sized vectors.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            overrides: Arc::default(),
            batch_history: Arc::default(),
            batch_calls: Arc::default(),
            single_history: Arc::default(),
            next_failure: Arc::default(),
        }
    }

    /// Return `embedding` whenever `text` is embedded.
    #[must_use]
    pub fn with_embedding(self, text: impl Into<String>, embedding: Embedding) -> Self {
        self.overrides
            .lock_ignore_poison()
            .insert(text.into(), embedding);
        self
    }

    /// Make the next call fail with an embedding error.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.next_failure.lock_ignore_poison() = Some(message.into());
    }

    /// Number of `embed_batch` calls so far.
    #[must_use]
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Number of `embed` calls so far.
    #[must_use]
    pub fn single_calls(&self) -> usize {
        self.single_history.lock_ignore_poison().len()
    }

    /// Every text passed to `embed_batch`.
    #[must_use]
    pub fn embedded_texts(&self) -> Vec<String> {
        self.batch_history.lock_ignore_poison().clone()
    }

    /// Every text passed to `embed`.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.single_history.lock_ignore_poison().clone()
    }

    fn take_failure(&self) -> Result<()> {
        match self.next_failure.lock_ignore_poison().take() {
            Some(message) => Err(Error::Embedding(message)),
            None => Ok(()),
        }
    }

    fn vector_for(&self, text: &str) -> Embedding {
        if let Some(embedding) = self.overrides.lock_ignore_poison().get(text) {
            return embedding.clone();
        }

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let hash = hasher.finish();

        (0..self.dimension)
            .map(|idx| (hash.wrapping_add(idx as u64) % 1000) as f32 / 1000.0)
            .collect()
    }
}

impl EmbeddingProvider for MockEmbedder {
    async fn ensure_model_available(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.single_history.lock_ignore_poison().push(text.to_owned());
        self.take_failure()?;
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.batch_history
            .lock_ignore_poison()
            .extend(texts.iter().cloned());
        self.take_failure()?;
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}

/// How a scripted generation ends after its tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Ending {
    Complete,
    Fail(String),
    /// Stay open until cancelled
    Hang,
}

/// Generator streaming a fixed list of tokens.
#[derive(Clone)]
pub struct MockGenerator {
    tokens: Vec<String>,
    delay: Duration,
    ending: Ending,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl MockGenerator {
    /// Stream `tokens` and then complete.
    #[must_use]
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
            ending: Ending::Complete,
            requests: Arc::default(),
        }
    }

    /// Wait `delay` before each token.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail with a generation error after the tokens.
    #[must_use]
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.ending = Ending::Fail(message.into());
        self
    }

    /// Keep the stream open after the tokens until it is cancelled.
    #[must_use]
    pub fn hanging(mut self) -> Self {
        self.ending = Ending::Hang;
        self
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock_ignore_poison().clone()
    }

    /// Number of generations started.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock_ignore_poison().len()
    }
}

/// Position within a scripted stream.
struct Script {
    tokens: IntoIter<String>,
    delay: Duration,
    ending: Option<Ending>,
    cancel: CancellationToken,
}

impl Script {
    async fn next_item(mut self) -> Option<(Result<String>, Self)> {
        let ending = self.ending.clone()?;
        let next = self.tokens.next();
        let wait = match (&next, &ending) {
            (None, Ending::Hang) => None,
            _ => Some(self.delay),
        };

        let cancelled = match wait {
            Some(delay) if delay.is_zero() => self.cancel.is_cancelled(),
            Some(delay) => tokio::select! {
                biased;
                () = self.cancel.cancelled() => true,
                () = sleep(delay) => false,
            },
            None => {
                self.cancel.cancelled().await;
                true
            }
        };
        if cancelled {
            self.ending = None;
            return Some((Err(Error::Cancelled), self));
        }

        match next {
            Some(token) => Some((Ok(token), self)),
            None => {
                self.ending = None;
                match ending {
                    Ending::Fail(message) => Some((Err(Error::Generation(message)), self)),
                    Ending::Complete | Ending::Hang => None,
                }
            }
        }
    }
}

#[async_trait]
impl GenerationProvider for MockGenerator {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream> {
        self.requests.lock_ignore_poison().push(request);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let script = Script {
            tokens: self.tokens.clone().into_iter(),
            delay: self.delay,
            ending: Some(self.ending.clone()),
            cancel,
        };
        Ok(Box::pin(stream::unfold(script, Script::next_item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "system".to_owned(),
            user: "question".to_owned(),
        }
    }

    #[tokio::test]
    async fn embedder_is_deterministic_and_counts_calls() {
        let embedder = MockEmbedder::new(4);
        let first = embedder.embed("hello").await.unwrap();
        let batch = embedder
            .embed_batch(vec!["hello".to_owned(), "world".to_owned()])
            .await
            .unwrap();

        assert_eq!(first.len(), 4);
        assert_eq!(batch[0], first);
        assert_ne!(batch[1], first);
        assert_eq!(embedder.single_calls(), 1);
        assert_eq!(embedder.batch_calls(), 1);
        assert_eq!(embedder.embedded_texts(), vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn embedder_overrides_and_failures() {
        let embedder = MockEmbedder::new(3).with_embedding("fixed", vec![1.0, 0.0, 0.0]);
        assert_eq!(embedder.embed("fixed").await.unwrap(), vec![1.0, 0.0, 0.0]);

        embedder.fail_next("boom");
        assert!(matches!(embedder.embed("x").await, Err(Error::Embedding(_))));
        assert!(embedder.embed("x").await.is_ok());
    }

    #[tokio::test]
    async fn generator_streams_tokens_in_order() {
        let generator = MockGenerator::new(["a", "b", "c"]);
        let stream = generator
            .generate_stream(request(), CancellationToken::new())
            .await
            .unwrap();
        let tokens: Vec<String> = stream.map(|item| item.unwrap()).collect().await;

        assert_eq!(tokens, vec!["a", "b", "c"]);
        assert_eq!(generator.requests()[0].user, "question");
    }

    #[tokio::test]
    async fn generator_failure_follows_tokens() {
        let generator = MockGenerator::new(["partial"]).failing_with("overloaded");
        let items: Vec<Result<String>> = generator
            .generate_stream(request(), CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Err(Error::Generation(message)) if message == "overloaded"));
    }

    #[tokio::test]
    async fn hanging_generator_ends_on_cancel() {
        let cancel = CancellationToken::new();
        let mut stream = MockGenerator::new(["first"])
            .hanging()
            .generate_stream(request(), cancel.clone())
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "first");
        cancel.cancel();
        assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
        assert!(stream.next().await.is_none());
    }
}
