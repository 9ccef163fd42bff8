//! Retrieval, preamble and cancellation through `AnswerService`.

#![cfg(test)]
#![allow(clippy::unwrap_used, clippy::missing_panics_doc, reason = "Test allows")]

use std::sync::Arc;

use docqa_context::{Catalog, MemoryStore, RetrievalService};
use docqa_core::{ChunkingConfig, DocumentStore, Error, FileType, GenerationProvider};
use docqa_providers::{MockEmbedder, MockGenerator};
use docqa_session::{AnswerService, SessionManager, SessionState, split_meta_prefix};
use futures::StreamExt as _;

fn retrieval() -> Arc<RetrievalService<MockEmbedder>> {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    Arc::new(RetrievalService::new(
        Arc::new(Catalog::new(store, None)),
        Arc::new(MockEmbedder::new(8)),
        ChunkingConfig::default(),
        5,
    ))
}

fn answers(
    retrieval: Arc<RetrievalService<MockEmbedder>>,
    generator: &Arc<MockGenerator>,
) -> AnswerService<MockEmbedder> {
    AnswerService::new(
        retrieval,
        Arc::clone(generator) as Arc<dyn GenerationProvider>,
        Arc::new(SessionManager::new()),
    )
}

/// Without documents the stream carries only raw tokens.
#[tokio::test]
async fn empty_catalog_streams_without_preamble() {
    let generator = Arc::new(MockGenerator::new(["No ", "documents."]));
    let service = answers(retrieval(), &generator);

    let text = service
        .ask("req-1", "What is in my files?")
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();

    assert_eq!(text, "No documents.");
    assert!(!text.starts_with("__META__"));
    assert!(generator.requests()[0].user.starts_with("No documents have been uploaded"));
}

/// Retrieved excerpts produce one preamble ahead of the answer.
#[tokio::test]
async fn answer_starts_with_citation_preamble() {
    let retrieval = retrieval();
    let report = retrieval
        .ingest(
            "Ownership moves values between bindings. Borrowing lends them temporarily.",
            "Rust Book",
            FileType::Markdown,
        )
        .await
        .unwrap();
    let generator = Arc::new(MockGenerator::new(["Values ", "move."]));
    let service = answers(retrieval, &generator);

    let text = service
        .ask("req-1", "ownership borrowing")
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();

    let (meta, rest) = split_meta_prefix(&text).unwrap();
    let meta = meta.unwrap();
    assert_eq!(rest, "Values move.");
    assert_eq!(meta.citations.len(), 1);
    assert_eq!(meta.citations[0].document_id, report.document_id);
    assert_eq!(meta.citations[0].document_title, "Rust Book");
    assert!(meta.citations[0].explanation.contains("keywords: ownership, borrowing"));
    assert_eq!(rest.matches("__META__").count(), 0);
    assert!(generator.requests()[0].user.contains("[1] Rust Book"));
}

/// Cancelling by request id ends the stream quietly and frees the id.
#[tokio::test]
async fn cancel_by_request_id() {
    let generator = Arc::new(MockGenerator::new(["thinking"]).hanging());
    let service = answers(retrieval(), &generator);

    let mut stream = service.ask("req-7", "anything").await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "thinking");
    assert_eq!(service.sessions().state("req-7"), Some(SessionState::Streaming));

    assert!(service.cancel("req-7"));
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), SessionState::Cancelled);
    assert!(!service.cancel("req-7"));
}

/// A retrieval failure is reported before any session exists.
#[tokio::test]
async fn embedding_failure_registers_no_session() {
    let retrieval = retrieval();
    retrieval
        .ingest("Some indexed text for the catalog.", "Doc", FileType::Text)
        .await
        .unwrap();
    retrieval.embedder().fail_next("embedding service down");
    let generator = Arc::new(MockGenerator::new(["unused"]));
    let service = answers(retrieval, &generator);

    let error = service.ask("req-1", "question").await.unwrap_err();
    assert!(matches!(error, Error::Embedding(_)));
    assert_eq!(service.sessions().active_count(), 0);
    assert_eq!(generator.call_count(), 0);
}
