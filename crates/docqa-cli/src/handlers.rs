//! Command handlers and application wiring.

use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use futures::StreamExt as _;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};
use uuid::Uuid;

use docqa_context::{Catalog, RetrievalService, SnapshotStore};
use docqa_core::{DocqaConfig, DocumentStore, EmbeddingProvider as _, GenerationProvider};
use docqa_providers::{OllamaEmbeddingClient, OllamaGenerator, TextFileExtractor};
use docqa_session::{AnswerService, MetaBlock, SessionManager, split_meta_prefix};

/// Log file name inside the data directory.
const LOG_FILE: &str = "docqa.log";
/// Characters of each excerpt shown by `search`.
const SNIPPET_CHARS: usize = 160;

/// Everything a command needs, built once from the configuration.
pub struct App {
    retrieval: Arc<RetrievalService<OllamaEmbeddingClient>>,
    answers: AnswerService<OllamaEmbeddingClient>,
    extractor: TextFileExtractor,
    snapshot_path: PathBuf,
}

impl App {
    /// Wire the catalog, providers and session manager from `config`.
    ///
    /// # Errors
    /// Returns an error if the snapshot location cannot be resolved
    pub fn build(config: &DocqaConfig) -> Result<Self> {
        let snapshot_path = config.storage.snapshot_path()?;
        let store: Arc<dyn DocumentStore> = Arc::new(SnapshotStore::new(snapshot_path.clone()));
        let catalog = Arc::new(Catalog::new(store, config.retrieval.embedding_dimension));

        let retrieval = Arc::new(RetrievalService::new(
            catalog,
            Arc::new(OllamaEmbeddingClient::new(&config.models)),
            config.chunking.clone(),
            config.retrieval.top_k,
        ));
        let generator: Arc<dyn GenerationProvider> = Arc::new(OllamaGenerator::new(&config.models));
        let answers = AnswerService::new(
            Arc::clone(&retrieval),
            generator,
            Arc::new(SessionManager::new()),
        );

        Ok(Self {
            retrieval,
            answers,
            extractor: TextFileExtractor::new(config.chunking.max_file_bytes),
            snapshot_path,
        })
    }

    /// Load the catalog and, when it has documents, make sure the
    /// embedding model can answer queries.
    async fn ready_for_queries(&self) -> Result<bool> {
        let catalog = self.retrieval.catalog();
        catalog.initialize().await?;
        if !catalog.has_documents() {
            return Ok(false);
        }
        self.retrieval.embedder().ensure_model_available().await?;
        Ok(true)
    }
}

/// Install the tracing subscriber.
///
/// Logs go to `docqa.log` in the data directory, or to stderr when
/// `verbose` is set.
///
/// # Errors
/// Returns an error if the log file cannot be opened
pub fn init_tracing(config: &DocqaConfig, verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docqa_context=info,docqa_session=info,docqa_cli=info".into());

    if verbose {
        Registry::default()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr).with_target(true))
            .init();
        return Ok(());
    }

    let data_dir = config.storage.resolve_data_dir()?;
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join(LOG_FILE))?;

    Registry::default()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(Arc::new(log_file))
                .with_ansi(false)
                .with_target(true)
                .with_level(true),
        )
        .init();
    Ok(())
}

/// Handle `docqa ingest`.
///
/// # Errors
/// Returns extraction, validation, embedding or persistence errors
#[allow(clippy::print_stdout, reason = "Command output")]
pub async fn handle_ingest(app: &App, path: &Path, title: Option<&str>) -> Result<()> {
    let report = app
        .retrieval
        .ingest_file(&app.extractor, path, title)
        .await
        .with_context(|| format!("Failed to ingest {}", path.display()))?;

    println!(
        "Ingested {} as {} ({} chunks)",
        path.display(),
        report.document_id,
        report.chunk_count
    );
    Ok(())
}

/// Handle `docqa list`.
///
/// # Errors
/// Returns an error if the catalog cannot be loaded
#[allow(clippy::print_stdout, reason = "Command output")]
pub async fn handle_list(app: &App) -> Result<()> {
    let documents = app.retrieval.list().await?;
    if documents.is_empty() {
        println!("No documents ingested yet");
        return Ok(());
    }

    for document in documents {
        println!(
            "{}  {}  {}  {} chunks  {}",
            document.id,
            document.title,
            document.file_type,
            document.chunks.len(),
            document.uploaded_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Handle `docqa delete`.
///
/// # Errors
/// Returns an error if the catalog cannot be loaded or `id` is unknown
#[allow(clippy::print_stdout, reason = "Command output")]
pub async fn handle_delete(app: &App, id: &str) -> Result<()> {
    if !app.retrieval.delete(id).await? {
        bail!("No document with id {id}");
    }
    println!("Deleted {id}");
    Ok(())
}

/// Handle `docqa search`.
///
/// # Errors
/// Returns embedding errors or a dimension mismatch
#[allow(clippy::print_stdout, reason = "Command output")]
pub async fn handle_search(app: &App, query: &str, top_k: Option<usize>) -> Result<()> {
    if !app.ready_for_queries().await? {
        println!("No documents ingested yet");
        return Ok(());
    }

    let response = match top_k {
        Some(top_k) => app.retrieval.search_top_k(query, top_k).await?,
        None => app.retrieval.search(query).await?,
    };
    if response.results.is_empty() {
        println!("No matching excerpts");
        return Ok(());
    }

    for (rank, result) in response.results.iter().enumerate() {
        let snippet: String = result.chunk.content.chars().take(SNIPPET_CHARS).collect();
        println!(
            "{}. {} (part {})  score {:.3} [vector {:.3}, keyword {:.3}]",
            rank + 1,
            result.chunk.document_title,
            result.chunk.chunk_index + 1,
            result.combined_score,
            result.vector_score,
            result.keyword_score
        );
        println!("   {}", result.explanation);
        println!("   {}", snippet.replace('\n', " "));
    }
    Ok(())
}

/// Handle `docqa ask`, streaming the answer to stdout.
///
/// Ctrl-C cancels the generation session.
///
/// # Errors
/// Returns retrieval or generation errors
#[allow(clippy::print_stdout, reason = "Streamed answer output")]
pub async fn handle_ask(app: &App, question: &str, request_id: Option<String>) -> Result<()> {
    app.ready_for_queries().await?;
    let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut stream = app.answers.ask(&request_id, question).await?;
    info!("Started session {request_id}");

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stdout = io::stdout();
    let mut sources: Option<MetaBlock> = None;
    let mut first = true;

    loop {
        let item = tokio::select! {
            biased;
            interrupted = &mut ctrl_c => {
                interrupted?;
                app.answers.cancel(&request_id);
                println!("\n[cancelled]");
                return Ok(());
            }
            item = stream.next() => item,
        };

        let Some(text) = item else {
            break;
        };
        let text = text?;
        if first {
            first = false;
            let (meta, rest) = split_meta_prefix(&text)?;
            sources = meta;
            print!("{rest}");
        } else {
            print!("{text}");
        }
        stdout.flush()?;
    }
    println!();

    if let Some(meta) = sources {
        println!("\nSources:");
        for (number, citation) in meta.citations.iter().enumerate() {
            println!(
                "  [{}] {} (part {}), score {:.2}: {}",
                number + 1,
                citation.document_title,
                citation.chunk_index + 1,
                citation.score,
                citation.explanation
            );
        }
    }
    Ok(())
}

/// Handle `docqa stats`.
///
/// # Errors
/// Returns an error if the catalog cannot be loaded
#[allow(clippy::print_stdout, reason = "Command output")]
pub async fn handle_stats(app: &App) -> Result<()> {
    let stats = app.retrieval.stats().await?;
    println!("Documents: {}", stats.documents);
    println!("Chunks:    {}", stats.chunks);
    match stats.dimension {
        Some(dimension) => println!("Dimension: {dimension}"),
        None => println!("Dimension: not set"),
    }
    println!("Snapshot:  {}", app.snapshot_path.display());
    Ok(())
}
