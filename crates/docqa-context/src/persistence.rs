//! Catalog persistence: a versioned bincode snapshot file and an in-memory store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bincode::config::standard as bincode_config;
use bincode::{Decode, Encode, decode_from_slice, encode_to_vec};
use chrono::{DateTime, Utc};
use tokio::fs as async_fs;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use docqa_core::{
    Chunk, Document, DocumentStore, Error, FileType, IgnoreLock as _, Result,
};

/// Chunk as written to disk; owner fields are restored from the document.
#[derive(Debug, Clone, Encode, Decode)]
struct StoredChunk {
    id: String,
    content: String,
    embedding: Vec<f32>,
    chunk_index: u64,
}

/// Document as written to disk.
#[derive(Debug, Clone, Encode, Decode)]
struct StoredDocument {
    id: String,
    title: String,
    raw_content: String,
    file_type: String,
    uploaded_secs: i64,
    uploaded_nanos: u32,
    chunks: Vec<StoredChunk>,
}

/// On-disk catalog snapshot
#[derive(Debug, Encode, Decode)]
struct CatalogSnapshot {
    /// Version identifier for schema changes
    version: u32,
    /// Embedding dimension shared by every chunk, if any chunk exists
    dimension: Option<u64>,
    documents: Vec<StoredDocument>,
}

impl CatalogSnapshot {
    /// Snapshot schema version
    const VERSION: u32 = 1;

    fn from_documents(documents: &[Document]) -> Self {
        let dimension = documents
            .iter()
            .find_map(Document::dimension)
            .map(|dimension| dimension as u64);
        Self {
            version: Self::VERSION,
            dimension,
            documents: documents.iter().map(StoredDocument::from_document).collect(),
        }
    }

    /// Check the schema version and the dimension of every embedding.
    fn validate(&self) -> Result<()> {
        if self.version != Self::VERSION {
            return Err(Error::Persistence(format!(
                "snapshot version {} is not supported (expected {})",
                self.version,
                Self::VERSION
            )));
        }

        let Some(dimension) = self.dimension else {
            if self.documents.iter().any(|document| !document.chunks.is_empty()) {
                return Err(Error::Persistence(
                    "snapshot has chunks but no embedding dimension".to_owned(),
                ));
            }
            return Ok(());
        };

        for document in &self.documents {
            for chunk in &document.chunks {
                if chunk.embedding.len() as u64 != dimension {
                    return Err(Error::Persistence(format!(
                        "chunk {} has dimension {} but the snapshot uses {dimension}",
                        chunk.id,
                        chunk.embedding.len()
                    )));
                }
            }
        }
        Ok(())
    }

    fn into_documents(self) -> Result<Vec<Document>> {
        self.documents
            .into_iter()
            .map(StoredDocument::into_document)
            .collect()
    }
}

impl StoredDocument {
    fn from_document(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            title: document.title.clone(),
            raw_content: document.raw_content.clone(),
            file_type: document.file_type.as_str().to_owned(),
            uploaded_secs: document.uploaded_at.timestamp(),
            uploaded_nanos: document.uploaded_at.timestamp_subsec_nanos(),
            chunks: document
                .chunks
                .iter()
                .map(|chunk| StoredChunk {
                    id: chunk.id.clone(),
                    content: chunk.content.clone(),
                    embedding: chunk.embedding.clone(),
                    chunk_index: chunk.chunk_index as u64,
                })
                .collect(),
        }
    }

    fn into_document(self) -> Result<Document> {
        let uploaded_at: DateTime<Utc> =
            DateTime::from_timestamp(self.uploaded_secs, self.uploaded_nanos).ok_or_else(|| {
                Error::Persistence(format!("document {} has an invalid timestamp", self.id))
            })?;

        let chunks = self
            .chunks
            .into_iter()
            .map(|chunk| {
                Arc::new(Chunk {
                    id: chunk.id,
                    document_id: self.id.clone(),
                    document_title: self.title.clone(),
                    content: chunk.content,
                    embedding: chunk.embedding,
                    chunk_index: chunk.chunk_index as usize,
                })
            })
            .collect();

        Ok(Document {
            id: self.id,
            title: self.title,
            raw_content: self.raw_content,
            file_type: FileType::from_label(&self.file_type),
            uploaded_at,
            chunks,
        })
    }
}

/// Stores the whole catalog as one bincode file, overwritten on every save.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Create a store writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("bin.tmp")
    }
}

#[async_trait]
impl DocumentStore for SnapshotStore {
    async fn save_all(&self, documents: &[Document]) -> Result<()> {
        let snapshot = CatalogSnapshot::from_documents(documents);
        let document_count = snapshot.documents.len();

        let bytes = spawn_blocking(move || {
            encode_to_vec(&snapshot, bincode_config())
                .map_err(|error| Error::Persistence(format!("Failed to serialize snapshot: {error}")))
        })
        .await
        .map_err(|error| Error::Persistence(format!("Task join error: {error}")))??;

        if let Some(parent) = self.path.parent() {
            async_fs::create_dir_all(parent).await.map_err(|error| {
                Error::Persistence(format!("Failed to create data directory: {error}"))
            })?;
        }

        let temp_path = self.temp_path();
        async_fs::write(&temp_path, &bytes).await.map_err(|error| {
            Error::Persistence(format!(
                "Failed to write snapshot to {}: {error}",
                temp_path.display()
            ))
        })?;
        async_fs::rename(&temp_path, &self.path)
            .await
            .map_err(|error| {
                Error::Persistence(format!(
                    "Failed to replace snapshot {}: {error}",
                    self.path.display()
                ))
            })?;

        info!(
            "Saved catalog snapshot with {document_count} documents ({} bytes) to {}",
            bytes.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Document>> {
        let data = match async_fs::read(&self.path).await {
            Ok(data) => data,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!("No catalog snapshot at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(error) => {
                return Err(Error::Persistence(format!(
                    "Failed to read snapshot {}: {error}",
                    self.path.display()
                )));
            }
        };
        let byte_count = data.len();

        let snapshot: CatalogSnapshot = spawn_blocking(move || {
            decode_from_slice(&data, bincode_config())
                .map_err(|error| {
                    Error::Persistence(format!("Failed to deserialize snapshot: {error}"))
                })
                .map(|(snapshot, _)| snapshot)
        })
        .await
        .map_err(|error| Error::Persistence(format!("Task join error: {error}")))??;

        snapshot.validate()?;
        let documents = snapshot.into_documents()?;
        info!(
            "Loaded catalog snapshot with {} documents ({byte_count} bytes) from {}",
            documents.len(),
            self.path.display()
        );
        Ok(documents)
    }
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<Vec<Document>>,
    save_count: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `documents`.
    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            documents: Mutex::new(documents),
            ..Self::default()
        }
    }

    /// Make every following `save_all` fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    /// Documents from the last successful save.
    pub fn documents(&self) -> Vec<Document> {
        self.documents.lock_ignore_poison().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn save_all(&self, documents: &[Document]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Persistence("memory store is read-only".to_owned()));
        }
        *self.documents.lock_ignore_poison() = documents.to_vec();
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Document>> {
        Ok(self.documents.lock_ignore_poison().clone())
    }
}
