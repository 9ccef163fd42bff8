use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the docqa CLI
#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Ask questions about your own documents", long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Log to stderr instead of the log file
    #[arg(short, long, global = true, help = "Log to stderr instead of the log file")]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Add a document to the catalog
    #[command(about = "Chunk, embed and store a document")]
    Ingest {
        /// File to ingest
        #[arg(help = "Text, markdown, CSV, JSON or log file")]
        path: PathBuf,

        /// Display title
        #[arg(short, long, help = "Title to show in citations (defaults to the file name)")]
        title: Option<String>,
    },

    /// List stored documents
    #[command(about = "List ingested documents")]
    List,

    /// Remove a document
    #[command(about = "Delete a document and its chunks")]
    Delete {
        /// Document id
        #[arg(help = "Id printed by `ingest` or `list`")]
        id: String,
    },

    /// Run a hybrid search
    #[command(about = "Show the excerpts that best match a query")]
    Search {
        /// Query text
        #[arg(help = "Text to search for")]
        query: String,

        /// Number of results
        #[arg(short = 'k', long, help = "Number of results (overrides config)")]
        top_k: Option<usize>,
    },

    /// Ask a question
    #[command(about = "Answer a question from the ingested documents")]
    Ask {
        /// Question text
        #[arg(help = "The question to answer")]
        question: String,

        /// Session id
        #[arg(long, help = "Request id for the generation session (random by default)")]
        request_id: Option<String>,
    },

    /// Catalog statistics
    #[command(about = "Show catalog statistics")]
    Stats,
}
