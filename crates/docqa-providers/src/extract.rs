//! Plain-text extraction for uploaded files.

use std::fs;
use std::path::Path;

use docqa_core::{Error, FileExtractor, FileType, Result, ValidationError};

/// Reads text-like files straight from disk.
///
/// PDF and unknown extensions are rejected; invalid UTF-8 is replaced
/// rather than failing the upload.
#[derive(Debug, Clone)]
pub struct TextFileExtractor {
    max_file_bytes: u64,
}

impl TextFileExtractor {
    /// Create an extractor rejecting files above `max_file_bytes`.
    pub fn new(max_file_bytes: u64) -> Self {
        Self { max_file_bytes }
    }
}

impl FileExtractor for TextFileExtractor {
    fn classify(&self, path: &Path) -> FileType {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "txt" | "log" | "text" => FileType::Text,
            "md" | "markdown" => FileType::Markdown,
            "csv" => FileType::Csv,
            "json" => FileType::Json,
            "pdf" => FileType::Pdf,
            _ => FileType::Unknown,
        }
    }

    fn parse(&self, path: &Path) -> Result<String> {
        match self.classify(path) {
            FileType::Pdf | FileType::Unknown => {
                let label = path
                    .extension()
                    .map_or_else(|| path.display().to_string(), |ext| ext.to_string_lossy().into_owned());
                return Err(Error::UnsupportedFileType(label));
            }
            FileType::Text | FileType::Markdown | FileType::Csv | FileType::Json => {}
        }

        let metadata = fs::metadata(path).map_err(|error| {
            Error::Extraction(format!("Failed to read {}: {error}", path.display()))
        })?;
        if metadata.len() > self.max_file_bytes {
            return Err(ValidationError::FileTooLarge {
                size: metadata.len(),
                limit: self.max_file_bytes,
            }
            .into());
        }

        let bytes = fs::read(path).map_err(|error| {
            Error::Extraction(format!("Failed to read {}: {error}", path.display()))
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
