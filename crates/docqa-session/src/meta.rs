//! The `__META__<json>__META__\n\n` preamble carrying citations.

use serde::{Deserialize, Serialize};

use docqa_core::{Result, SearchResult};

/// Delimiter on both sides of the JSON block.
pub const META_DELIMITER: &str = "__META__";
/// Separator between the closing delimiter and the first token.
const META_TERMINATOR: &str = "\n\n";
/// How the delimiter is spelled inside the JSON so it cannot close the block early.
const ESCAPED_DELIMITER: &str = "\\u005f_META__";

/// Source reference for one retrieved excerpt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Document the excerpt came from
    pub document_id: String,
    /// Title of that document
    pub document_title: String,
    /// Position of the chunk within the document
    pub chunk_index: usize,
    /// Combined hybrid score
    pub score: f32,
    /// Ranking rationale for this excerpt
    pub explanation: String,
}

/// Retrieval metadata sent ahead of the generated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaBlock {
    /// One citation per retrieved excerpt, best first
    pub citations: Vec<Citation>,
    /// Summary of why these excerpts were chosen
    pub rationale: String,
}

impl MetaBlock {
    /// Build the block for `results`, or `None` when nothing was retrieved.
    pub fn from_results(results: &[SearchResult]) -> Option<Self> {
        let top = results.first()?;
        let citations = results
            .iter()
            .map(|result| Citation {
                document_id: result.chunk.document_id.clone(),
                document_title: result.chunk.document_title.clone(),
                chunk_index: result.chunk.chunk_index,
                score: result.combined_score,
                explanation: result.explanation.clone(),
            })
            .collect();

        let excerpts = if results.len() == 1 { "excerpt" } else { "excerpts" };
        let rationale = format!(
            "Found {} relevant {excerpts}; best match in \"{}\" ({}, score {:.2})",
            results.len(),
            top.chunk.document_title,
            top.explanation,
            top.combined_score
        );

        Some(Self {
            citations,
            rationale,
        })
    }
}

/// Render `meta` as the stream preamble.
///
/// # Errors
/// Returns a JSON error if the block cannot be serialized
pub fn encode_meta_prefix(meta: &MetaBlock) -> Result<String> {
    let mut json = serde_json::to_string(meta)?;
    while json.contains(META_DELIMITER) {
        json = json.replace(META_DELIMITER, ESCAPED_DELIMITER);
    }
    Ok(format!("{META_DELIMITER}{json}{META_DELIMITER}{META_TERMINATOR}"))
}

/// Strip a leading preamble from `text`.
///
/// Text without a preamble is returned unchanged with `None`.
///
/// # Errors
/// Returns a JSON error if the delimited block is not a valid [`MetaBlock`]
pub fn split_meta_prefix(text: &str) -> Result<(Option<MetaBlock>, &str)> {
    let Some(after_open) = text.strip_prefix(META_DELIMITER) else {
        return Ok((None, text));
    };
    let Some(close) = after_open.find(META_DELIMITER) else {
        return Ok((None, text));
    };

    let meta: MetaBlock = serde_json::from_str(&after_open[..close])?;
    let rest = &after_open[close + META_DELIMITER.len()..];
    let rest = rest.strip_prefix(META_TERMINATOR).unwrap_or(rest);
    Ok((Some(meta), rest))
}
