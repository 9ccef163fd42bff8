//! Prompt assembly from retrieved excerpts.

use docqa_core::{GenerationRequest, QueryResponse};

/// System instruction for every answer.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about the user's documents. \
Answer using only the provided context excerpts. Cite excerpts by their number, like [1]. \
If the context does not contain the answer, say so plainly instead of guessing.";

/// Build the generation request for `question`.
pub fn build_request(question: &str, retrieval: &QueryResponse) -> GenerationRequest {
    GenerationRequest {
        system: SYSTEM_PROMPT.to_owned(),
        user: build_user_message(question, retrieval),
    }
}

fn build_user_message(question: &str, retrieval: &QueryResponse) -> String {
    if !retrieval.has_documents {
        return format!(
            "No documents have been uploaded yet, so there is no context.\n\nQuestion: {question}"
        );
    }
    if retrieval.results.is_empty() {
        return format!("No relevant excerpts were found in the documents.\n\nQuestion: {question}");
    }

    let excerpts: String = retrieval
        .results
        .iter()
        .enumerate()
        .map(|(number, result)| {
            format!(
                "\n[{}] {} (part {})\n{}\n",
                number + 1,
                result.chunk.document_title,
                result.chunk.chunk_index + 1,
                result.chunk.content
            )
        })
        .collect();
    format!("Context excerpts:\n{excerpts}\nQuestion: {question}")
}
