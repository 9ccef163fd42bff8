//! Streaming text generation against Ollama's `/api/generate`.

use std::collections::VecDeque;
use std::mem;

use async_trait::async_trait;
use futures::stream;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use docqa_core::{
    Error, GenerationProvider, GenerationRequest, ModelsConfig, Result, TokenStream,
};

/// Request body for a streaming generation.
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'req> {
    model: &'req str,
    prompt: &'req str,
    system: &'req str,
    stream: bool,
    options: OllamaOptions,
}

/// Sampling options.
#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// One NDJSON line of a streaming response.
#[derive(Debug, Deserialize)]
struct OllamaGenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

/// A decoded NDJSON line.
#[derive(Debug, PartialEq)]
enum StreamEvent {
    Token(String),
    Done,
}

/// Split complete lines off the front of `buffer` and decode them.
///
/// A trailing partial line stays in the buffer for the next read.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();
    while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
        let line: Vec<u8> = buffer.drain(..=newline).collect();
        if let Some(event) = decode_line(&line) {
            events.push(event);
        }
    }
    events
}

fn decode_line(line: &[u8]) -> Option<Result<StreamEvent>> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }
    let chunk: OllamaGenerateChunk = match serde_json::from_slice(trimmed) {
        Ok(chunk) => chunk,
        Err(error) => {
            return Some(Err(Error::Generation(format!(
                "Malformed stream line: {error}"
            ))));
        }
    };
    if let Some(message) = chunk.error {
        return Some(Err(Error::Generation(message)));
    }
    if chunk.done {
        // The final line may still carry text.
        return Some(Ok(if chunk.response.is_empty() {
            StreamEvent::Done
        } else {
            StreamEvent::Token(chunk.response)
        }));
    }
    (!chunk.response.is_empty()).then(|| Ok(StreamEvent::Token(chunk.response)))
}

/// Read state carried between polls of the token stream.
struct NdjsonReader {
    response: Response,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String>>,
    cancel: CancellationToken,
    finished: bool,
}

impl NdjsonReader {
    fn queue(&mut self, events: Vec<Result<StreamEvent>>) {
        for event in events {
            match event {
                Ok(StreamEvent::Token(token)) => self.pending.push_back(Ok(token)),
                Ok(StreamEvent::Done) => self.finished = true,
                Err(error) => {
                    self.pending.push_back(Err(error));
                    self.finished = true;
                }
            }
            if self.finished {
                break;
            }
        }
    }

    async fn next_item(mut self) -> Option<(Result<String>, Self)> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some((item, self));
            }
            if self.finished {
                return None;
            }

            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.finished = true;
                    return Some((Err(Error::Cancelled), self));
                }
                read = self.response.chunk() => read,
            };

            match read {
                Ok(Some(bytes)) => {
                    self.buffer.extend_from_slice(&bytes);
                    let events = drain_lines(&mut self.buffer);
                    self.queue(events);
                }
                Ok(None) => {
                    let rest = mem::take(&mut self.buffer);
                    let events: Vec<Result<StreamEvent>> = decode_line(&rest).into_iter().collect();
                    self.queue(events);
                    self.finished = true;
                }
                Err(error) => {
                    self.finished = true;
                    return Some((Err(Error::Request(error)), self));
                }
            }
        }
    }
}

/// Streaming generator for a local Ollama model.
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaGenerator {
    /// Create a generator from the model configuration.
    pub fn new(config: &ModelsConfig) -> Self {
        Self {
            client: Client::default(),
            base_url: config.base_url(),
            model: config.generation_model.clone(),
            temperature: config.temperature,
        }
    }

    /// Sets the base URL, e.g. `http://localhost:11434`.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Name of the generation model.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream> {
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: &request.user,
            system: &request.system,
            stream: true,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };
        let send = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            response = send => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let detail = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                body = response.text() => {
                    body.unwrap_or_else(|error| format!("(failed to read error body: {error})"))
                }
            };
            return Err(Error::Generation(format!(
                "Ollama returned error: {status} {detail}"
            )));
        }
        debug!("Streaming generation from {}", self.model);

        let reader = NdjsonReader {
            response,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            cancel,
            finished: false,
        };
        Ok(Box::pin(stream::unfold(reader, NdjsonReader::next_item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "system".to_owned(),
            user: "user".to_owned(),
        }
    }

    /// Serve one connection: read the request head, then write `reply`
    /// and keep the socket open until the client goes away.
    async fn serve_once(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = vec![0_u8; 4096];
            socket.read(&mut head).await.unwrap();
            socket.write_all(reply.as_bytes()).await.unwrap();
            let mut rest = Vec::new();
            if socket.read_to_end(&mut rest).await.is_err() {
                return;
            }
        });
        format!("http://{address}")
    }

    #[test]
    fn complete_lines_are_decoded_and_partial_lines_kept() {
        let mut buffer = b"{\"response\":\"Hel\",\"done\":false}\n{\"response\":\"lo\",\"do".to_vec();
        let events = drain_lines(&mut buffer);

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(StreamEvent::Token(token)) if token == "Hel"));
        assert_eq!(buffer, b"{\"response\":\"lo\",\"do".to_vec());

        buffer.extend_from_slice(b"ne\":false}\n{\"response\":\"\",\"done\":true}\n");
        let events = drain_lines(&mut buffer);
        assert!(matches!(&events[0], Ok(StreamEvent::Token(token)) if token == "lo"));
        assert!(matches!(events[1], Ok(StreamEvent::Done)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn empty_tokens_and_blank_lines_are_skipped() {
        let mut buffer = b"\n{\"response\":\"\",\"done\":false}\n  \n".to_vec();
        assert!(drain_lines(&mut buffer).is_empty());
    }

    #[test]
    fn service_errors_become_generation_errors() {
        let event = decode_line(b"{\"error\":\"model not loaded\"}");
        assert!(matches!(event, Some(Err(Error::Generation(message))) if message == "model not loaded"));

        let malformed = decode_line(b"not json");
        assert!(matches!(malformed, Some(Err(Error::Generation(_)))));
    }

    #[test]
    fn final_line_text_is_kept() {
        let event = decode_line(b"{\"response\":\"end\",\"done\":true}");
        assert!(matches!(event, Some(Ok(StreamEvent::Token(token))) if token == "end"));
    }

    #[tokio::test]
    async fn cancelled_before_send_returns_cancelled() {
        let generator = OllamaGenerator::new(&ModelsConfig::default()).with_url("http://127.0.0.1:9");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = generator.generate_stream(request(), cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn error_status_includes_body() {
        let url = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 14\r\nconnection: close\r\n\r\nmodel exploded",
        )
        .await;
        let generator = OllamaGenerator::new(&ModelsConfig::default()).with_url(url);

        let result = generator.generate_stream(request(), CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(Error::Generation(message)) if message.contains("500") && message.contains("model exploded")
        ));
    }

    #[tokio::test]
    async fn cancel_interrupts_stalled_error_body() {
        // Promises a body it never sends.
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 100\r\n\r\nloading",
        )
        .await;
        let generator = OllamaGenerator::new(&ModelsConfig::default()).with_url(url);
        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trip.cancel();
        });

        let result = timeout(Duration::from_secs(5), generator.generate_stream(request(), cancel))
            .await
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
