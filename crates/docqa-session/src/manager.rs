//! Registry of in-flight generation sessions keyed by request id.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use docqa_core::{GenerationProvider, GenerationRequest, IgnoreLock as _, Result};

/// Buffered items between the generation task and the consumer.
const STREAM_BUFFER: usize = 32;

/// Lifecycle of one generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, generator not yet asked for tokens
    Pending,
    /// Generator is producing tokens
    Streaming,
    /// Generator finished normally
    Completed,
    /// Cancelled by the caller
    Cancelled,
    /// Generator failed for a reason other than cancellation
    Failed,
}

impl SessionState {
    /// Whether the session has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// State shared between the registry, the driving task and the consumer.
#[derive(Debug)]
struct SessionShared {
    serial: u64,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        *self.state.lock_ignore_poison()
    }

    /// Move to `next` unless the session already ended.
    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock_ignore_poison();
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }
}

/// Tracks one cancellable generation per request id.
///
/// The registry is only touched when a session starts and when it reaches a
/// terminal state. Starting a session under an id that is already active
/// replaces the registry entry; the older session keeps streaming but can no
/// longer be cancelled by id.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<SessionShared>>>,
    next_serial: AtomicU64,
}

/// A registered session that has not started streaming yet.
#[derive(Debug)]
pub struct SessionHandle {
    request_id: String,
    shared: Arc<SessionShared>,
    manager: Arc<SessionManager>,
}

impl SessionHandle {
    /// Request id this session is registered under.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Token tripped when the session is cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    fn finish(&self, state: SessionState) {
        if self.shared.transition(state) {
            debug!("Session {} {state}", self.request_id);
        }
        self.manager.remove(&self.request_id, self.shared.serial);
    }
}

impl SessionManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh `Pending` session for `request_id`.
    pub fn start(self: &Arc<Self>, request_id: &str) -> SessionHandle {
        let shared = Arc::new(SessionShared {
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::Pending),
        });

        let replaced = self
            .sessions
            .lock_ignore_poison()
            .insert(request_id.to_owned(), Arc::clone(&shared));
        if replaced.is_some() {
            debug!("Session {request_id} replaced an active session with the same id");
        } else {
            debug!("Session {request_id} pending");
        }

        SessionHandle {
            request_id: request_id.to_owned(),
            shared,
            manager: Arc::clone(self),
        }
    }

    /// Cancel the session registered under `request_id`.
    ///
    /// Returns `false` without side effects when no such session exists.
    pub fn cancel(&self, request_id: &str) -> bool {
        let Some(shared) = self.sessions.lock_ignore_poison().remove(request_id) else {
            return false;
        };
        shared.transition(SessionState::Cancelled);
        shared.cancel.cancel();
        debug!("Session {request_id} cancelled");
        true
    }

    /// State of the session registered under `request_id`, if any.
    pub fn state(&self, request_id: &str) -> Option<SessionState> {
        self.sessions
            .lock_ignore_poison()
            .get(request_id)
            .map(|shared| shared.state())
    }

    /// Whether a session is registered under `request_id`.
    pub fn is_active(&self, request_id: &str) -> bool {
        self.sessions.lock_ignore_poison().contains_key(request_id)
    }

    /// Number of registered sessions.
    pub fn active_count(&self) -> usize {
        self.sessions.lock_ignore_poison().len()
    }

    /// Remove the entry for `request_id` if it still belongs to session `serial`.
    fn remove(&self, request_id: &str, serial: u64) {
        let mut sessions = self.sessions.lock_ignore_poison();
        if sessions
            .get(request_id)
            .is_some_and(|shared| shared.serial == serial)
        {
            sessions.remove(request_id);
        }
    }

    /// Start a session and stream `generator`'s answer to `request`.
    ///
    /// `preamble` is delivered once, before the first generated token.
    pub fn stream(
        self: &Arc<Self>,
        request_id: &str,
        generator: Arc<dyn GenerationProvider>,
        request: GenerationRequest,
        preamble: Option<String>,
    ) -> ResponseStream {
        let handle = self.start(request_id);
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        let stream = ResponseStream {
            request_id: request_id.to_owned(),
            shared: Arc::clone(&handle.shared),
            receiver,
        };
        tokio::spawn(drive(handle, generator, request, preamble, sender));
        stream
    }
}

/// Send `item` to the consumer unless the session is cancelled first.
///
/// Returns `false` when the session should stop: the token tripped while
/// waiting for buffer space, or the consumer went away.
async fn deliver(
    sender: &mpsc::Sender<Result<String>>,
    cancel: &CancellationToken,
    item: Result<String>,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = sender.send(item) => {
            if sent.is_err() {
                cancel.cancel();
            }
            sent.is_ok()
        }
    }
}

/// Pump tokens from the generator into the consumer channel.
async fn drive(
    handle: SessionHandle,
    generator: Arc<dyn GenerationProvider>,
    request: GenerationRequest,
    preamble: Option<String>,
    sender: mpsc::Sender<Result<String>>,
) {
    let cancel = handle.cancellation_token();

    if let Some(preamble) = preamble
        && !deliver(&sender, &cancel, Ok(preamble)).await
    {
        handle.finish(SessionState::Cancelled);
        return;
    }

    handle.shared.transition(SessionState::Streaming);
    debug!("Session {} streaming from {}", handle.request_id, generator.name());

    let mut tokens = match generator.generate_stream(request, cancel.clone()).await {
        Ok(tokens) => tokens,
        Err(error) if error.is_cancellation() || cancel.is_cancelled() => {
            handle.finish(SessionState::Cancelled);
            return;
        }
        Err(error) => {
            warn!("Session {} failed to start: {error}", handle.request_id);
            handle.finish(SessionState::Failed);
            if !deliver(&sender, &cancel, Err(error)).await {
                debug!("Session {} failure not delivered", handle.request_id);
            }
            return;
        }
    };

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                handle.finish(SessionState::Cancelled);
                return;
            }
            item = tokens.next() => item,
        };

        match item {
            Some(Ok(token)) => {
                if !deliver(&sender, &cancel, Ok(token)).await {
                    handle.finish(SessionState::Cancelled);
                    return;
                }
            }
            Some(Err(error)) if error.is_cancellation() || cancel.is_cancelled() => {
                handle.finish(SessionState::Cancelled);
                return;
            }
            Some(Err(error)) => {
                warn!("Session {} failed: {error}", handle.request_id);
                handle.finish(SessionState::Failed);
                drop(tokens);
                if !deliver(&sender, &cancel, Err(error)).await {
                    debug!("Session {} failure not delivered", handle.request_id);
                }
                return;
            }
            None => {
                handle.finish(SessionState::Completed);
                return;
            }
        }
    }
}

/// Consumer side of a session: the preamble (if any), then raw tokens.
///
/// The stream ends without an error when the session is cancelled, and
/// yields nothing further once `cancel` has returned. Dropping it cancels
/// the session.
pub struct ResponseStream {
    request_id: String,
    shared: Arc<SessionShared>,
    receiver: mpsc::Receiver<Result<String>>,
}

impl ResponseStream {
    /// Request id of the session.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Current lifecycle state; terminal once the stream has ended.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Token shared with the generator call.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Drain the stream into one string.
    ///
    /// # Errors
    /// Returns the generator error if the session failed
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            text.push_str(&item?);
        }
        Ok(text)
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("request_id", &self.request_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Stream for ResponseStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.shared.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(_)) if this.shared.cancel.is_cancelled() => Poll::Ready(None),
            other => other,
        }
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if !self.shared.state().is_terminal() {
            self.shared.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::Error;
    use async_trait::async_trait;
    use docqa_core::TokenStream;
    use docqa_providers::MockGenerator;
    use futures::stream;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tokio::task::yield_now;
    use tokio::time::{sleep, timeout};

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "system".to_owned(),
            user: "question".to_owned(),
        }
    }

    async fn wait_until_inactive(manager: &SessionManager, request_id: &str) {
        timeout(Duration::from_secs(5), async {
            while manager.is_active(request_id) {
                yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn start_registers_pending_session() {
        let manager = Arc::new(SessionManager::new());
        let handle = manager.start("req-1");

        assert_eq!(handle.state(), SessionState::Pending);
        assert_eq!(manager.state("req-1"), Some(SessionState::Pending));
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let manager = SessionManager::new();
        assert!(!manager.cancel("missing"));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn cancel_trips_token_and_removes_session() {
        let manager = Arc::new(SessionManager::new());
        let handle = manager.start("req-1");

        assert!(manager.cancel("req-1"));
        assert!(handle.cancellation_token().is_cancelled());
        assert_eq!(handle.state(), SessionState::Cancelled);
        assert!(!manager.is_active("req-1"));
        assert!(!manager.cancel("req-1"));
    }

    #[tokio::test]
    async fn completed_stream_delivers_preamble_then_tokens() {
        let manager = Arc::new(SessionManager::new());
        let generator = Arc::new(MockGenerator::new(["Hel", "lo"]));
        let stream = manager.stream(
            "req-1",
            generator,
            request(),
            Some("__META__{}__META__\n\n".to_owned()),
        );

        let mut stream = stream;
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item.unwrap());
        }

        assert_eq!(items, vec!["__META__{}__META__\n\n", "Hel", "lo"]);
        assert_eq!(stream.state(), SessionState::Completed);
        assert!(!manager.is_active("req-1"));
    }

    #[tokio::test]
    async fn generator_failure_is_surfaced() {
        let manager = Arc::new(SessionManager::new());
        let generator = Arc::new(MockGenerator::new(["partial"]).failing_with("model crashed"));
        let mut stream = manager.stream("req-1", generator, request(), None);

        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        assert!(matches!(stream.next().await, Some(Err(Error::Generation(_)))));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), SessionState::Failed);
        assert!(!manager.is_active("req-1"));
    }

    #[tokio::test]
    async fn cancel_mid_stream_stops_delivery() {
        let manager = Arc::new(SessionManager::new());
        let generator = Arc::new(MockGenerator::new(["first", "second"]).hanging());
        let mut stream = manager.stream("req-1", generator, request(), None);

        assert_eq!(stream.next().await.unwrap().unwrap(), "first");
        assert!(manager.cancel("req-1"));

        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), SessionState::Cancelled);
        assert!(!manager.is_active("req-1"));
    }

    #[tokio::test]
    async fn replaced_session_does_not_remove_newer_one() {
        let manager = Arc::new(SessionManager::new());
        let slow = Arc::new(
            MockGenerator::new(["old"]).with_delay(Duration::from_millis(5)),
        );
        let old = manager.stream("shared", slow, request(), None);
        let newer = manager.start("shared");

        let text = old.collect_text().await.unwrap();
        assert_eq!(text, "old");

        assert!(manager.is_active("shared"));
        assert_eq!(manager.state("shared"), Some(SessionState::Pending));
        assert!(manager.cancel("shared"));
        assert!(newer.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_generation() {
        let manager = Arc::new(SessionManager::new());
        let generator = Arc::new(MockGenerator::new(["a"]).hanging());
        let mut stream = manager.stream("req-1", generator, request(), None);
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");

        drop(stream);
        wait_until_inactive(&manager, "req-1").await;
    }

    /// Token stream that never waits and records when it is dropped.
    struct EndlessTokens {
        inner: TokenStream,
        dropped: Arc<AtomicBool>,
    }

    impl Stream for EndlessTokens {
        type Item = Result<String>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inner.poll_next_unpin(cx)
        }
    }

    impl Drop for EndlessTokens {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    struct EndlessGenerator {
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl GenerationProvider for EndlessGenerator {
        fn name(&self) -> &'static str {
            "endless"
        }

        async fn generate_stream(
            &self,
            _request: GenerationRequest,
            _cancel: CancellationToken,
        ) -> Result<TokenStream> {
            Ok(Box::pin(EndlessTokens {
                inner: Box::pin(stream::repeat_with(|| Ok("token".to_owned()))),
                dropped: Arc::clone(&self.dropped),
            }))
        }
    }

    #[tokio::test]
    async fn cancel_releases_generator_while_consumer_is_behind() {
        let manager = Arc::new(SessionManager::new());
        let dropped = Arc::new(AtomicBool::new(false));
        let generator = Arc::new(EndlessGenerator {
            dropped: Arc::clone(&dropped),
        });
        let stream = manager.stream("req-1", generator, request(), None);

        // Let the drive task fill the channel and park on a full buffer.
        timeout(Duration::from_secs(5), async {
            while stream.state() != SessionState::Streaming {
                yield_now().await;
            }
        })
        .await
        .unwrap();
        sleep(Duration::from_millis(20)).await;
        assert!(!dropped.load(Ordering::SeqCst));

        assert!(manager.cancel("req-1"));
        timeout(Duration::from_secs(5), async {
            while !dropped.load(Ordering::SeqCst) {
                yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(stream.state(), SessionState::Cancelled);
        drop(stream);
    }
}
